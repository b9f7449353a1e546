use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use codereel::config::{load_render_config, to_legacy_text, to_structured_json};
use codereel::encoding::FfmpegMode;
use codereel::error_codes::{envelope_for, find_coded_error, ErrorClass};
use codereel::font::discover_font;
use codereel::job::WorkerCommand;
use codereel::layout::FontMetrics;
use codereel::pipeline::{prepare_render, render_still, render_video, RenderOptions};
use codereel::sequencer::{DuplicatePolicy, SequenceEvent};
use codereel::service::{RenderService, ServiceOptions};

const DEFAULT_SERVICE_ROOT: &str = "codereel-data";

#[derive(Debug, Parser)]
#[command(name = "codereel", version)]
#[command(about = "Render source code into typed-in reveal videos")]
struct Cli {
    /// Treat a line listed in more than one group as a configuration error.
    #[arg(long, global = true)]
    strict_groups: bool,
    /// ffmpeg backend: auto, system or sidecar.
    #[arg(long = "ffmpeg", global = true, default_value = "auto", value_parser = parse_ffmpeg_mode)]
    ffmpeg_mode: FfmpegMode,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConfigTarget {
    Json,
    Legacy,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a config and its source range.
    Check { config: PathBuf },
    /// Print layout and reveal sequence without rendering.
    Plan {
        config: PathBuf,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        font: Option<PathBuf>,
    },
    /// Render the video.
    Render {
        config: PathBuf,
        #[arg(long, default_value = "media")]
        media_root: PathBuf,
        /// Defaults to `<media-root>/work/<stem>`.
        #[arg(long)]
        work_dir: Option<PathBuf>,
        #[arg(long)]
        font: Option<PathBuf>,
    },
    /// Render one frame to PNG.
    Frame {
        config: PathBuf,
        #[arg(long)]
        time: f32,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        #[arg(long)]
        font: Option<PathBuf>,
    },
    /// Rewrite a config as structured JSON or legacy text.
    Convert {
        config: PathBuf,
        #[arg(long, value_enum, default_value = "json")]
        to: ConfigTarget,
    },
    /// Render an uploaded script through the service layout.
    Submit {
        file: PathBuf,
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = DEFAULT_SERVICE_ROOT)]
        root: PathBuf,
        #[arg(long)]
        font: Option<PathBuf>,
    },
    /// Fetch a stored video. Clears all stored outputs afterwards.
    Download {
        video_id: String,
        #[arg(long, default_value = DEFAULT_SERVICE_ROOT)]
        root: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
    /// List stored videos, newest first.
    Videos {
        #[arg(long, default_value = DEFAULT_SERVICE_ROOT)]
        root: PathBuf,
    },
    /// Delete one stored video.
    Delete {
        video_id: String,
        #[arg(long, default_value = DEFAULT_SERVICE_ROOT)]
        root: PathBuf,
    },
    /// Evict expired and over-budget cache entries.
    CacheEvict {
        #[arg(long, default_value = DEFAULT_SERVICE_ROOT)]
        root: PathBuf,
    },
}

fn parse_ffmpeg_mode(value: &str) -> Result<FfmpegMode, String> {
    FfmpegMode::from_keyword(value)
        .ok_or_else(|| format!("unknown ffmpeg mode '{value}' (expected auto, system or sidecar)"))
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        git = option_env!("CODEREEL_GIT_HASH").unwrap_or("unknown"),
        "codereel starting"
    );
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::debug!(error = %format!("{error:#}"), "command failed");
            let envelope = envelope_for(&error);
            let body = serde_json::to_string(&envelope).unwrap_or_else(|_| {
                format!("{{\"ok\":false,\"error\":{{\"message\":\"{error}\"}}}}")
            });
            let _ = writeln!(std::io::stderr(), "{body}");
            match find_coded_error(&error).map(|coded| coded.class()) {
                Some(ErrorClass::Client) => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("codereel=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let duplicates = if cli.strict_groups {
        DuplicatePolicy::Reject
    } else {
        DuplicatePolicy::Skip
    };
    match cli.command {
        Commands::Check { config } => run_check(&config, duplicates),
        Commands::Plan { config, json, font } => {
            run_plan(&config, json, font.as_deref(), duplicates)
        }
        Commands::Render {
            config,
            media_root,
            work_dir,
            font,
        } => {
            let render_config = load_render_config(&config)?;
            let work_dir = work_dir.unwrap_or_else(|| {
                media_root.join("work").join(render_config.output_stem())
            });
            let mut options = RenderOptions::new(media_root, work_dir);
            options.font = font;
            options.duplicates = duplicates;
            options.ffmpeg_mode = cli.ffmpeg_mode;
            let outcome = render_video(&render_config, &options)?;
            println!(
                "Wrote {} ({} frames, {:.2}s)",
                outcome.output_path.display(),
                outcome.frames,
                outcome.duration_seconds
            );
            Ok(())
        }
        Commands::Frame {
            config,
            time,
            output,
            font,
        } => {
            let render_config = load_render_config(&config)?;
            render_still(&render_config, font.as_deref(), duplicates, time, &output)?;
            println!("Wrote {}", output.display());
            Ok(())
        }
        Commands::Convert { config, to } => {
            let render_config = load_render_config(&config)?;
            let body = match to {
                ConfigTarget::Json => to_structured_json(&render_config)?,
                ConfigTarget::Legacy => to_legacy_text(&render_config)?,
            };
            println!("{}", body.trim_end());
            Ok(())
        }
        Commands::Submit {
            file,
            config,
            root,
            font,
        } => {
            let mut options = ServiceOptions::new(WorkerCommand::current_exe()?);
            options.font = font;
            options.strict_groups = cli.strict_groups;
            options.ffmpeg_mode = cli.ffmpeg_mode;
            let service = RenderService::new(root, options);
            let bytes =
                fs::read(&file).with_context(|| format!("failed to read '{}'", file.display()))?;
            let config_json = fs::read_to_string(&config)
                .with_context(|| format!("failed to read '{}'", config.display()))?;
            let file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow!("'{}' has no file name", file.display()))?;
            let receipt = service.submit(&file_name, &bytes, &config_json)?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
            Ok(())
        }
        Commands::Download {
            video_id,
            root,
            output,
        } => {
            let bytes = service_for(root)?.download(&video_id)?;
            fs::write(&output, &bytes)
                .with_context(|| format!("failed to write '{}'", output.display()))?;
            println!("Wrote {} ({} bytes)", output.display(), bytes.len());
            Ok(())
        }
        Commands::Videos { root } => {
            let videos = service_for(root)?.list_videos()?;
            println!("{}", serde_json::to_string_pretty(&videos)?);
            Ok(())
        }
        Commands::Delete { video_id, root } => {
            service_for(root)?.delete_video(&video_id)?;
            println!("Deleted {video_id}");
            Ok(())
        }
        Commands::CacheEvict { root } => {
            let report = service_for(root)?.evict_cache()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn service_for(root: PathBuf) -> Result<RenderService> {
    Ok(RenderService::new(root, ServiceOptions::new(WorkerCommand::current_exe()?)))
}

fn run_check(config_path: &Path, duplicates: DuplicatePolicy) -> Result<()> {
    let config = load_render_config(config_path)?;
    let prepared = prepare_render(&config, FontMetrics::default(), duplicates)?;
    println!(
        "OK: {} (lines {}-{}, {} retained, {} {}, {:?})",
        config.script_path.display(),
        config.start_line,
        config.end_line,
        prepared.source.lines.len(),
        config.quality.keyword(),
        config.orientation.keyword(),
        prepared.source.language
    );
    println!("Output: {}", config.output_file_name());
    Ok(())
}

fn run_plan(
    config_path: &Path,
    json: bool,
    font: Option<&Path>,
    duplicates: DuplicatePolicy,
) -> Result<()> {
    let config = load_render_config(config_path)?;
    let metrics = match font {
        Some(path) => discover_font(Some(path))?.metrics(),
        None => FontMetrics::default(),
    };
    let prepared = prepare_render(&config, metrics, duplicates)?;
    let summary = prepared.summary();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let layout = &summary.layout;
    println!(
        "{} -> {}/{}",
        config.script_path.display(),
        summary.quality_dir,
        summary.output_file
    );
    println!(
        "layout: font {}pt, line height {:.3}, width scale {:.3}, {}",
        layout.font_size,
        layout.line_height,
        layout.width_scale,
        if layout.chunked {
            format!("chunked ({} rows)", layout.chunk_capacity)
        } else {
            "single page".to_owned()
        }
    );
    for event in &summary.events {
        match event {
            SequenceEvent::Reveal { lines, .. } => println!("  reveal {lines:?}"),
            SequenceEvent::ScrollOff { lines } => println!("  scroll off {} lines", lines.len()),
            SequenceEvent::Wait { seconds } => println!("  wait {seconds:.2}s"),
        }
    }
    println!(
        "{:.2}s, {} frames, {} sections",
        summary.duration_seconds, summary.frame_count, summary.section_count
    );
    Ok(())
}
