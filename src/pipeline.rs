use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classifier::{ClassifierCache, TokenClassifier};
use crate::color_runs::{line_color_runs, split_tokens_by_line, ColorRun};
use crate::encoding::{
    concat_sections, ffmpeg_binary, section_path, EncodeSettings, FfmpegMode, FfmpegPipe,
    PARTIAL_DIR_NAME,
};
use crate::font::{discover_font, warn_missing_glyphs};
use crate::layout::{plan_layout, FontMetrics, LayoutInput, LayoutPlan, Viewport};
use crate::lexer::{tokenize_source, Token};
use crate::line_visual::{build_line_visuals, LineVisual};
use crate::quality::{output_video_path, FrameSpec};
use crate::renderer::{write_png, FrameRenderer, Scene};
use crate::schema::RenderConfig;
use crate::sequencer::{
    sequence_reveals, DuplicatePolicy, Sequence, SequenceEvent, SequencerSettings,
};
use crate::source::{load_source, SourceText};
use crate::timeline::Timeline;

pub const TOKENS_DIR_NAME: &str = "tokens";
pub const PLAN_FILE_NAME: &str = "plan.json";

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub media_root: PathBuf,
    pub work_dir: PathBuf,
    pub font: Option<PathBuf>,
    pub duplicates: DuplicatePolicy,
    pub ffmpeg_mode: FfmpegMode,
}

impl RenderOptions {
    pub fn new(media_root: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            work_dir: work_dir.into(),
            font: None,
            duplicates: DuplicatePolicy::Skip,
            ffmpeg_mode: FfmpegMode::Auto,
        }
    }
}

/// Everything computed before the first frame is drawn.
#[derive(Debug, Clone)]
pub struct PreparedRender {
    pub config: RenderConfig,
    pub source: SourceText,
    pub frame: FrameSpec,
    pub plan: LayoutPlan,
    /// Tokens of each retained line, parallel to `source.lines`.
    pub tokens_by_line: Vec<Vec<Token>>,
    pub runs_by_line: Vec<Vec<ColorRun>>,
    pub visuals: Vec<LineVisual>,
    pub sequence: Sequence,
    pub timeline: Timeline,
}

impl PreparedRender {
    pub fn scene(&self) -> Scene<'_> {
        Scene {
            plan: &self.plan,
            visuals: &self.visuals,
            timeline: &self.timeline,
        }
    }

    pub fn output_path(&self, media_root: &Path) -> PathBuf {
        output_video_path(media_root, self.frame, &self.config.output_file_name())
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            output_file: self.config.output_file_name(),
            quality_dir: self.frame.directory_name(),
            frame: self.frame,
            line_numbers: self.source.line_numbers(),
            line_count: self.source.lines.len(),
            layout: self.plan,
            events: self.sequence.events.clone(),
            duration_seconds: self.timeline.duration,
            frame_count: self.timeline.frame_count(self.frame.fps),
            section_count: self.timeline.section_frames(self.frame.fps).len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub output_file: String,
    pub quality_dir: String,
    pub frame: FrameSpec,
    pub line_numbers: Vec<u32>,
    pub line_count: usize,
    pub layout: LayoutPlan,
    pub events: Vec<SequenceEvent>,
    pub duration_seconds: f32,
    pub frame_count: u32,
    pub section_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderOutcome {
    pub output_path: PathBuf,
    pub frames: u32,
    pub sections: usize,
    pub duration_seconds: f32,
}

pub fn prepare_render(
    config: &RenderConfig,
    metrics: FontMetrics,
    duplicates: DuplicatePolicy,
) -> Result<PreparedRender> {
    let source = load_source(config)?;
    prepare_from_source(config, source, metrics, duplicates)
}

pub fn prepare_from_source(
    config: &RenderConfig,
    source: SourceText,
    metrics: FontMetrics,
    duplicates: DuplicatePolicy,
) -> Result<PreparedRender> {
    let file_tokens = tokenize_source(source.language, &source.display_text());
    let mut file_lines = split_tokens_by_line(&file_tokens);
    let tokens_by_line = source
        .lines
        .iter()
        .map(|line| {
            file_lines
                .get_mut(line.line_number as usize - 1)
                .map(std::mem::take)
                .unwrap_or_default()
        })
        .collect::<Vec<_>>();

    let classifier = TokenClassifier::new(&config.syntax_colors);
    let mut cache = ClassifierCache::new();
    let runs_by_line = tokens_by_line
        .iter()
        .map(|tokens| line_color_runs(tokens, &classifier, &mut cache))
        .collect::<Vec<_>>();
    debug!(categories = cache.len(), "classified tokens");

    let frame = config.quality.frame_spec(config.orientation);
    let input = LayoutInput {
        line_count: source.lines.len(),
        max_line_number: source.lines.iter().map(|line| line.line_number).max().unwrap_or(1),
        max_line_columns: source
            .lines
            .iter()
            .map(|line| line.text.chars().count())
            .max()
            .unwrap_or(0),
    };
    let plan = plan_layout(input, Viewport::for_frame(frame, config.orientation), metrics)?;
    debug!(
        font_size = plan.font_size,
        line_height = plan.line_height,
        chunked = plan.chunked,
        capacity = plan.chunk_capacity,
        width_scale = plan.width_scale,
        "planned layout"
    );

    let visuals = build_line_visuals(
        &source.lines,
        &runs_by_line,
        &plan,
        config.animation_type,
        config.syntax_colors.default,
    )?;
    let settings = SequencerSettings::from_plan(
        &plan,
        config.animation_timing,
        config.animation_type,
        duplicates,
    );
    let sequence = sequence_reveals(&source.line_numbers(), &config.effective_groups(), settings)?;
    let timeline = Timeline::compile(&sequence, &visuals, &plan)?;

    Ok(PreparedRender {
        config: config.clone(),
        source,
        frame,
        plan,
        tokens_by_line,
        runs_by_line,
        visuals,
        sequence,
        timeline,
    })
}

/// One `tokens/line_{n}.json` per retained line.
pub fn write_token_artifacts(work_dir: &Path, prepared: &PreparedRender) -> Result<()> {
    let dir = work_dir.join(TOKENS_DIR_NAME);
    fs::create_dir_all(&dir).with_context(|| format!("failed to create '{}'", dir.display()))?;
    for (line, tokens) in prepared.source.lines.iter().zip(&prepared.tokens_by_line) {
        let path = dir.join(format!("line_{}.json", line.line_number));
        let body = serde_json::to_vec(tokens).context("failed to serialize tokens")?;
        fs::write(&path, body).with_context(|| format!("failed to write '{}'", path.display()))?;
    }
    Ok(())
}

pub fn write_plan_artifact(work_dir: &Path, prepared: &PreparedRender) -> Result<PathBuf> {
    let path = work_dir.join(PLAN_FILE_NAME);
    let body = serde_json::to_vec_pretty(&prepared.summary()).context("failed to serialize plan")?;
    fs::write(&path, body).with_context(|| format!("failed to write '{}'", path.display()))?;
    Ok(path)
}

pub fn render_video(config: &RenderConfig, options: &RenderOptions) -> Result<RenderOutcome> {
    let font = discover_font(options.font.as_deref())?;
    let prepared = prepare_render(config, font.metrics(), options.duplicates)?;
    for line in &prepared.source.lines {
        warn_missing_glyphs(&font, &line.text);
    }

    fs::create_dir_all(&options.work_dir)
        .with_context(|| format!("failed to create work dir '{}'", options.work_dir.display()))?;
    write_token_artifacts(&options.work_dir, &prepared)?;
    write_plan_artifact(&options.work_dir, &prepared)?;

    let frame = prepared.frame;
    let settings = EncodeSettings::for_quality(config.quality, frame);
    let sections = prepared.timeline.section_frames(frame.fps);
    let frames = prepared.timeline.frame_count(frame.fps);
    info!(
        lines = prepared.source.lines.len(),
        frames,
        sections = sections.len(),
        size = %format!("{}x{}", frame.width, frame.height),
        "rendering"
    );

    let partial_dir = options.work_dir.join(PARTIAL_DIR_NAME);
    fs::create_dir_all(&partial_dir)
        .with_context(|| format!("failed to create '{}'", partial_dir.display()))?;

    let mut renderer = FrameRenderer::new(font.font, frame);
    let scene = prepared.scene();
    let mut section_paths = Vec::with_capacity(sections.len());
    for (index, range) in sections.iter().enumerate() {
        let path = section_path(&options.work_dir, index);
        let pipe = FfmpegPipe::spawn_with_mode(&settings, &path, options.ffmpeg_mode)?;
        for frame_index in range.clone() {
            let t = Timeline::frame_time(frame_index, frame.fps);
            let rgba = renderer.render_frame_rgba(scene, t)?;
            if let Err(error) = pipe.write_frame(rgba) {
                return Err(pipe.finish().err().unwrap_or(error));
            }
        }
        pipe.finish()
            .with_context(|| format!("failed to encode section {index}"))?;
        debug!(section = index, frames = range.len(), "section complete");
        section_paths.push(path);
    }

    let output_path = prepared.output_path(&options.media_root);
    let parent = output_path
        .parent()
        .ok_or_else(|| anyhow!("output path '{}' has no parent", output_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create '{}'", parent.display()))?;
    let ffmpeg = ffmpeg_binary(options.ffmpeg_mode)?;
    concat_sections(
        &ffmpeg,
        &section_paths,
        &options.work_dir.join("concat.txt"),
        &output_path,
    )?;
    if let Err(error) = fs::remove_dir_all(&partial_dir) {
        warn!(dir = %partial_dir.display(), %error, "failed to remove section dir");
    }

    info!(output = %output_path.display(), "render complete");
    Ok(RenderOutcome {
        output_path,
        frames,
        sections: section_paths.len(),
        duration_seconds: prepared.timeline.duration,
    })
}

/// Renders the frame at `time` seconds (clamped to the timeline) as a PNG.
pub fn render_still(
    config: &RenderConfig,
    font: Option<&Path>,
    duplicates: DuplicatePolicy,
    time: f32,
    png_path: &Path,
) -> Result<()> {
    let font = discover_font(font)?;
    let prepared = prepare_render(config, font.metrics(), duplicates)?;
    let t = time.clamp(0.0, prepared.timeline.duration);
    let mut renderer = FrameRenderer::new(font.font, prepared.frame);
    let pixmap = renderer.render_pixmap(prepared.scene(), t)?;
    write_png(&pixmap, png_path)?;
    info!(time = t, output = %png_path.display(), "wrote frame");
    Ok(())
}
