use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;
use tracing::{debug, warn};

use crate::error_codes::CodedError;
use crate::quality::{FrameSpec, QualityPreset};

pub const H264_CRF: u8 = 18;
pub const PARTIAL_DIR_NAME: &str = "partial_movie_files";

pub struct FfmpegPipe {
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FfmpegMode {
    #[default]
    Auto,
    System,
    Sidecar,
}

impl FfmpegMode {
    pub fn from_keyword(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "system" => Some(Self::System),
            "sidecar" => Some(Self::Sidecar),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::System => "system",
            Self::Sidecar => "sidecar",
        }
    }
}

/// H.264 settings for one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub preset: &'static str,
    pub crf: u8,
}

impl EncodeSettings {
    pub fn for_quality(quality: QualityPreset, frame: FrameSpec) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            fps: frame.fps,
            preset: quality.x264_preset(),
            crf: H264_CRF,
        }
    }

    fn size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

trait VideoEncoderBackend: Send {
    fn mode_label(&self) -> &'static str;
    fn run(self: Box<Self>, receiver: mpsc::Receiver<Vec<u8>>) -> Result<()>;
}

struct SystemFfmpegBackend {
    settings: EncodeSettings,
    output_path: PathBuf,
}

#[cfg(feature = "sidecar_ffmpeg")]
struct SidecarFfmpegBackend {
    settings: EncodeSettings,
    output_path: PathBuf,
}

impl FfmpegPipe {
    pub fn spawn(settings: &EncodeSettings, output_path: &Path) -> Result<Self> {
        Self::spawn_with_mode(settings, output_path, FfmpegMode::Auto)
    }

    pub fn spawn_with_mode(
        settings: &EncodeSettings,
        output_path: &Path,
        mode: FfmpegMode,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);
        let backend = select_backend(mode, settings.clone(), output_path.to_path_buf())?;
        let worker_name = format!("codereel-ffmpeg-encoder-{}", backend.mode_label());

        let worker = thread::Builder::new()
            .name(worker_name)
            .spawn(move || backend.run(receiver))
            .context("failed to spawn ffmpeg writer thread")?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn write_frame(&self, rgba_frame: Vec<u8>) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("encoder has already been finalized"))?;
        sender
            .send(rgba_frame)
            .map_err(|_| anyhow!("failed to enqueue frame for ffmpeg"))
    }

    pub fn finish(mut self) -> Result<()> {
        drop(self.sender.take());

        let handle = self
            .worker
            .take()
            .ok_or_else(|| anyhow!("ffmpeg worker thread missing"))?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("ffmpeg worker thread panicked")),
        }
    }
}

fn select_backend(
    mode: FfmpegMode,
    settings: EncodeSettings,
    output_path: PathBuf,
) -> Result<Box<dyn VideoEncoderBackend>> {
    match mode {
        FfmpegMode::Auto | FfmpegMode::System => Ok(Box::new(SystemFfmpegBackend {
            settings,
            output_path,
        })),
        FfmpegMode::Sidecar => {
            #[cfg(feature = "sidecar_ffmpeg")]
            {
                Ok(Box::new(SidecarFfmpegBackend {
                    settings,
                    output_path,
                }))
            }
            #[cfg(not(feature = "sidecar_ffmpeg"))]
            {
                let _ = (settings, output_path);
                Err(anyhow!(
                    "ffmpeg sidecar mode requested but codereel was built without \
                     `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`."
                ))
            }
        }
    }
}

impl VideoEncoderBackend for SystemFfmpegBackend {
    fn mode_label(&self) -> &'static str {
        "system"
    }

    fn run(self: Box<Self>, receiver: mpsc::Receiver<Vec<u8>>) -> Result<()> {
        run_ffmpeg_process(
            Path::new("ffmpeg"),
            receiver,
            &self.settings,
            &self.output_path,
            self.mode_label(),
        )
    }
}

#[cfg(feature = "sidecar_ffmpeg")]
impl VideoEncoderBackend for SidecarFfmpegBackend {
    fn mode_label(&self) -> &'static str {
        "sidecar"
    }

    fn run(self: Box<Self>, receiver: mpsc::Receiver<Vec<u8>>) -> Result<()> {
        let path = sidecar_ffmpeg_path()?;
        run_ffmpeg_process(
            &path,
            receiver,
            &self.settings,
            &self.output_path,
            self.mode_label(),
        )
    }
}

#[cfg(feature = "sidecar_ffmpeg")]
fn sidecar_ffmpeg_path() -> Result<PathBuf> {
    let path = ffmpeg_sidecar::paths::ffmpeg_path();
    if !path.exists() {
        ffmpeg_sidecar::download::auto_download()
            .context("failed to auto-download ffmpeg sidecar binary")?;
    }
    Ok(path)
}

/// Binary used for one-shot invocations such as concat.
pub fn ffmpeg_binary(mode: FfmpegMode) -> Result<PathBuf> {
    match mode {
        FfmpegMode::Auto | FfmpegMode::System => Ok(PathBuf::from("ffmpeg")),
        FfmpegMode::Sidecar => {
            #[cfg(feature = "sidecar_ffmpeg")]
            {
                sidecar_ffmpeg_path()
            }
            #[cfg(not(feature = "sidecar_ffmpeg"))]
            {
                Err(anyhow!(
                    "ffmpeg sidecar mode requested but codereel was built without `sidecar_ffmpeg`."
                ))
            }
        }
    }
}

fn check_output_path(output_path: &Path) -> Result<()> {
    let path_str = output_path.to_string_lossy();
    if path_str.len() > 1024 {
        bail!("Output path is suspiciously long");
    }
    if path_str.chars().any(|c| c.is_control()) {
        bail!("Output path contains invalid control characters");
    }
    Ok(())
}

fn spawn_error(
    error: std::io::Error,
    ffmpeg_path: &Path,
    mode_label: &str,
    args: &[String],
) -> anyhow::Error {
    if error.kind() == ErrorKind::NotFound {
        anyhow!(CodedError::external_tool(format!(
            "ffmpeg executable not found (mode={mode_label}, resolved_path={}). \
             Install ffmpeg (system mode) or use sidecar mode with `--features sidecar_ffmpeg`.",
            ffmpeg_path.display()
        )))
    } else {
        anyhow!(CodedError::external_tool(format!(
            "failed to spawn ffmpeg process \
             (mode={mode_label}, resolved_path={}, args='{}'): {error}",
            ffmpeg_path.display(),
            args.join(" ")
        )))
    }
}

fn run_ffmpeg_process(
    ffmpeg_path: &Path,
    receiver: mpsc::Receiver<Vec<u8>>,
    settings: &EncodeSettings,
    output_path: &Path,
    mode_label: &str,
) -> Result<()> {
    check_output_path(output_path)?;

    let args = ffmpeg_args(settings, output_path);
    let mut child = Command::new(ffmpeg_path)
        .args(args.iter().map(String::as_str))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| spawn_error(error, ffmpeg_path, mode_label, &args))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;
    let mut stderr_pipe = child.stderr.take();

    let mut frames = 0_u64;
    while let Ok(frame) = receiver.recv() {
        stdin
            .write_all(&frame)
            .context("failed to write frame to ffmpeg stdin")?;
        frames += 1;
    }

    stdin.flush().context("failed to flush ffmpeg stdin")?;
    drop(stdin);

    let status = child.wait().context("failed waiting for ffmpeg process")?;
    let stderr_tail = read_stderr_tail(&mut stderr_pipe)?;
    if !status.success() {
        bail!(CodedError::external_tool(format!(
            "ffmpeg failed with status {status} (mode={mode_label}, resolved_path={})",
            ffmpeg_path.display()
        ))
        .with_details(json!({
            "args": args.join(" "),
            "stderr_tail": stderr_tail
        })));
    }

    debug!(frames, output = %output_path.display(), "encoded section");
    Ok(())
}

fn ffmpeg_args(settings: &EncodeSettings, output_path: &Path) -> Vec<String> {
    let mut args = ffmpeg_rawvideo_input_args(&settings.size(), &settings.fps.to_string());
    args.extend(ffmpeg_h264_output_args(settings));
    args.extend(ffmpeg_container_output_args(output_path));

    args.push(output_path.to_string_lossy().into_owned());
    args
}

pub fn ffmpeg_rawvideo_input_args(size: &str, fps: &str) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgba".to_owned(),
        "-s:v".to_owned(),
        size.to_owned(),
        "-r".to_owned(),
        fps.to_owned(),
        "-i".to_owned(),
        "-".to_owned(),
        "-an".to_owned(),
    ]
}

pub fn ffmpeg_h264_output_args(settings: &EncodeSettings) -> Vec<String> {
    vec![
        "-c:v".to_owned(),
        "libx264".to_owned(),
        "-preset".to_owned(),
        settings.preset.to_owned(),
        "-crf".to_owned(),
        settings.crf.to_string(),
        "-pix_fmt".to_owned(),
        "yuv420p".to_owned(),
    ]
}

pub fn ffmpeg_container_output_args(output_path: &Path) -> Vec<String> {
    let ext = output_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if matches!(ext.as_str(), "mov" | "mp4" | "m4v") {
        vec!["-movflags".to_owned(), "+faststart".to_owned()]
    } else {
        Vec::new()
    }
}

/// `partial_movie_files/section_00003.mp4`
pub fn section_path(work_dir: &Path, index: usize) -> PathBuf {
    work_dir
        .join(PARTIAL_DIR_NAME)
        .join(format!("section_{index:05}.mp4"))
}

/// Concat-demuxer list body; single quotes in paths are escaped.
pub fn concat_list(sections: &[PathBuf]) -> String {
    let mut body = String::new();
    for section in sections {
        let escaped = section.to_string_lossy().replace('\'', "'\\''");
        body.push_str(&format!("file '{escaped}'\n"));
    }
    body
}

/// Stream-copies `sections` into `output_path`, then deletes the section files.
pub fn concat_sections(
    ffmpeg_path: &Path,
    sections: &[PathBuf],
    list_path: &Path,
    output_path: &Path,
) -> Result<()> {
    if sections.is_empty() {
        bail!("nothing to concatenate");
    }
    check_output_path(output_path)?;
    fs::write(list_path, concat_list(sections))
        .with_context(|| format!("failed to write concat list '{}'", list_path.display()))?;

    let args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "concat".to_owned(),
        "-safe".to_owned(),
        "0".to_owned(),
        "-i".to_owned(),
        list_path.to_string_lossy().into_owned(),
        "-c".to_owned(),
        "copy".to_owned(),
        output_path.to_string_lossy().into_owned(),
    ];
    let output = Command::new(ffmpeg_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|error| spawn_error(error, ffmpeg_path, "concat", &args))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(CodedError::external_tool(format!(
            "ffmpeg concat failed with status {}",
            output.status
        ))
        .with_details(json!({
            "args": args.join(" "),
            "stderr_tail": last_n_chars(&stderr, 500)
        })));
    }

    for section in sections {
        fs::remove_file(section)
            .with_context(|| format!("failed to remove section '{}'", section.display()))?;
    }
    if let Err(error) = fs::remove_file(list_path) {
        warn!(path = %list_path.display(), %error, "failed to remove concat list");
    }
    Ok(())
}

fn read_stderr_tail(stderr: &mut Option<std::process::ChildStderr>) -> Result<String> {
    let Some(mut pipe) = stderr.take() else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)
        .context("failed reading ffmpeg stderr")?;
    let text = String::from_utf8_lossy(&buf).to_string();
    Ok(last_n_chars(&text, 500))
}

pub fn last_n_chars(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars().collect::<Vec<_>>();
    if chars.len() > max_chars {
        chars = chars[chars.len().saturating_sub(max_chars)..].to_vec();
    }
    chars.into_iter().collect::<String>().trim().to_owned()
}
