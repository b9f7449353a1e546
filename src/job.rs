//! Runs one render in a child `codereel render` process.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::encoding::{last_n_chars, FfmpegMode};
use crate::error_codes::CodedError;

const WAIT_POLL: Duration = Duration::from_millis(100);
const STDERR_TAIL_CHARS: usize = 2000;

/// Program plus any arguments placed before the `render` subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub leading_args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// The running executable, which carries the `render` subcommand.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().context("failed to locate codereel executable")?;
        Ok(Self::new(program))
    }
}

#[derive(Debug, Clone)]
pub struct RenderJob {
    pub worker: WorkerCommand,
    pub config_path: PathBuf,
    pub media_root: PathBuf,
    pub work_dir: PathBuf,
    pub font: Option<PathBuf>,
    pub strict_groups: bool,
    pub ffmpeg_mode: FfmpegMode,
    pub timeout: Duration,
}

impl RenderJob {
    pub fn args(&self) -> Vec<String> {
        let mut args = self.worker.leading_args.clone();
        args.push("render".to_owned());
        args.push(self.config_path.to_string_lossy().into_owned());
        args.push("--media-root".to_owned());
        args.push(self.media_root.to_string_lossy().into_owned());
        args.push("--work-dir".to_owned());
        args.push(self.work_dir.to_string_lossy().into_owned());
        if let Some(font) = &self.font {
            args.push("--font".to_owned());
            args.push(font.to_string_lossy().into_owned());
        }
        if self.strict_groups {
            args.push("--strict-groups".to_owned());
        }
        if self.ffmpeg_mode != FfmpegMode::Auto {
            args.push("--ffmpeg".to_owned());
            args.push(self.ffmpeg_mode.keyword().to_owned());
        }
        args
    }

    /// Waits for the child up to `timeout`. The work directory is removed on
    /// every exit path.
    pub fn run(&self) -> Result<Duration> {
        let _cleanup = WorkDirGuard::new(&self.work_dir);
        let args = self.args();
        debug!(
            program = %self.worker.program.display(),
            args = %args.join(" "),
            "spawning render worker"
        );
        let mut child = Command::new(&self.worker.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                anyhow!(CodedError::external_tool(format!(
                    "failed to spawn render worker '{}': {error}",
                    self.worker.program.display()
                )))
            })?;
        let stderr = StderrCollector::start(child.stderr.take())?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().context("failed to poll render worker")? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                kill_child(&mut child);
                // Grandchildren may still hold the pipe open; the reader is detached.
                drop(stderr);
                warn!(timeout_secs = self.timeout.as_secs_f32(), "render worker timed out");
                bail!(CodedError::render_timeout(format!(
                    "render exceeded {}s",
                    self.timeout.as_secs()
                ))
                .with_details(json!({ "timeout_secs": self.timeout.as_secs_f32() })));
            }
            thread::sleep(WAIT_POLL);
        };

        let tail = stderr.finish();
        if !status.success() {
            bail!(CodedError::external_tool(format!("render worker exited with {status}"))
                .with_details(json!({ "stderr_tail": tail })));
        }
        let elapsed = started.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "render worker finished");
        Ok(elapsed)
    }
}

fn kill_child(child: &mut Child) {
    if let Err(error) = child.kill() {
        warn!(%error, "failed to kill render worker");
    }
    let _ = child.wait();
}

/// Drains child stderr on a helper thread so the pipe never fills.
struct StderrCollector {
    handle: Option<JoinHandle<String>>,
}

impl StderrCollector {
    fn start(stderr: Option<ChildStderr>) -> Result<Self> {
        let Some(mut pipe) = stderr else {
            return Ok(Self { handle: None });
        };
        let handle = thread::Builder::new()
            .name("codereel-worker-stderr".to_owned())
            .spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                last_n_chars(&String::from_utf8_lossy(&buf), STDERR_TAIL_CHARS)
            })
            .context("failed to spawn stderr reader")?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    fn finish(self) -> String {
        self.handle
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

pub struct WorkDirGuard {
    path: PathBuf,
}

impl WorkDirGuard {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(error) = fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), %error, "failed to remove work dir");
            }
        }
    }
}
