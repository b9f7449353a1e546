//! Upload-to-video boundary: submit a script, watch progress, fetch results.
//!
//! Everything lives under one root directory:
//!
//! ```text
//! root/uploads/{task}/      uploaded script + resolved config (removed after render)
//! root/work/{task}/         worker scratch (removed by the job)
//! root/media/{task}/        worker media root (removed after the output is moved)
//! root/outputs/{video}.mp4  finished videos + {video}.json records
//! root/cache/{key}.mp4      content-addressed copies
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cache::{cache_key, EvictionReport, OutputCache, CACHE_DIR_NAME};
use crate::config::{parse_structured_json, to_structured_json};
use crate::encoding::FfmpegMode;
use crate::error_codes::{CodedError, CONFIG_INVALID, CONFIG_PARSE};
use crate::job::{RenderJob, WorkDirGuard, WorkerCommand};
use crate::progress::{ProgressBoard, ProgressExpectation, ProgressPoller, DEFAULT_POLL_INTERVAL};
use crate::quality::output_video_path;
use crate::schema::RenderConfig;

const UPLOADS_DIR_NAME: &str = "uploads";
const WORK_DIR_NAME: &str = "work";
const MEDIA_DIR_NAME: &str = "media";
const OUTPUTS_DIR_NAME: &str = "outputs";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub worker: WorkerCommand,
    pub font: Option<PathBuf>,
    pub strict_groups: bool,
    pub ffmpeg_mode: FfmpegMode,
    pub poll_interval: Duration,
    /// Overrides the quality-dependent render timeout.
    pub timeout: Option<Duration>,
}

impl ServiceOptions {
    pub fn new(worker: WorkerCommand) -> Self {
        Self {
            worker,
            font: None,
            strict_groups: false,
            ffmpeg_mode: FfmpegMode::Auto,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub video_id: String,
    pub filename: String,
    pub task_id: String,
    pub cached: bool,
}

/// An accepted upload waiting for [`RenderService::complete`].
#[derive(Debug)]
pub struct PendingRender {
    pub task_id: String,
    pub video_id: String,
    pub filename: String,
    key: String,
    config: RenderConfig,
    upload_dir: PathBuf,
    source: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub filename: String,
    pub task_id: String,
    pub size_bytes: u64,
    /// RFC 3339.
    pub created_at: String,
    pub cached: bool,
}

pub struct RenderService {
    root: PathBuf,
    options: ServiceOptions,
    board: ProgressBoard,
    cache: OutputCache,
    counter: AtomicU64,
}

impl RenderService {
    pub fn new(root: impl Into<PathBuf>, options: ServiceOptions) -> Self {
        let root = root.into();
        let cache = OutputCache::new(root.join(CACHE_DIR_NAME));
        Self {
            root,
            options,
            board: ProgressBoard::new(),
            cache,
            counter: AtomicU64::new(0),
        }
    }

    pub fn with_cache(mut self, cache: OutputCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn board(&self) -> ProgressBoard {
        self.board.clone()
    }

    fn outputs_dir(&self) -> PathBuf {
        self.root.join(OUTPUTS_DIR_NAME)
    }

    fn next_id(&self, kind: &str) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update(now.to_rfc3339().as_bytes());
        hasher.update(now.timestamp_subsec_nanos().to_le_bytes());
        hasher.update(sequence.to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        hasher.finalize()[..8]
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }

    /// Validates an upload and registers its task on the progress board. The
    /// returned task id can be polled while [`RenderService::complete`] runs.
    pub fn accept(
        &self,
        file_name: &str,
        bytes: &[u8],
        config_json: &str,
    ) -> Result<PendingRender> {
        let file_name = upload_file_name(file_name)?;
        let task_id = self.next_id("task");
        let upload_dir = self.root.join(UPLOADS_DIR_NAME).join(&task_id);
        let script_path = upload_dir.join(&file_name);

        let config = parse_request_config(config_json, &script_path)?;
        config.validate()?;
        let key = cache_key(bytes, &config)?;
        self.board.publish(&task_id, 0);
        debug!(task = %task_id, key = %key, "accepted upload");
        Ok(PendingRender {
            video_id: self.next_id("video"),
            filename: config.output_file_name(),
            task_id,
            key,
            config,
            upload_dir,
            source: bytes.to_vec(),
        })
    }

    /// Renders an accepted upload, or serves a cached copy. Blocks until the
    /// video is stored. A failed task is dropped from the progress board.
    pub fn complete(&self, pending: PendingRender) -> Result<SubmitReceipt> {
        let task_id = pending.task_id.clone();
        let result = self.render_pending(pending);
        if let Err(error) = &result {
            self.board.remove(&task_id);
            warn!(task = %task_id, error = %format!("{error:#}"), "render task failed");
        }
        result
    }

    /// [`RenderService::accept`] followed by [`RenderService::complete`].
    pub fn submit(
        &self,
        file_name: &str,
        bytes: &[u8],
        config_json: &str,
    ) -> Result<SubmitReceipt> {
        let pending = self.accept(file_name, bytes, config_json)?;
        self.complete(pending)
    }

    fn render_pending(&self, pending: PendingRender) -> Result<SubmitReceipt> {
        let PendingRender {
            task_id,
            video_id,
            filename,
            key,
            config,
            upload_dir,
            source,
        } = pending;
        let _upload_cleanup = WorkDirGuard::new(&upload_dir);

        if let Err(error) = self.cache.evict(Utc::now()) {
            warn!(error = %format!("{error:#}"), "cache eviction failed");
        }
        let (video, cached) = match self.cache.lookup(&key) {
            Some(hit) => {
                info!(task = %task_id, key = %key, "serving cached render");
                (hit, true)
            }
            None => {
                let media_root = self.root.join(MEDIA_DIR_NAME).join(&task_id);
                let _media_cleanup = WorkDirGuard::new(&media_root);
                let produced =
                    self.run_render(&task_id, &config, &upload_dir, &media_root, &source)?;
                (self.cache.store(&key, &produced)?, false)
            }
        };

        let record = self.store_output(&video_id, &task_id, &filename, &video, cached)?;
        self.board.publish(&task_id, 100);
        info!(task = %task_id, video = %record.video_id, cached, "video ready");
        Ok(SubmitReceipt {
            video_id,
            filename,
            task_id,
            cached,
        })
    }

    /// Saves the upload, runs the worker and returns the produced video.
    fn run_render(
        &self,
        task_id: &str,
        config: &RenderConfig,
        upload_dir: &Path,
        media_root: &Path,
        source: &[u8],
    ) -> Result<PathBuf> {
        fs::create_dir_all(upload_dir)
            .with_context(|| format!("failed to create '{}'", upload_dir.display()))?;
        fs::write(&config.script_path, source).with_context(|| {
            format!("failed to save upload '{}'", config.script_path.display())
        })?;
        let config_path = upload_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, to_structured_json(config)?)
            .with_context(|| format!("failed to write '{}'", config_path.display()))?;

        let frame = config.quality.frame_spec(config.orientation);
        let produced = output_video_path(media_root, frame, &config.output_file_name());
        let job = RenderJob {
            worker: self.options.worker.clone(),
            config_path,
            media_root: media_root.to_path_buf(),
            work_dir: self.root.join(WORK_DIR_NAME).join(task_id),
            font: self.options.font.clone(),
            strict_groups: self.options.strict_groups,
            ffmpeg_mode: self.options.ffmpeg_mode,
            timeout: self
                .options
                .timeout
                .unwrap_or_else(|| config.quality.render_timeout()),
        };
        let poller = ProgressPoller::start(
            self.board.clone(),
            task_id.to_owned(),
            ProgressExpectation {
                work_dir: job.work_dir.clone(),
                final_path: produced.clone(),
                line_count: None,
            },
            self.options.poll_interval,
        )?;
        let result = job.run();
        poller.stop()?;
        result?;
        if !produced.is_file() {
            bail!(CodedError::external_tool("render worker produced no video")
                .with_details(json!({ "expected": produced.display().to_string() })));
        }
        Ok(produced)
    }

    fn store_output(
        &self,
        video_id: &str,
        task_id: &str,
        filename: &str,
        video: &Path,
        cached: bool,
    ) -> Result<VideoRecord> {
        let dir = self.outputs_dir();
        fs::create_dir_all(&dir).with_context(|| format!("failed to create '{}'", dir.display()))?;
        let target = dir.join(format!("{video_id}.mp4"));
        let size_bytes = fs::copy(video, &target)
            .with_context(|| format!("failed to store '{}'", target.display()))?;
        let record = VideoRecord {
            video_id: video_id.to_owned(),
            filename: filename.to_owned(),
            task_id: task_id.to_owned(),
            size_bytes,
            created_at: Utc::now().to_rfc3339(),
            cached,
        };
        let record_path = dir.join(format!("{video_id}.json"));
        let body = serde_json::to_vec_pretty(&record).context("failed to serialize video record")?;
        fs::write(&record_path, body)
            .with_context(|| format!("failed to write '{}'", record_path.display()))?;
        Ok(record)
    }

    pub fn progress(&self, task_id: &str) -> Option<u8> {
        self.board.get(task_id)
    }

    /// Path of a stored video; the file stays in place.
    pub fn stream(&self, video_id: &str) -> Result<PathBuf> {
        let path = self.outputs_dir().join(format!("{}.mp4", checked_video_id(video_id)?));
        if !path.is_file() {
            bail!(not_found(video_id));
        }
        Ok(path)
    }

    /// Returns the video bytes, then clears every stored output.
    pub fn download(&self, video_id: &str) -> Result<Vec<u8>> {
        let path = self.stream(video_id)?;
        let bytes =
            fs::read(&path).with_context(|| format!("failed to read '{}'", path.display()))?;
        let dir = self.outputs_dir();
        if let Err(error) = fs::remove_dir_all(&dir) {
            warn!(dir = %dir.display(), %error, "failed to clear outputs after download");
        }
        debug!(video = video_id, bytes = bytes.len(), "downloaded");
        Ok(bytes)
    }

    /// Newest first.
    pub fn list_videos(&self) -> Result<Vec<VideoRecord>> {
        let dir = self.outputs_dir();
        let Ok(listing) = fs::read_dir(&dir) else {
            return Ok(Vec::new());
        };
        let mut records = Vec::new();
        for item in listing {
            let path = item
                .with_context(|| format!("failed to list '{}'", dir.display()))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let body =
                fs::read(&path).with_context(|| format!("failed to read '{}'", path.display()))?;
            match serde_json::from_slice::<VideoRecord>(&body) {
                Ok(record) if path.with_extension("mp4").is_file() => records.push(record),
                Ok(_) => {}
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable video record")
                }
            }
        }
        records.sort_by_key(|record| std::cmp::Reverse(created_at(record)));
        Ok(records)
    }

    pub fn delete_video(&self, video_id: &str) -> Result<()> {
        let path = self.stream(video_id)?;
        fs::remove_file(&path).with_context(|| format!("failed to delete '{}'", path.display()))?;
        let record = path.with_extension("json");
        if record.exists() {
            fs::remove_file(&record)
                .with_context(|| format!("failed to delete '{}'", record.display()))?;
        }
        info!(video = video_id, "deleted video");
        Ok(())
    }

    pub fn evict_cache(&self) -> Result<EvictionReport> {
        self.cache.evict(Utc::now())
    }
}

fn created_at(record: &VideoRecord) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&record.created_at)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

fn not_found(video_id: &str) -> CodedError {
    CodedError::not_found(format!("video '{video_id}' not found"))
        .with_details(json!({ "video_id": video_id }))
}

fn checked_video_id(video_id: &str) -> Result<&str> {
    if video_id.is_empty() || !video_id.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(anyhow!(not_found(video_id)));
    }
    Ok(video_id)
}

/// Request configs may omit the script path; the saved upload replaces it.
fn parse_request_config(config_json: &str, script_path: &Path) -> Result<RenderConfig> {
    let mut value: Value = serde_json::from_str(config_json).map_err(|error| {
        anyhow!(CodedError::configuration(
            CONFIG_PARSE,
            format!("invalid configuration JSON: {error}"),
        ))
    })?;
    let Value::Object(map) = &mut value else {
        bail!(CodedError::configuration(
            CONFIG_PARSE,
            "configuration must be a JSON object"
        ));
    };
    map.remove("scriptPath");
    map.insert(
        "script_path".to_owned(),
        Value::String(script_path.to_string_lossy().into_owned()),
    );
    parse_structured_json(&value.to_string())
}

/// Final path component of the client-supplied name.
fn upload_file_name(raw: &str) -> Result<String> {
    Path::new(raw.trim())
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            anyhow!(CodedError::configuration(
                CONFIG_INVALID,
                format!("invalid upload file name '{raw}'"),
            ))
        })
}
