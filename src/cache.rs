//! Content-addressed store of finished videos.
//!
//! Keys hash the uploaded source bytes together with the canonical config,
//! so the same script rendered with the same settings is served from disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::lexer::Language;
use crate::schema::RenderConfig;

pub const CACHE_DIR_NAME: &str = "cache";
pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Config as sorted-key JSON. `script_path` differs per upload and is dropped,
/// but the language its extension selects is kept since it decides coloring.
pub fn canonical_config_json(config: &RenderConfig) -> Result<String> {
    let mut value =
        serde_json::to_value(config).context("failed to serialize config for cache key")?;
    if let Value::Object(map) = &mut value {
        map.remove("script_path");
        let language = Language::from_path(&config.script_path);
        map.insert(
            "language".to_owned(),
            serde_json::to_value(language).context("failed to serialize language")?,
        );
    }
    serde_json::to_string(&value).context("failed to serialize config for cache key")
}

pub fn cache_key(file_bytes: &[u8], config: &RenderConfig) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(file_bytes);
    hasher.update(canonical_config_json(config)?.as_bytes());
    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub expired: Vec<String>,
    pub over_budget: Vec<String>,
    pub remaining_bytes: u64,
}

impl EvictionReport {
    pub fn removed(&self) -> usize {
        self.expired.len() + self.over_budget.len()
    }
}

#[derive(Debug, Clone)]
pub struct OutputCache {
    dir: PathBuf,
    max_age: Duration,
    max_total_bytes: u64,
}

impl OutputCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_age: Duration::days(DEFAULT_MAX_AGE_DAYS),
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }

    pub fn with_limits(mut self, max_age: Duration, max_total_bytes: u64) -> Self {
        self.max_age = max_age;
        self.max_total_bytes = max_total_bytes;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.mp4"))
    }

    /// Hit only for an entry younger than the age limit.
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        self.lookup_at(key, Utc::now())
    }

    pub fn lookup_at(&self, key: &str, now: DateTime<Utc>) -> Option<PathBuf> {
        let path = self.entry_path(key);
        let meta = fs::metadata(&path).ok().filter(|meta| meta.is_file())?;
        let modified = DateTime::<Utc>::from(meta.modified().ok()?);
        if now - modified > self.max_age {
            debug!(key, "cached video expired");
            return None;
        }
        Some(path)
    }

    pub fn store(&self, key: &str, video: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create cache dir '{}'", self.dir.display()))?;
        let path = self.entry_path(key);
        fs::copy(video, &path).with_context(|| {
            format!("failed to cache '{}' as '{}'", video.display(), path.display())
        })?;
        debug!(key, "cached video");
        Ok(path)
    }

    /// Entries sorted oldest first.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let Ok(listing) = fs::read_dir(&self.dir) else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        for item in listing {
            let item = item.with_context(|| format!("failed to list '{}'", self.dir.display()))?;
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("mp4") {
                continue;
            }
            let meta = item
                .metadata()
                .with_context(|| format!("failed to stat '{}'", path.display()))?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta
                .modified()
                .with_context(|| format!("no mtime for '{}'", path.display()))?;
            let key = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            entries.push(CacheEntry {
                key,
                path,
                size: meta.len(),
                modified: DateTime::<Utc>::from(modified),
            });
        }
        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.key.cmp(&b.key)));
        Ok(entries)
    }

    /// Drops entries older than the age limit, then the oldest survivors until
    /// the total size fits the budget.
    pub fn evict(&self, now: DateTime<Utc>) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();
        let mut kept = Vec::new();
        for entry in self.entries()? {
            if now - entry.modified > self.max_age {
                remove_entry(&entry)?;
                report.expired.push(entry.key);
            } else {
                kept.push(entry);
            }
        }

        let mut total = kept.iter().map(|entry| entry.size).sum::<u64>();
        for entry in &kept {
            if total <= self.max_total_bytes {
                break;
            }
            remove_entry(entry)?;
            total = total.saturating_sub(entry.size);
            report.over_budget.push(entry.key.clone());
        }
        report.remaining_bytes = total;
        if report.removed() > 0 {
            info!(
                expired = report.expired.len(),
                over_budget = report.over_budget.len(),
                remaining_bytes = total,
                "evicted cached videos"
            );
        }
        Ok(report)
    }
}

fn remove_entry(entry: &CacheEntry) -> Result<()> {
    fs::remove_file(&entry.path)
        .with_context(|| format!("failed to evict '{}'", entry.path.display()))
}
