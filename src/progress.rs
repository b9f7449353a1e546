//! Render progress estimated from what the worker has written to disk.
//!
//! Phases: per-line token artifacts fill 0-20%, encoded sections 20-90%, and
//! the final file 95%. 100% is published only by the caller once the job has
//! succeeded. Published values never go down.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::encoding::PARTIAL_DIR_NAME;
use crate::pipeline::{PLAN_FILE_NAME, TOKENS_DIR_NAME};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(1500);

const TOKENS_PHASE_END: f32 = 20.0;
const SECTIONS_PHASE_END: f32 = 90.0;
const FINAL_FILE_PERCENT: u8 = 95;

/// Shared task-id -> percent map.
#[derive(Debug, Clone, Default)]
pub struct ProgressBoard {
    inner: Arc<Mutex<HashMap<String, u8>>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `percent` unless a higher value is already recorded. Returns the
    /// value now on the board.
    pub fn publish(&self, task_id: &str, percent: u8) -> u8 {
        let percent = percent.min(100);
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = map.entry(task_id.to_owned()).or_insert(0);
        if percent > *entry {
            *entry = percent;
        }
        *entry
    }

    pub fn get(&self, task_id: &str) -> Option<u8> {
        let map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(task_id).copied()
    }

    pub fn remove(&self, task_id: &str) {
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.remove(task_id);
    }
}

/// What a complete render is expected to leave behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressExpectation {
    pub work_dir: PathBuf,
    pub final_path: PathBuf,
    /// Retained line count if known; otherwise read from the plan artifact.
    pub line_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PlanCounts {
    line_count: usize,
    section_count: usize,
}

fn read_plan_counts(work_dir: &Path) -> Option<PlanCounts> {
    let body = fs::read(work_dir.join(PLAN_FILE_NAME)).ok()?;
    serde_json::from_slice(&body).ok()
}

fn count_files(dir: &Path, matches: impl Fn(&str) -> bool) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .filter(|entry| matches(&entry.file_name().to_string_lossy()))
        .count()
}

fn phase(done: usize, total: usize, from: f32, to: f32) -> f32 {
    if total == 0 {
        return from;
    }
    let fraction = (done as f32 / total as f32).min(1.0);
    from + (to - from) * fraction
}

/// Point-in-time estimate from on-disk artifacts; never 100.
pub fn estimate_progress(expectation: &ProgressExpectation) -> u8 {
    if expectation.final_path.is_file() {
        return FINAL_FILE_PERCENT;
    }
    let counts = read_plan_counts(&expectation.work_dir);
    let token_files = count_files(&expectation.work_dir.join(TOKENS_DIR_NAME), |name| {
        name.starts_with("line_") && name.ends_with(".json")
    });
    let section_files = count_files(&expectation.work_dir.join(PARTIAL_DIR_NAME), |name| {
        name.ends_with(".mp4")
    });

    let percent = if section_files > 0 {
        // The section being encoded is still open, so count only finished ones.
        let total = counts.as_ref().map_or(section_files + 1, |counts| counts.section_count);
        phase(section_files.saturating_sub(1), total, TOKENS_PHASE_END, SECTIONS_PHASE_END)
    } else {
        let total = counts
            .as_ref()
            .map(|counts| counts.line_count)
            .or(expectation.line_count)
            .unwrap_or(token_files);
        phase(token_files, total, 0.0, TOKENS_PHASE_END)
    };
    (percent.floor() as u8).min(FINAL_FILE_PERCENT)
}

/// Background poller publishing [`estimate_progress`] for one task.
pub struct ProgressPoller {
    stop: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ProgressPoller {
    pub fn start(
        board: ProgressBoard,
        task_id: String,
        expectation: ProgressExpectation,
        interval: Duration,
    ) -> Result<Self> {
        let interval = interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        let (stop, stopped) = mpsc::channel::<()>();
        let worker = thread::Builder::new()
            .name(format!("codereel-progress-{task_id}"))
            .spawn(move || loop {
                let percent = board.publish(&task_id, estimate_progress(&expectation));
                debug!(task = %task_id, percent, "progress");
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .context("failed to spawn progress poller")?;
        Ok(Self {
            stop: Some(stop),
            worker: Some(worker),
        })
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("progress poller thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for ProgressPoller {
    fn drop(&mut self) {
        if let Err(error) = self.shutdown() {
            warn!(%error, "progress poller did not stop cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expectation(dir: &Path) -> ProgressExpectation {
        ProgressExpectation {
            work_dir: dir.join("work"),
            final_path: dir.join("out.mp4"),
            line_count: Some(10),
        }
    }

    #[test]
    fn board_never_regresses() {
        let board = ProgressBoard::new();
        assert_eq!(board.publish("t", 40), 40);
        assert_eq!(board.publish("t", 10), 40);
        assert_eq!(board.publish("t", 250), 100);
        assert_eq!(board.get("t"), Some(100));
        assert_eq!(board.get("other"), None);
    }

    #[test]
    fn phases_advance_with_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let expect = expectation(dir.path());
        assert_eq!(estimate_progress(&expect), 0);

        let tokens = expect.work_dir.join(TOKENS_DIR_NAME);
        fs::create_dir_all(&tokens).expect("mkdir");
        for line in 1..=5 {
            fs::write(tokens.join(format!("line_{line}.json")), "[]").expect("write");
        }
        assert_eq!(estimate_progress(&expect), 10);

        fs::write(
            expect.work_dir.join(PLAN_FILE_NAME),
            r#"{"line_count": 10, "section_count": 5}"#,
        )
        .expect("plan");
        let partial = expect.work_dir.join(PARTIAL_DIR_NAME);
        fs::create_dir_all(&partial).expect("mkdir");
        for index in 0..3 {
            fs::write(partial.join(format!("section_{index:05}.mp4")), b"x").expect("write");
        }
        // two finished of five: 20 + 70 * 0.4
        assert_eq!(estimate_progress(&expect), 48);

        fs::write(&expect.final_path, b"video").expect("write");
        assert_eq!(estimate_progress(&expect), 95);
    }

    #[test]
    fn poller_publishes_and_stops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let expect = expectation(dir.path());
        fs::write(&expect.final_path, b"video").expect("write");
        let board = ProgressBoard::new();
        let poller =
            ProgressPoller::start(board.clone(), "task".to_owned(), expect, MIN_POLL_INTERVAL)
                .expect("start");
        let mut seen = None;
        for _ in 0..50 {
            seen = board.get("task");
            if seen.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        poller.stop().expect("stop");
        assert_eq!(seen, Some(95));
    }
}
