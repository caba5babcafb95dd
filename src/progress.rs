use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use url::Url;

use crate::downloader::{TaskId, TaskState};
use crate::error::TaskError;

/// Receives per-task progress. Called from worker tasks, so it must not block.
pub trait ProgressSink: Send + Sync {
    fn on_state(&self, _id: TaskId, _state: TaskState) {}

    /// The response is open; `total_size` is what the server advertised.
    fn on_task_start(&self, _id: TaskId, _url: &Url, _total_size: Option<u64>) {}

    fn on_chunk(&self, id: TaskId, bytes: u64);

    fn on_task_done(&self, id: TaskId, outcome: Result<u64, &TaskError>);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_chunk(&self, _: TaskId, _: u64) {}

    fn on_task_done(&self, _: TaskId, _: Result<u64, &TaskError>) {}
}

/// One transient bar per download under a persistent files counter.
pub struct TerminalProgress {
    multi_progress: MultiProgress,
    overall: ProgressBar,
    bars: Mutex<HashMap<TaskId, ProgressBar>>,
    downloaded_bytes: AtomicU64,
    failed: AtomicU64,
}

impl TerminalProgress {
    pub fn new(total_files: usize) -> Self {
        let multi_progress = MultiProgress::new();
        multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));

        let overall = multi_progress.add(ProgressBar::new(total_files as u64));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{bar:40.green/white}] {pos}/{len} files {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        overall.set_prefix("Files downloaded");

        Self {
            multi_progress,
            overall,
            bars: Mutex::new(HashMap::new()),
            downloaded_bytes: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn finish(&self) {
        self.overall.finish();
    }

    fn task_bar(total_size: Option<u64>) -> ProgressBar {
        match total_size {
            Some(total) if total > 0 => {
                let pb = ProgressBar::new(total);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {eta:>4} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=>-"),
                );
                pb
            }
            _ => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} [{elapsed_precise}] {bytes:>12} {bytes_per_sec:>12} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb
            }
        }
    }
}

impl ProgressSink for TerminalProgress {
    fn on_task_start(&self, id: TaskId, url: &Url, total_size: Option<u64>) {
        let pb = self.multi_progress.add(Self::task_bar(total_size));
        let name = url
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|s| !s.is_empty())
            .unwrap_or(url.as_str());
        pb.set_message(format!("Downloading {}", name));
        self.bars.lock().insert(id, pb);
    }

    fn on_chunk(&self, id: TaskId, bytes: u64) {
        self.downloaded_bytes.fetch_add(bytes, Ordering::Relaxed);
        if let Some(pb) = self.bars.lock().get(&id) {
            pb.inc(bytes);
        }
    }

    fn on_task_done(&self, id: TaskId, outcome: Result<u64, &TaskError>) {
        if let Some(pb) = self.bars.lock().remove(&id) {
            pb.finish_and_clear();
            self.multi_progress.remove(&pb);
        }
        if outcome.is_err() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        self.overall.inc(1);
        self.overall.set_message(format!(
            "| {} | failed: {}",
            HumanBytes(self.downloaded_bytes.load(Ordering::Relaxed)),
            self.failed.load(Ordering::Relaxed)
        ));
    }
}
