use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::PersistenceError;
use crate::ledger::{HistoryLedger, HistoryRecord};

pub const HISTORY_HEADER: [&str; 3] = ["timestamp_utc", "url", "file_size_mb"];

/// Renders records as CSV, header included even when there are no rows.
pub fn to_csv(records: &[HistoryRecord]) -> Result<Vec<u8>, PersistenceError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(HISTORY_HEADER)?;
    for record in records {
        writer.serialize(record)?;
    }

    writer
        .into_inner()
        .map_err(|err| PersistenceError::Serialize(err.into_error().into()))
}

/// Rewrites `path` with the complete current ledger. Returns the row count.
///
/// The content goes to a uniquely named sibling file first and is renamed
/// into place, so readers see either the previous flush or this one.
pub async fn flush(ledger: &HistoryLedger, path: &Path) -> Result<usize, PersistenceError> {
    let records = ledger.snapshot();
    let content = to_csv(&records)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    let tmp = PathBuf::from(tmp);

    let io_err = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&tmp, &content).await.map_err(io_err)?;
    if let Err(err) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(io_err(err));
    }

    debug!(path = %path.display(), rows = records.len(), "history flushed");
    Ok(records.len())
}

pub async fn load_history(path: &Path) -> Result<Vec<HistoryRecord>, PersistenceError> {
    let content = fs::read(path).await.map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut reader = csv::Reader::from_reader(content.as_slice());
    let records = reader
        .deserialize()
        .collect::<Result<Vec<HistoryRecord>, _>>()
        .map_err(|source| PersistenceError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(records)
}

/// A history file shared by every batch of one downloader.
///
/// Flushes through it are serialized, so a later snapshot is never replaced
/// by an earlier one.
pub struct HistoryFile {
    ledger: HistoryLedger,
    path: PathBuf,
    gate: Mutex<()>,
}

impl HistoryFile {
    pub fn new(ledger: HistoryLedger, path: PathBuf) -> Self {
        Self {
            ledger,
            path,
            gate: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn flush(&self) -> Result<usize, PersistenceError> {
        let _guard = self.gate.lock().await;
        flush(&self.ledger, &self.path).await
    }
}

/// Background loop flushing a history file every `interval` until finished.
///
/// Dropping it stops the loop without the final flush.
pub struct Autosave {
    file: Arc<HistoryFile>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl Autosave {
    pub fn spawn(file: Arc<HistoryFile>, interval: Duration) -> Self {
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_autosave(file.clone(), interval, stop.clone()));

        Self { file, stop, task }
    }

    /// Stops the loop, waits for an in-progress flush, then flushes once more.
    pub async fn finish(mut self) -> Result<usize, PersistenceError> {
        self.stop.cancel();
        if let Err(err) = (&mut self.task).await {
            error!(error = %err, "autosave task ended abnormally");
        }

        let rows = self.file.flush().await?;
        info!(path = %self.file.path().display(), rows, "final history flush");
        Ok(rows)
    }
}

impl Drop for Autosave {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run_autosave(file: Arc<HistoryFile>, period: Duration, stop: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = file.flush().await {
                    error!(error = %err, "periodic history flush failed");
                }
            }
        }
    }
}
