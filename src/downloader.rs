use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::DownloaderConfig;
use crate::error::{CoordinatorError, DispatchError, PersistenceError, TaskError};
use crate::ledger::{HistoryLedger, HistoryRecord};
use crate::persistence::{Autosave, HistoryFile};
use crate::progress::ProgressSink;
use crate::transport::{HttpSource, TransportClient};
use crate::writer::write_stream;

/// Position of a task in its dispatch batch.
pub type TaskId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Fetching,
    Writing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: TaskId,
    pub url: Url,
    pub destination: PathBuf,
}

#[derive(Debug)]
pub struct DownloadFailure {
    pub id: TaskId,
    pub url: Url,
    pub destination: PathBuf,
    pub error: TaskError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl AggregateProgress {
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }

    pub fn is_done(&self) -> bool {
        self.finished() >= self.total
    }
}

#[derive(Debug)]
pub struct DownloadReport {
    pub completed: usize,
    pub bytes: u64,
    pub failures: Vec<DownloadFailure>,
    /// Outcome of the final flush, when a history file is configured.
    pub history: Option<Result<usize, PersistenceError>>,
}

impl DownloadReport {
    pub fn history_rows(&self) -> Option<usize> {
        self.history.as_ref().and_then(|flushed| flushed.as_ref().ok().copied())
    }
}

struct TaskSignal {
    task: DownloadTask,
    outcome: Result<u64, TaskError>,
}

struct Aggregate {
    progress: AggregateProgress,
    bytes: u64,
    failures: Vec<DownloadFailure>,
}

/// Fans a batch of URLs out to one tokio task each and records what finished.
pub struct Downloader<S> {
    transport: TransportClient<S>,
    ledger: HistoryLedger,
    history: Option<Arc<HistoryFile>>,
    sink: Arc<dyn ProgressSink>,
    config: DownloaderConfig,
    cancel: CancellationToken,
}

impl<S: HttpSource> Downloader<S> {
    pub fn new(
        source: S,
        ledger: HistoryLedger,
        sink: Arc<dyn ProgressSink>,
        config: DownloaderConfig,
    ) -> Self {
        let history = config
            .history_file
            .clone()
            .map(|path| Arc::new(HistoryFile::new(ledger.clone(), path)));

        Self {
            transport: TransportClient::new(source, config.tls_mode),
            ledger,
            history,
            sink,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    /// Cancelling this token aborts every batch dispatched by this downloader.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Starts one task per URL. Must be called from within a tokio runtime.
    ///
    /// Destinations are resolved up front and must be distinct. If a history
    /// file is configured an autosave loop starts here and is finished by
    /// [`DownloadHandle::wait`]. Concurrent batches share the same file.
    pub fn dispatch<F>(
        self: &Arc<Self>,
        urls: Vec<Url>,
        mut destination_for: F,
    ) -> Result<DownloadHandle, DispatchError>
    where
        F: FnMut(&Url) -> PathBuf,
    {
        let mut claimed: HashMap<PathBuf, Url> = HashMap::new();
        let mut tasks = Vec::with_capacity(urls.len());
        for (id, url) in urls.into_iter().enumerate() {
            let destination = destination_for(&url);
            if let Some(first) = claimed.get(&destination) {
                return Err(DispatchError::DuplicateDestination {
                    path: destination,
                    first: first.to_string(),
                    second: url.to_string(),
                });
            }
            claimed.insert(destination.clone(), url.clone());
            tasks.push(DownloadTask {
                id,
                url,
                destination,
            });
        }

        let total = tasks.len();
        let cancel = self.cancel.child_token();
        let limit = self.config.max_concurrent.map(|n| Arc::new(Semaphore::new(n)));
        let autosave = self
            .history
            .clone()
            .map(|file| Autosave::spawn(file, self.config.autosave_interval));

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        for task in tasks {
            self.sink.on_state(task.id, TaskState::Pending);

            if cancel.is_cancelled() {
                let outcome = Err(TaskError::Cancelled);
                self.finish_task(&task, &outcome);
                let _ = signal_tx.send(TaskSignal { task, outcome });
                continue;
            }

            let this = Arc::clone(self);
            let signal_tx = signal_tx.clone();
            let limit = limit.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let outcome = this.execute(&task, limit, &cancel).await;
                this.finish_task(&task, &outcome);
                let _ = signal_tx.send(TaskSignal { task, outcome });
            });
        }
        drop(signal_tx);

        let (progress_tx, progress_rx) = watch::channel(AggregateProgress {
            total,
            ..Default::default()
        });
        let aggregator = tokio::spawn(aggregate(signal_rx, total, progress_tx));

        Ok(DownloadHandle {
            progress: progress_rx,
            aggregator,
            autosave,
            cancel,
        })
    }

    async fn execute(
        &self,
        task: &DownloadTask,
        limit: Option<Arc<Semaphore>>,
        cancel: &CancellationToken,
    ) -> Result<u64, TaskError> {
        let _permit = match limit {
            Some(semaphore) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TaskError::Cancelled),
                permit = semaphore.acquire_owned() => permit.ok(),
            },
            None => None,
        };

        self.transition(task, TaskState::Fetching);
        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TaskError::Cancelled),
            fetched = self.transport.fetch_stream(&task.url) => fetched?,
        };
        let verified = handle.verified;
        self.sink.on_task_start(task.id, &task.url, handle.total_size);

        self.transition(task, TaskState::Writing);
        let sink = &self.sink;
        let bytes = write_stream(
            handle,
            &task.destination,
            self.config.chunk_size,
            cancel,
            |n| sink.on_chunk(task.id, n),
        )
        .await?;

        if !verified {
            warn!(url = %task.url, "download completed over an unverified TLS connection");
        }
        self.ledger
            .append(HistoryRecord::completed(task.url.as_str(), bytes, verified));

        Ok(bytes)
    }

    fn transition(&self, task: &DownloadTask, state: TaskState) {
        debug!(task = task.id, url = %task.url, ?state, "task state");
        self.sink.on_state(task.id, state);
    }

    fn finish_task(&self, task: &DownloadTask, outcome: &Result<u64, TaskError>) {
        match outcome {
            Ok(_) => self.transition(task, TaskState::Completed),
            Err(err) => {
                warn!(url = %task.url, error = %err, "download failed");
                self.transition(task, TaskState::Failed);
            }
        }
        self.sink.on_task_done(task.id, outcome.as_ref().copied());
    }
}

async fn aggregate(
    mut signals: mpsc::UnboundedReceiver<TaskSignal>,
    total: usize,
    progress_tx: watch::Sender<AggregateProgress>,
) -> Aggregate {
    let mut progress = AggregateProgress {
        total,
        ..Default::default()
    };
    let mut bytes = 0;
    let mut failures = Vec::new();

    while !progress.is_done() {
        let Some(TaskSignal { task, outcome }) = signals.recv().await else {
            error!(
                missing = total - progress.finished(),
                "download workers exited without signalling"
            );
            break;
        };

        match outcome {
            Ok(n) => {
                progress.completed += 1;
                bytes += n;
            }
            Err(error) => {
                progress.failed += 1;
                failures.push(DownloadFailure {
                    id: task.id,
                    url: task.url,
                    destination: task.destination,
                    error,
                });
            }
        }
        progress_tx.send_replace(progress);
    }

    failures.sort_by_key(|f| f.id);
    Aggregate {
        progress,
        bytes,
        failures,
    }
}

/// A running batch. Dropping it leaves the tasks running, stops the autosave
/// loop and skips the final flush.
pub struct DownloadHandle {
    progress: watch::Receiver<AggregateProgress>,
    aggregator: JoinHandle<Aggregate>,
    autosave: Option<Autosave>,
    cancel: CancellationToken,
}

impl DownloadHandle {
    pub fn progress(&self) -> watch::Receiver<AggregateProgress> {
        self.progress.clone()
    }

    /// Pending tasks fail right away, running ones at their next chunk.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once every task signalled, then performs the final flush.
    ///
    /// A failed flush is logged and carried in the report next to the failures.
    pub async fn wait(self) -> Result<DownloadReport, CoordinatorError> {
        let joined = self.aggregator.await;

        let history = match self.autosave {
            Some(autosave) => {
                let flushed = autosave.finish().await;
                if let Err(err) = &flushed {
                    error!(error = %err, "final history flush failed");
                }
                Some(flushed)
            }
            None => None,
        };
        let aggregate = joined?;

        Ok(DownloadReport {
            completed: aggregate.progress.completed,
            bytes: aggregate.bytes,
            failures: aggregate.failures,
            history,
        })
    }
}
