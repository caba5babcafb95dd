use std::path::PathBuf;
use std::time::Duration;

use crate::cli::TlsMode;

pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Upper bound of a single write and progress event.
    pub chunk_size: usize,
    /// `None` lets every task hold a connection at once.
    pub max_concurrent: Option<usize>,
    pub tls_mode: TlsMode,
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Where the ledger is flushed. No autosave runs when unset.
    pub history_file: Option<PathBuf>,
    pub autosave_interval: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent: None,
            tls_mode: TlsMode::Fallback,
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("histdl/", env!("CARGO_PKG_VERSION")).to_string(),
            history_file: None,
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
        }
    }
}

impl DownloaderConfig {
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);

        self
    }

    pub fn max_concurrent(mut self, max_concurrent: Option<usize>) -> Self {
        self.max_concurrent = max_concurrent.filter(|n| *n > 0);

        self
    }

    pub fn tls_mode(mut self, tls_mode: TlsMode) -> Self {
        self.tls_mode = tls_mode;

        self
    }

    pub fn history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_file = Some(path.into());

        self
    }

    pub fn autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval.max(Duration::from_millis(1));

        self
    }
}
