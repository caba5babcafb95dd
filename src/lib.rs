//! Concurrent HTTP(S) downloads with a shared, periodically persisted history.

pub mod cli;
pub mod commands;
pub mod config;
pub mod downloader;
pub mod error;
pub mod ledger;
pub mod persistence;
pub mod progress;
pub mod transport;
pub mod utils;
pub mod writer;

#[cfg(test)]
mod testing;

pub use config::DownloaderConfig;
pub use downloader::{DownloadHandle, DownloadReport, Downloader};
pub use ledger::{HistoryLedger, HistoryRecord};
