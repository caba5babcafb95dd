use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::HumanBytes;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use url::Url;

use crate::cli::TlsMode;
use crate::config::DownloaderConfig;
use crate::downloader::Downloader;
use crate::ledger::HistoryLedger;
use crate::persistence::load_history;
use crate::progress::TerminalProgress;
use crate::transport::{parse_url, ReqwestSource};
use crate::utils::DestinationNamer;

pub const DEFAULT_HISTORY_FILE: &str = "download_history.csv";

pub struct RunOptions {
    pub urls: Vec<String>,
    pub tasks_file: PathBuf,
    pub download_dir: PathBuf,
    pub history_file: PathBuf,
    pub autosave_interval: Duration,
    pub chunk_size: usize,
    pub concurrency: Option<usize>,
    pub tls: TlsMode,
    pub keep_history: bool,
}

/// One URL per line. Blank lines and `#` comments are skipped.
pub async fn read_url_list(input: &Path) -> Result<Vec<Url>> {
    let file = fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open tasks file: {:?}", input))?;
    let mut lines = BufReader::new(file).lines();
    let mut urls = Vec::new();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let raw = line.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let url = parse_url(raw).with_context(|| format!("{:?} line {}", input, line_no))?;
        urls.push(url);
    }

    Ok(urls)
}

pub async fn run_downloads(options: RunOptions) -> Result<()> {
    let urls = if options.urls.is_empty() {
        read_url_list(&options.tasks_file).await?
    } else {
        options
            .urls
            .iter()
            .map(|raw| parse_url(raw))
            .collect::<Result<Vec<_>, _>>()?
    };
    if urls.is_empty() {
        bail!("Nothing to download");
    }

    if !options.download_dir.exists() {
        fs::create_dir_all(&options.download_dir)
            .await
            .context("Failed to create download directory")?;
    }

    let ledger = if options.keep_history && options.history_file.exists() {
        let previous = load_history(&options.history_file).await?;
        info!(rows = previous.len(), "continuing existing history");
        HistoryLedger::from_records(previous)
    } else {
        HistoryLedger::new()
    };

    let config = DownloaderConfig::default()
        .chunk_size(options.chunk_size)
        .max_concurrent(options.concurrency)
        .tls_mode(options.tls)
        .history_file(&options.history_file)
        .autosave_interval(options.autosave_interval);

    let source = ReqwestSource::new(&config).context("Failed to build HTTP client")?;
    let progress = Arc::new(TerminalProgress::new(urls.len()));
    let downloader = Arc::new(Downloader::new(source, ledger, progress.clone(), config));

    let mut namer = DestinationNamer::new(&options.download_dir);
    let handle = downloader.dispatch(urls, |url| namer.destination_for(url))?;

    let cancel = downloader.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling downloads");
            cancel.cancel();
        }
    });

    let report = handle.wait().await?;
    progress.finish();

    println!(
        "Summary: Files: {} downloaded, {} failed | Downloaded: {} | History: {:?}",
        report.completed,
        report.failures.len(),
        HumanBytes(report.bytes),
        options.history_file,
    );
    for failure in &report.failures {
        eprintln!("Failed to download {}: {}", failure.url, failure.error);
    }

    let unverified: Vec<_> = downloader
        .ledger()
        .snapshot()
        .into_iter()
        .filter(|record| record.unverified)
        .collect();
    if !unverified.is_empty() {
        eprintln!(
            "Warning: {} file(s) were downloaded without TLS certificate verification:",
            unverified.len()
        );
        for record in unverified {
            eprintln!("  {}", record.url);
        }
    }

    if let Some(Err(err)) = report.history {
        return Err(err).context("History was not saved");
    }

    Ok(())
}

pub async fn list_history(history_file: PathBuf) -> Result<()> {
    if !history_file.exists() {
        println!("History file '{:?}' does not exist.", history_file);
        println!("Tip: If you used a custom history file, please specify it with --history-file");
        return Ok(());
    }

    let records = load_history(&history_file).await?;
    let total_mb: f64 = records.iter().map(|r| r.file_size_mb).sum();

    println!("Summary: Files: {} | Downloaded: {:.2} MB", records.len(), total_mb);
    println!();

    println!("{:<28} {:>12}  {}", "Timestamp (UTC)", "Size (MB)", "URL");
    println!("{:-<28} {:->12}  {:-<40}", "", "", "");

    for record in &records {
        println!(
            "{:<28} {:>12.2}  {}",
            record.timestamp_utc.format("%Y-%m-%d %H:%M:%S"),
            record.file_size_mb,
            record.url
        );
    }

    if records.is_empty() {
        println!("No downloads recorded in '{:?}'.", history_file);
    }

    Ok(())
}
