use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use histdl::cli::TlsMode;
use histdl::commands::{self, RunOptions, DEFAULT_HISTORY_FILE};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URLs to download (if provided, tasks-file is ignored)
    urls: Vec<String>,

    /// Path to the file containing URLs (one per line)
    #[arg(
        short = 't',
        long = "tasks-file",
        env = "HISTDL_TASKS_FILE",
        default_value = "download.txt"
    )]
    tasks_file: PathBuf,

    /// Directory to save downloaded files
    #[arg(
        short = 'd',
        long = "download-dir",
        env = "HISTDL_DOWNLOAD_DIR",
        default_value = "downloads"
    )]
    download_dir: PathBuf,

    /// CSV file the download history is written to [default: <download-dir>/download_history.csv]
    #[arg(long = "history-file", env = "HISTDL_HISTORY_FILE")]
    history_file: Option<PathBuf>,

    /// Seconds between periodic history saves
    #[arg(long = "autosave-interval", env = "HISTDL_AUTOSAVE_INTERVAL", default_value_t = 10)]
    autosave_interval: u64,

    /// Largest number of bytes written (and reported) at once
    #[arg(long = "chunk-size", env = "HISTDL_CHUNK_SIZE", default_value_t = 8192)]
    chunk_size: usize,

    /// Maximum number of concurrent downloads (unbounded when omitted)
    #[arg(short = 'c', long, env = "HISTDL_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Certificate handling: fallback (retry once unverified) or strict
    #[arg(long = "tls", value_enum, env = "HISTDL_TLS", default_value = "fallback")]
    tls: TlsMode,

    /// Extend the existing history file instead of replacing it
    #[arg(long = "keep-history", env = "HISTDL_KEEP_HISTORY")]
    keep_history: bool,

    /// Print the recorded download history and exit
    #[arg(short = 'l', long)]
    list: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = Args::parse();

    // Resolve relative to the current directory before anything is spawned
    if args.download_dir.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            args.download_dir = cwd.join(&args.download_dir);
        }
    }
    let history_file = args
        .history_file
        .clone()
        .unwrap_or_else(|| args.download_dir.join(DEFAULT_HISTORY_FILE));

    let rt = tokio::runtime::Runtime::new()?;

    if args.list {
        return rt.block_on(commands::list_history(history_file));
    }

    rt.block_on(commands::run_downloads(RunOptions {
        urls: args.urls,
        tasks_file: args.tasks_file,
        download_dir: args.download_dir,
        history_file,
        autosave_interval: Duration::from_secs(args.autosave_interval),
        chunk_size: args.chunk_size,
        concurrency: args.concurrency,
        tls: args.tls,
        keep_history: args.keep_history,
    }))
}
