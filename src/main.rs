//! Main entry point for the megdump CLI application.
//!
//! Takes a single MEG archive path and extracts every entry relative to the
//! current directory.

use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use megdump::cli::EXIT_NO_ARGUMENT;
use megdump::{
    Cli, Error, ExtractObserver, ExtractOptions, LocalFileReader, MegExtractor, MmapReader, ReadAt,
};

/// Exit code for failures that carry no typed [`Error`].
const EXIT_UNTYPED: i32 = -4;

/// Application entry point.
///
/// Exit codes follow [`Error::exit_code`]; `-1` means no archive was given.
#[tokio::main]
async fn main() {
    let bar = progress_bar();
    init_tracing(bar.clone());
    let cli = Cli::parse();

    let code = dispatch(&cli, &bar).await;
    bar.finish_and_clear();
    std::process::exit(code);
}

fn init_tracing(bar: ProgressBar) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("megdump=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(BarWriter(bar))
        .with_target(false)
        .init();
}

/// Run the CLI and map the outcome to a process exit code.
async fn dispatch(cli: &Cli, bar: &ProgressBar) -> i32 {
    let Some(path) = cli.file.as_deref() else {
        error!("no archive given");
        return EXIT_NO_ARGUMENT;
    };

    match run(path, bar).await {
        Ok(()) => 0,
        Err(err) => {
            error!("{err:#}");
            exit_code(&err)
        }
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<Error>()
        .map(Error::exit_code)
        .unwrap_or(EXIT_UNTYPED)
}

/// Open the archive, preferring a memory map and falling back to
/// positional reads when the file cannot be mapped.
async fn run(path: &Path, bar: &ProgressBar) -> Result<()> {
    if !path.exists() {
        return Err(Error::InputNotFound(path.to_path_buf()).into());
    }

    match MmapReader::open(path) {
        Ok(reader) => extract(Arc::new(reader), path, bar).await,
        Err(err @ Error::InputNotFound(_)) => Err(err.into()),
        Err(err) => {
            warn!(error = %err, "memory map unavailable, using positional reads");
            extract(Arc::new(LocalFileReader::new(path)?), path, bar).await
        }
    }
}

/// Parse the archive and extract every entry.
async fn extract<R>(reader: Arc<R>, path: &Path, bar: &ProgressBar) -> Result<()>
where
    R: ReadAt + 'static,
{
    let extractor = MegExtractor::new(reader);

    let archive = extractor
        .open()
        .await
        .with_context(|| format!("failed to parse {}", path.display()))?;
    info!(
        entries = archive.index.len(),
        names = archive.names.len(),
        bytes = archive.index.total_bytes(),
        "indexed archive"
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if watch_interrupts(&flag, tokio::signal::ctrl_c).await {
            std::process::exit(Error::Cancelled.exit_code());
        }
    });

    let options = ExtractOptions {
        cancel: Some(cancel),
        ..ExtractOptions::default()
    };
    bar.set_length(archive.index.total_bytes());
    let progress = Arc::new(ConsoleProgress { bar: bar.clone() });

    let report = extractor
        .extract_all(&archive, &options, progress)
        .await
        .with_context(|| format!("failed to extract {}", path.display()))?;
    bar.finish_and_clear();

    println!(
        "Extracted {} files ({})",
        report.extracted,
        format_size(report.bytes_written)
    );
    if report.superseded > 0 {
        println!(
            "  {} entries overwritten by later entries for the same file",
            report.superseded
        );
    }
    for failure in &report.failures {
        println!("  failed: {} ({})", failure.path, failure.error);
    }

    Ok(())
}

/// Wait for interrupts. The first one only sets `cancel`, so the run stops
/// before its next entry. Returns `true` once a second interrupt arrives,
/// `false` if listening for interrupts fails.
async fn watch_interrupts<F, Fut>(cancel: &AtomicBool, mut interrupt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if interrupt().await.is_err() {
        return false;
    }
    cancel.store(true, Ordering::Relaxed);
    warn!("stopping after the current entry, interrupt again to exit now");

    interrupt().await.is_ok()
}

fn progress_bar() -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
             {bytes}/{total_bytes} {wide_msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    let bar = ProgressBar::new(0);
    bar.set_style(style);
    bar
}

/// Log writer that hides the progress bar while a line is written.
#[derive(Clone)]
struct BarWriter(ProgressBar);

impl Write for BarWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.suspend(|| std::io::stderr().write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for BarWriter {
    type Writer = BarWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Byte progress across the whole run, labelled with the current entry.
///
/// Failures are not printed here: the run's error or the summary reports them.
struct ConsoleProgress {
    bar: ProgressBar,
}

impl ExtractObserver for ConsoleProgress {
    fn entry_started(&self, path: &str, _size: u64) {
        self.bar.set_message(path.to_string());
    }

    fn chunk_written(&self, _path: &str, chunk: u64, _written: u64) {
        self.bar.inc(chunk);
    }
}

/// Format a byte size into a human-readable string.
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
