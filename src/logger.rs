use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use once_cell::sync::Lazy;
use std::fs::File;
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Silent = 0,    // Warnings, errors and the final summary
    Summary = 1,   // Per-item outcomes (default)
    Detailed = 2,  // Navigation steps
    Debug = 3,     // Everything, including browser internals
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }

    /// Default filter directive when `RUST_LOG` is not set
    pub fn filter_directive(&self) -> &'static str {
        match self {
            VerbosityLevel::Silent => "warn",
            VerbosityLevel::Summary => "info",
            VerbosityLevel::Detailed => "info,allegro_enricher=debug",
            VerbosityLevel::Debug => "debug,allegro_enricher=trace",
        }
    }
}

/// Progress bar currently on screen; log lines are printed around it
static ACTIVE_BAR: Lazy<Mutex<Option<ProgressBar>>> = Lazy::new(|| Mutex::new(None));

/// stderr writer that suspends the active progress bar while writing
pub struct ProgressAwareStderr;

pub struct ProgressAwareWriter;

impl Write for ProgressAwareWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let bar = ACTIVE_BAR
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match bar {
            Some(pb) => pb.suspend(|| io::stderr().write_all(buf)).map(|_| buf.len()),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressAwareStderr {
    type Writer = ProgressAwareWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ProgressAwareWriter
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides `verbosity`.
pub fn init_tracing(verbosity: VerbosityLevel, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(ProgressAwareStderr)
        .with_target(false)
        .with_ansi(io::stderr().is_terminal());

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(())
}

/// Create the run progress bar. Hidden when stderr is not a terminal.
pub fn start_progress(total: u64) -> ProgressBar {
    let pb = if io::stderr().is_terminal() {
        ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr())
    } else {
        ProgressBar::hidden()
    };

    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb.set_message("starting workers");

    *ACTIVE_BAR.lock().unwrap_or_else(PoisonError::into_inner) = Some(pb.clone());
    pb
}

/// Detach the progress bar from log output and clear it
pub fn finish_progress() {
    if let Some(pb) = ACTIVE_BAR
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
    {
        pb.finish_and_clear();
    }
}
