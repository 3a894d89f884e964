//! Per-item outcomes, run totals and the exported run summary

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::seller::Segment;

/// How processing of one work item ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemOutcome {
    Written { score: u32, segment: Segment },
    /// Profile has no offers and is not blocked; nothing written
    NoOffers,
    /// Non-transient failure; nothing written
    Abandoned { reason: String },
    /// Blocked on every attempt; nothing written
    RetriesExhausted { attempts: u32 },
}

impl ItemOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ItemOutcome::Abandoned { .. } | ItemOutcome::RetriesExhausted { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub login: String,
    pub worker: usize,
    pub outcome: ItemOutcome,
    pub attempts: u32,
    pub duration_secs: f64,
}

impl ItemReport {
    pub fn new(
        login: impl Into<String>,
        worker: usize,
        outcome: ItemOutcome,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        Self {
            login: login.into(),
            worker,
            outcome,
            attempts,
            duration_secs: duration.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub queued: usize,
    pub written: usize,
    pub no_offers: usize,
    pub abandoned: usize,
    pub retries_exhausted: usize,
    pub blocks_seen: usize,
    pub session_restarts: usize,
    pub segment_a: usize,
    pub segment_b: usize,
    pub segment_c: usize,
}

impl RunTotals {
    pub fn processed(&self) -> usize {
        self.written + self.no_offers + self.abandoned + self.retries_exhausted
    }

    pub fn failed(&self) -> usize {
        self.abandoned + self.retries_exhausted
    }
}

/// Final state of a run, mapped to the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Queue drained and every item ended as written or no-offers
    Completed,
    /// Some items abandoned, or a worker lost its session mid-run
    Partial,
    /// At least one worker could not create its session at startup
    SetupFailed,
    Interrupted,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::SetupFailed => 2,
            RunStatus::Partial => 3,
            RunStatus::Interrupted => 130,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub status: Option<RunStatus>,
    pub output_file: String,
    pub totals: RunTotals,
    pub items: Vec<ItemReport>,
}

impl RunSummary {
    pub fn new(queued: usize, output_file: impl Into<String>) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            duration_secs: 0.0,
            status: None,
            output_file: output_file.into(),
            totals: RunTotals {
                queued,
                ..Default::default()
            },
            items: Vec::new(),
        }
    }

    /// Stamp the end time and final status
    pub fn finalize(&mut self, status: RunStatus) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.duration_secs = (now - self.started_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        self.status = Some(status);
    }
}

/// Collects item reports from all workers and drives the progress bar
pub struct RunReporter {
    summary: Mutex<RunSummary>,
    progress: ProgressBar,
}

impl RunReporter {
    pub fn new(queued: usize, output_file: impl Into<String>, progress: ProgressBar) -> Self {
        Self {
            summary: Mutex::new(RunSummary::new(queued, output_file)),
            progress,
        }
    }

    /// Reporter without a visible progress bar
    pub fn hidden(queued: usize) -> Self {
        Self::new(queued, String::new(), ProgressBar::hidden())
    }

    pub fn record(&self, report: ItemReport) {
        let mut summary = self.summary.lock().unwrap_or_else(PoisonError::into_inner);
        let totals = &mut summary.totals;
        match &report.outcome {
            ItemOutcome::Written { segment, .. } => {
                totals.written += 1;
                match segment {
                    Segment::A => totals.segment_a += 1,
                    Segment::B => totals.segment_b += 1,
                    Segment::C => totals.segment_c += 1,
                }
            }
            ItemOutcome::NoOffers => totals.no_offers += 1,
            ItemOutcome::Abandoned { .. } => totals.abandoned += 1,
            ItemOutcome::RetriesExhausted { .. } => totals.retries_exhausted += 1,
        }
        let message = format!("{} written, {} failed", totals.written, totals.failed());
        summary.items.push(report);
        drop(summary);

        self.progress.set_message(message);
        self.progress.inc(1);
    }

    pub fn record_block(&self) {
        self.summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .totals
            .blocks_seen += 1;
    }

    pub fn record_restart(&self) {
        self.summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .totals
            .session_restarts += 1;
    }

    pub fn totals(&self) -> RunTotals {
        self.summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .totals
            .clone()
    }

    /// Close the progress bar and return the finalized summary
    pub fn finish(&self, status: RunStatus) -> RunSummary {
        self.progress.finish_and_clear();
        let mut summary = self.summary.lock().unwrap_or_else(PoisonError::into_inner);
        summary.finalize(status);
        summary.clone()
    }
}

/// Export the run summary as pretty JSON
pub fn export_summary(summary: &RunSummary, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;
    std::fs::write(output_path, json)
        .with_context(|| format!("Failed to write run summary to {}", output_path.display()))?;
    Ok(())
}

pub fn print_final_summary(summary: &RunSummary) {
    let t = &summary.totals;
    println!("\n=== RUN SUMMARY ===");
    println!("Duration: {:.1}s", summary.duration_secs);
    println!("Sellers queued: {}", t.queued);
    println!("Records written: {} (A: {}, B: {}, C: {})", t.written, t.segment_a, t.segment_b, t.segment_c);
    println!("No offers: {}", t.no_offers);
    println!("Abandoned: {}", t.abandoned);
    println!("Retries exhausted: {}", t.retries_exhausted);
    println!("Blocks seen: {}", t.blocks_seen);
    println!("Session restarts: {}", t.session_restarts);
    let unprocessed = t.queued.saturating_sub(t.processed());
    if unprocessed > 0 {
        println!("Not processed: {}", unprocessed);
    }
    if !summary.output_file.is_empty() {
        println!("Output: {}", summary.output_file);
    }
    println!("===================\n");

    match summary.status {
        Some(RunStatus::Completed) => println!("✅ Run completed."),
        Some(RunStatus::Partial) => println!("⚠️  Run finished with {} failed items.", t.failed()),
        Some(RunStatus::SetupFailed) => println!("❌ Run aborted: a browser session could not be started."),
        Some(RunStatus::Interrupted) => println!("⚠️  Run interrupted; rerun to resume."),
        None => {}
    }
}
