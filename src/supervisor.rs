//! Pool supervisor: staggered worker startup, join, and run status

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::report::{RunStatus, RunTotals};
use crate::worker::{SessionWorker, WorkerContext, WorkerExit};

/// Granularity at which a startup stagger notices a shutdown request
const STAGGER_POLL: Duration = Duration::from_millis(250);

/// Shared stop signal. Workers check it between items, never mid-item.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop pulling new items
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Stop pulling new items because the user interrupted the run
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.request();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

/// What happened to the pool as a whole
#[derive(Debug, Clone)]
pub struct PoolOutcome {
    pub exits: Vec<(usize, WorkerExit)>,
    pub interrupted: bool,
    /// Items still queued when the pool stopped
    pub remaining: usize,
}

impl PoolOutcome {
    pub fn startup_failures(&self) -> usize {
        self.exits
            .iter()
            .filter(|(_, exit)| matches!(exit, WorkerExit::StartupFailed(_)))
            .count()
    }

    pub fn lost_workers(&self) -> usize {
        self.exits
            .iter()
            .filter(|(_, exit)| matches!(exit, WorkerExit::SessionLost(_) | WorkerExit::Panicked(_)))
            .count()
    }

    /// Precedence: setup failure, interruption, partial, completed
    pub fn status(&self, totals: &RunTotals) -> RunStatus {
        if self.startup_failures() > 0 {
            RunStatus::SetupFailed
        } else if self.interrupted {
            RunStatus::Interrupted
        } else if self.lost_workers() > 0 || totals.failed() > 0 || self.remaining > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        }
    }
}

pub struct PoolSupervisor {
    ctx: WorkerContext,
}

impl PoolSupervisor {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Start up to `pool_size` workers, `start_delay` apart, and wait for all
    /// of them to finish.
    pub async fn run(&self, pool_size: usize, start_delay: Duration) -> PoolOutcome {
        let pool_size = pool_size.min(self.ctx.queue.len());
        if pool_size == 0 {
            info!("Nothing to process");
        } else {
            info!(
                "Starting {} workers, {}s apart, for {} sellers",
                pool_size,
                start_delay.as_secs(),
                self.ctx.queue.len()
            );
        }

        let mut handles = Vec::with_capacity(pool_size);
        for id in 0..pool_size {
            if id > 0 && !stagger(start_delay, &self.ctx.shutdown).await {
                warn!("Shutdown requested; {} workers not started", pool_size - id);
                break;
            }
            if self.ctx.queue.is_empty() {
                info!("Queue drained before worker {} started", id);
                break;
            }

            let ctx = self.ctx.clone();
            let shutdown = self.ctx.shutdown.clone();
            handles.push((
                id,
                tokio::task::spawn_blocking(move || match SessionWorker::start(id, ctx) {
                    Ok(worker) => worker.run(),
                    Err(e) => {
                        error!(worker = id, "Session could not be created: {}", e);
                        shutdown.request();
                        WorkerExit::StartupFailed(e)
                    }
                }),
            ));
        }

        let (ids, futures): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = join_all(futures).await;

        let exits = ids
            .into_iter()
            .zip(results)
            .map(|(id, result)| {
                let exit = result.unwrap_or_else(|e| {
                    error!(worker = id, "Worker task failed: {}", e);
                    WorkerExit::Panicked(e.to_string())
                });
                (id, exit)
            })
            .collect();

        PoolOutcome {
            exits,
            interrupted: self.ctx.shutdown.was_interrupted(),
            remaining: self.ctx.queue.len(),
        }
    }
}

/// Wait `delay`, returning early with `false` if shutdown is requested
async fn stagger(delay: Duration, shutdown: &ShutdownFlag) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    while tokio::time::Instant::now() < deadline {
        if shutdown.is_requested() {
            return false;
        }
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        tokio::time::sleep(left.min(STAGGER_POLL)).await;
    }
    !shutdown.is_requested()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionError;

    fn outcome(exits: Vec<WorkerExit>, interrupted: bool, remaining: usize) -> PoolOutcome {
        PoolOutcome {
            exits: exits.into_iter().enumerate().collect(),
            interrupted,
            remaining,
        }
    }

    #[test]
    fn test_shutdown_flag() {
        let flag = ShutdownFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_requested());
        flag.request();
        assert!(clone.is_requested());
        assert!(!clone.was_interrupted());
        flag.interrupt();
        assert!(clone.was_interrupted());
    }

    #[test]
    fn test_status_completed() {
        let o = outcome(vec![WorkerExit::Drained, WorkerExit::Drained], false, 0);
        assert_eq!(o.status(&RunTotals::default()), RunStatus::Completed);
    }

    #[test]
    fn test_status_partial_on_failed_items() {
        let o = outcome(vec![WorkerExit::Drained], false, 0);
        let totals = RunTotals { abandoned: 1, ..Default::default() };
        assert_eq!(o.status(&totals), RunStatus::Partial);
    }

    #[test]
    fn test_status_partial_on_lost_session() {
        let o = outcome(
            vec![WorkerExit::Drained, WorkerExit::SessionLost(SessionError::Closed)],
            false,
            0,
        );
        assert_eq!(o.status(&RunTotals::default()), RunStatus::Partial);
    }

    #[test]
    fn test_setup_failure_wins() {
        let o = outcome(
            vec![WorkerExit::Stopped, WorkerExit::StartupFailed(SessionError::Launch("no chrome".into()))],
            true,
            5,
        );
        assert_eq!(o.status(&RunTotals::default()), RunStatus::SetupFailed);
    }

    #[test]
    fn test_interrupted() {
        let o = outcome(vec![WorkerExit::Stopped], true, 3);
        assert_eq!(o.status(&RunTotals::default()), RunStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_stagger_returns_early_on_shutdown() {
        let flag = ShutdownFlag::new();
        flag.request();
        let started = std::time::Instant::now();
        assert!(!stagger(Duration::from_secs(30), &flag).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stagger_waits_full_delay() {
        let flag = ShutdownFlag::new();
        let started = std::time::Instant::now();
        assert!(stagger(Duration::from_millis(50), &flag).await);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
