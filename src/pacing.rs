//! Pacing module for navigation settle waits and session cooldowns
//!
//! Workers run on blocking threads (headless Chrome calls are synchronous), so
//! waits here use `std::thread::sleep` rather than the tokio timer.

use rand::Rng;
use std::time::Duration;
use tracing::trace;

/// An inclusive range of delays from which a jittered wait is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    /// Create a range; bounds are swapped if given in the wrong order
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    /// A range that never waits
    pub fn zero() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn is_zero(&self) -> bool {
        self.max.is_zero()
    }

    /// Draw a delay uniformly from the range
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
    }

    /// Block the current thread for a sampled delay, returning the delay used
    pub fn wait(&self) -> Duration {
        if self.is_zero() {
            return Duration::ZERO;
        }
        let delay = self.sample();
        trace!("Pacing wait {:?}", delay);
        std::thread::sleep(delay);
        delay
    }
}

/// Settle and cooldown ranges used by a worker
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    /// Wait after each navigation so dynamic content renders
    pub settle: DelayRange,
    /// Wait before creating a replacement session
    pub cooldown: DelayRange,
}

impl Pacing {
    pub fn new(settle: DelayRange, cooldown: DelayRange) -> Self {
        Self { settle, cooldown }
    }

    /// No waiting at all
    pub fn immediate() -> Self {
        Self::new(DelayRange::zero(), DelayRange::zero())
    }

    pub fn settle(&self) -> Duration {
        self.settle.wait()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown.wait()
    }
}
