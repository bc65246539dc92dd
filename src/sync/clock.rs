// Period Clock - Where the current period comes from
//
// Periods will eventually be read off the main chain. Until then the
// engine asks an injected source, so tests can pin time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of the current period number
pub trait PeriodSource: Send + Sync {
    fn current_period(&self) -> u64;
}

/// Periods elapsed since the clock was created
#[derive(Debug, Clone)]
pub struct SystemPeriodClock {
    start: Instant,
    period_length: Duration,
}

impl SystemPeriodClock {
    pub fn new(period_length: Duration) -> Self {
        Self {
            start: Instant::now(),
            period_length,
        }
    }
}

impl PeriodSource for SystemPeriodClock {
    fn current_period(&self) -> u64 {
        let length = self.period_length.as_millis().max(1);
        (self.start.elapsed().as_millis() / length) as u64
    }
}

/// A period source moved by hand
#[derive(Debug, Default)]
pub struct ManualPeriodClock {
    period: AtomicU64,
}

impl ManualPeriodClock {
    pub fn new(period: u64) -> Self {
        Self {
            period: AtomicU64::new(period),
        }
    }

    pub fn set(&self, period: u64) {
        self.period.store(period, Ordering::SeqCst);
    }

    /// Move forward one period, returning the new one
    pub fn advance(&self) -> u64 {
        self.period.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl PeriodSource for ManualPeriodClock {
    fn current_period(&self) -> u64 {
        self.period.load(Ordering::SeqCst)
    }
}
