//! Memory pressure probe and the throttle around it

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reports whether the process should shed resident leaves
///
/// The leaf cap is always enforced when a leaf loads; the probe only gates the
/// periodic check run between operations. Any `Fn() -> bool` closure is a probe.
pub trait MemoryProbe: Send + Sync {
    fn under_pressure(&self) -> bool;
}

impl<F> MemoryProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn under_pressure(&self) -> bool {
        self()
    }
}

/// Treats every periodic check as under pressure
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysUnderPressure;

impl MemoryProbe for AlwaysUnderPressure {
    fn under_pressure(&self) -> bool {
        true
    }
}

/// Rate-limits probe checks to one per interval
pub(crate) struct MemoryGovernor {
    probe: Arc<dyn MemoryProbe>,
    interval: Duration,
    last_check: Mutex<Instant>,
}

impl MemoryGovernor {
    pub fn new(probe: Arc<dyn MemoryProbe>, interval: Duration) -> Self {
        Self {
            probe,
            interval,
            last_check: Mutex::new(Instant::now()),
        }
    }

    /// True when the interval has elapsed and the probe reports pressure
    pub fn check_due(&self) -> bool {
        if !self.interval.is_zero() {
            let mut last = self.last_check.lock();
            if last.elapsed() < self.interval {
                return false;
            }
            *last = Instant::now();
        }
        self.probe.under_pressure()
    }
}
