//! Clock abstraction for TTL and delay deadlines

#[cfg(test)]
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Source of wall-clock time for the broker
///
/// Message deadlines (`expires_at`, `available_at`) are compared against this
/// clock, so tests can drive expiry and delay gating without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Production clock backed by `SystemTime::now()`
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Manually advanced clock for deterministic tests
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<SystemTime>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.current.lock().unwrap() += duration;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.current.lock().unwrap()
    }
}

/// `base + offset`, saturating far in the future instead of overflowing
pub fn deadline(base: SystemTime, offset: Duration) -> SystemTime {
    base.checked_add(offset)
        .unwrap_or_else(|| base + Duration::from_secs(u32::MAX as u64))
}
