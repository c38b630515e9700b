//! Injectable time source.
//!
//! Every dose comparison in the crate goes through a `Clock` (or takes an
//! explicit `now` argument), so scheduling and mute expiry are fully
//! deterministic under test. Naive local time throughout; timestamps carry
//! no timezone.

use std::sync::{Arc, Mutex};

use chrono::{NaiveDateTime, Timelike};

/// Supplies the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Production clock backed by the system's local time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        // Second precision: timestamps round-trip through ISO-8601 strings
        // in the ledger, which carry no sub-second digits.
        let now = chrono::Local::now().naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }
}

/// Manually-advanced clock for deterministic tests.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        *self.now.lock().unwrap() += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}
