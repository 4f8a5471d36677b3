// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction.
//!
//! Components never read wall-clock time directly; they take a `Clock` so
//! deadline and backoff logic is deterministic under test.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time source for the runtime.
pub trait Clock: Send + Sync {
    /// Monotonic instant for deadline arithmetic.
    fn now(&self) -> Instant;

    /// Milliseconds since the Unix epoch, for timestamps in records.
    fn epoch_ms(&self) -> u64;
}

/// System clock for production use.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for tests.
#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<FakeClockState>>,
}

struct FakeClockState {
    origin: Instant,
    elapsed: Duration,
    epoch_ms: u64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeClockState {
                origin: Instant::now(),
                elapsed: Duration::ZERO,
                epoch_ms: 0,
            })),
        }
    }

    /// Advance both the monotonic and epoch views of time.
    pub fn advance(&self, by: Duration) {
        let mut state = self.inner.lock();
        state.elapsed += by;
        state.epoch_ms += by.as_millis() as u64;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        let state = self.inner.lock();
        state.origin + state.elapsed
    }

    fn epoch_ms(&self) -> u64 {
        self.inner.lock().epoch_ms
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
