//! Clock abstraction
//!
//! Both the Demand Tracker and the Pricing Engine read wall-clock time (window
//! rotation deadlines and the temporal multiplier, respectively). Threading a
//! `Clock` through both lets tests freeze time instead of racing real deadlines.

use chrono::{DateTime, Utc};
use std::time::Instant;

/// Source of truth for "now", both as a monotonic instant (window rotation) and
/// as a UTC wall-clock reading (temporal multiplier, snapshot timestamps).
pub trait Clock: Send + Sync {
    /// Monotonic instant, used for window deadlines. Never goes backwards.
    fn now_instant(&self) -> Instant;

    /// Wall-clock UTC time, used for timestamps persisted or published.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real clock backed by the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_instant(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Frozen clock for deterministic tests. `advance` moves both readings forward
/// in lockstep so window-rotation math and temporal-multiplier math stay
/// consistent within a single test.
#[derive(Debug, Clone)]
pub struct FixedClock {
    instant: std::sync::Arc<parking_lot::Mutex<Instant>>,
    utc: std::sync::Arc<parking_lot::Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(utc: DateTime<Utc>) -> Self {
        Self {
            instant: std::sync::Arc::new(parking_lot::Mutex::new(Instant::now())),
            utc: std::sync::Arc::new(parking_lot::Mutex::new(utc)),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let std_dur = duration
            .to_std()
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        *self.instant.lock() += std_dur;
        *self.utc.lock() = *self.utc.lock() + duration;
    }
}

impl Clock for FixedClock {
    fn now_instant(&self) -> Instant {
        *self.instant.lock()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        *self.utc.lock()
    }
}
