//! Injectable time source.
//!
//! Request signing and merge timestamping both need "now"; taking it
//! through a trait keeps every component deterministic under test.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds since the unix epoch.
    fn now_ms(&self) -> u64 {
        self.now().timestamp_millis().max(0) as u64
    }

    /// Whole seconds since the unix epoch.
    fn now_secs(&self) -> u64 {
        self.now().timestamp().max(0) as u64
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock support for tests in this and downstream crates.
pub mod test {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Fixed clock for tests; advances only when told to.
    #[derive(Debug, Default)]
    pub struct FixedClock(pub AtomicU64);

    impl FixedClock {
        pub fn at_ms(ms: u64) -> Self {
            Self(AtomicU64::new(ms))
        }

        pub fn advance_ms(&self, ms: u64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.0.load(Ordering::SeqCst) as i64).unwrap()
        }
    }
}
