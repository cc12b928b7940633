//! Trusted clock abstraction for testable time-dependent logic.
//!
//! Entitlement expiration checks must not trust a user-settable wall clock
//! more than necessary, so the engine takes time through this trait and
//! calls [`Clock::sync`] once at startup. The default [`SystemClock`] falls
//! back to local wall time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Clock trait for deterministic time in tests and trusted time in production.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Synchronize against a trusted time source.
    ///
    /// Called once by `Ledger::start`. The default implementation is a
    /// no-op; network-time implementations adjust their internal offset
    /// here and keep serving `now_utc` from local time until then.
    async fn sync(&self) {}

    /// Get the current UTC time.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// System clock using actual wall time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock clock for deterministic testing.
///
/// Shared-interior so tests can advance time while the engine holds a
/// clone behind `Arc<dyn Clock>`.
#[cfg(any(test, feature = "test-seams"))]
#[derive(Debug, Clone)]
pub struct MockClock {
    now: std::sync::Arc<std::sync::Mutex<DateTime<Utc>>>,
}

#[cfg(any(test, feature = "test-seams"))]
impl MockClock {
    /// Create a mock clock frozen at the given time.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Arc::new(std::sync::Mutex::new(now)),
        }
    }

    /// Create a mock clock from an RFC 3339 string.
    pub fn from_rfc3339(s: &str) -> Self {
        Self::new(
            DateTime::parse_from_rfc3339(s)
                .expect("valid RFC 3339")
                .with_timezone(&Utc),
        )
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now = *now + duration;
    }
}

#[cfg(any(test, feature = "test-seams"))]
#[async_trait]
impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}
