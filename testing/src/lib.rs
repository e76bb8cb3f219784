//! # Gym Testing
//!
//! Test doubles for the gym event fabric.
//!
//! This crate provides:
//! - [`FixedClock`]: deterministic, manually advanced time
//! - [`RecordingPublisher`]: captures every published message
//! - [`InMemoryBus`]: routes published messages to bound handlers with the
//!   same topic matching and ack/requeue policy as the broker
//!
//! ## Example
//!
//! ```ignore
//! use gym_testing::InMemoryBus;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn refund_cascades_to_activities() {
//!     let bus = Arc::new(InMemoryBus::new());
//!     bus.bind("activities_subscription_events", &["subscription.cancelled"], unenroll);
//!     subscriptions.handle_refund(&event).await?;
//!     bus.drain().await;
//!     assert_eq!(bus.count("subscription.cancelled"), 1);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod publisher;

pub use bus::{DeliveryRecord, InMemoryBus};
pub use publisher::RecordingPublisher;

/// Mock implementations of environment traits.
pub mod mocks {
    #![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use gym_core::environment::Clock;
    use std::sync::{Arc, Mutex};

    /// Clock that only moves when told to.
    ///
    /// Clones share the same instant, so a test can hand one clone to a
    /// service and advance the other.
    ///
    /// # Example
    ///
    /// ```
    /// use gym_testing::mocks::FixedClock;
    /// use gym_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::days(30));
    /// assert_eq!(clock.now() - before, Duration::days(30));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move time forward.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap() = time;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Clock fixed at 2025-01-01T00:00:00Z.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap_or_default())
    }
}

pub use mocks::{FixedClock, test_clock};
