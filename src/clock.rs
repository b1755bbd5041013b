//! Injectable time source.
//!
//! Every wait in the pipeline (rate limiting, retry backoff, pause deadlines,
//! inter-category delays) goes through a [`Clock`], so the scheduling logic
//! can be driven by virtual time in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the caller until `deadline`. Returns immediately if it has passed.
    async fn sleep_until(&self, deadline: DateTime<Utc>);

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + to_chrono(duration);
        self.sleep_until(deadline).await;
    }
}

/// Wall-clock time backed by `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        if let Ok(wait) = (deadline - Utc::now()).to_std() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Saturating conversion; durations beyond chrono's range clamp to its max.
pub fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
pub use manual::ManualClock;

#[cfg(test)]
mod manual {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Virtual time: sleeping moves the clock forward instead of waiting.
    ///
    /// Time never goes backwards, so concurrent sleepers observe the latest
    /// deadline any of them reached.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        now: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                now: Arc::new(Mutex::new(start)),
            }
        }

        pub fn advance(&self, by: chrono::Duration) {
            let mut now = self.now.lock();
            *now += by;
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }

        async fn sleep_until(&self, deadline: DateTime<Utc>) {
            {
                let mut now = self.now.lock();
                if deadline > *now {
                    *now = deadline;
                }
            }
            tokio::task::yield_now().await;
        }
    }
}
