//! Minimum-interval rate limiting, globally and per category.
//!
//! Callers reserve a slot and then sleep until it. A slot is the earliest
//! instant that is at least `global_delay` after the previous global slot and
//! `category_delay` after the previous slot of the same category. Reservation
//! happens under one lock, so two workers can never be handed the same slot.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::clock::{Clock, to_chrono};

#[derive(Debug, Default)]
struct Slots {
    global_next: Option<DateTime<Utc>>,
    category_next: HashMap<String, DateTime<Utc>>,
}

pub struct RateLimiter {
    global_delay: chrono::Duration,
    category_delay: chrono::Duration,
    clock: Arc<dyn Clock>,
    slots: Mutex<Slots>,
}

impl RateLimiter {
    pub fn new(global_delay: Duration, category_delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            global_delay: to_chrono(global_delay),
            category_delay: to_chrono(category_delay),
            clock,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Reserve the next request slot for `category` without waiting.
    pub fn reserve(&self, category: &str) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut slots = self.slots.lock();

        let mut slot = now;
        if let Some(next) = slots.global_next {
            slot = slot.max(next);
        }
        if let Some(next) = slots.category_next.get(category) {
            slot = slot.max(*next);
        }

        slots.global_next = Some(slot + self.global_delay);
        slots
            .category_next
            .insert(category.to_string(), slot + self.category_delay);
        slot
    }

    /// Wait until this caller may issue a request for `category`.
    pub async fn acquire(&self, category: &str) {
        let slot = self.reserve(category);
        trace!(category, slot = %slot, "Rate limiter slot reserved");
        self.clock.sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_global_delay_spaces_all_requests() {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = RateLimiter::new(Duration::from_secs(1), Duration::ZERO, clock);
        assert_eq!(limiter.reserve("a"), start());
        assert_eq!(limiter.reserve("b"), start() + chrono::Duration::seconds(1));
        assert_eq!(limiter.reserve("a"), start() + chrono::Duration::seconds(2));
    }

    #[test]
    fn test_category_delay_only_spaces_same_category() {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = RateLimiter::new(
            Duration::from_millis(100),
            Duration::from_secs(2),
            clock,
        );
        assert_eq!(limiter.reserve("politics"), start());
        assert_eq!(
            limiter.reserve("economy"),
            start() + chrono::Duration::milliseconds(100)
        );
        assert_eq!(
            limiter.reserve("politics"),
            start() + chrono::Duration::seconds(2)
        );
    }

    #[test]
    fn test_idle_time_is_not_banked() {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = RateLimiter::new(Duration::from_secs(1), Duration::ZERO, clock.clone());
        limiter.reserve("a");
        clock.advance(chrono::Duration::seconds(10));
        let now = clock.now();
        assert_eq!(limiter.reserve("a"), now);
        assert_eq!(limiter.reserve("a"), now + chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_acquire_waits_on_the_clock() {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = RateLimiter::new(Duration::from_secs(3), Duration::ZERO, clock.clone());
        limiter.acquire("a").await;
        limiter.acquire("a").await;
        assert_eq!(clock.now(), start() + chrono::Duration::seconds(3));
    }
}
