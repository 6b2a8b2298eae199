//! Per-origin request spacing.
//!
//! Each origin has a "next free slot". A caller reserves `max(now, next)` and
//! pushes `next` forward by the origin's interval, all under a short lock.
//! The caller then sleeps until its slot without holding anything, so
//! different origins never wait on each other.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    last: Option<Instant>,
    next: Option<Instant>,

    /// Lower bound on the interval (robots Crawl-delay)
    floor: Duration,
}

/// Reservation schedule keyed by origin.
#[derive(Debug, Default)]
pub struct OriginSchedule {
    slots: Mutex<HashMap<String, Slot>>,
}

impl OriginSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next start time for `origin`, spacing starts at least
    /// `interval` apart (or the origin's floor, if larger).
    pub fn reserve(&self, origin: &str, interval: Duration) -> Instant {
        let now = Instant::now();
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(origin.to_string()).or_default();

        let start = slot.next.map_or(now, |next| next.max(now));
        slot.last = Some(start);
        slot.next = Some(start + interval.max(slot.floor));
        start
    }

    /// Set a minimum interval for `origin`.
    ///
    /// The slot after the latest reservation moves out to honor the floor.
    pub fn set_floor(&self, origin: &str, floor: Duration) {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(origin.to_string()).or_default();
        slot.floor = floor;
        if let Some(last) = slot.last {
            slot.next = slot.next.max(Some(last + floor));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAP: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn test_reservations_are_spaced_per_origin() {
        let schedule = OriginSchedule::new();
        let t0 = Instant::now();

        let a1 = schedule.reserve("https://a", GAP);
        let a2 = schedule.reserve("https://a", GAP);
        let a3 = schedule.reserve("https://a", GAP);
        let b1 = schedule.reserve("https://b", GAP);

        assert_eq!(a1, t0);
        assert_eq!(a2 - a1, GAP);
        assert_eq!(a3 - a2, GAP);
        assert_eq!(b1, t0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_origin_starts_now() {
        let schedule = OriginSchedule::new();
        schedule.reserve("https://a", GAP);

        tokio::time::advance(Duration::from_secs(5)).await;
        let now = Instant::now();
        assert_eq!(schedule.reserve("https://a", GAP), now);
    }

    #[tokio::test(start_paused = true)]
    async fn test_floor_widens_interval() {
        let schedule = OriginSchedule::new();
        schedule.set_floor("https://a", Duration::from_secs(2));

        let first = schedule.reserve("https://a", GAP);
        let second = schedule.reserve("https://a", GAP);
        assert_eq!(second - first, Duration::from_secs(2));
        assert_eq!(schedule.reserve("https://b", GAP), first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_floor_pushes_back_reserved_slot() {
        let schedule = OriginSchedule::new();
        let first = schedule.reserve("https://a", GAP);

        schedule.set_floor("https://a", Duration::from_secs(3));

        assert_eq!(schedule.reserve("https://a", GAP) - first, Duration::from_secs(3));
    }
}
