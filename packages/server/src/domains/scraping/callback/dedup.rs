//! At-most-once guard for redelivered callback events.
//!
//! `(session_id, event_id)` pairs are remembered for a bounded window; a
//! redelivered event inside the window returns success without reprocessing.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Prune the map when it grows past this many entries.
const PRUNE_THRESHOLD: usize = 1024;

pub struct EventDedup {
    seen: DashMap<(i64, String), Instant>,
    ttl: Duration,
}

impl EventDedup {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// Production window: one hour.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(3600))
    }

    /// Returns true if this event was already seen within the TTL window;
    /// otherwise records it and returns false.
    pub fn check_and_record(&self, session_id: i64, event_id: &str) -> bool {
        if self.seen.len() > PRUNE_THRESHOLD {
            self.prune_expired();
        }

        let key = (session_id, event_id.to_string());
        if let Some(seen_at) = self.seen.get(&key) {
            if seen_at.elapsed() < self.ttl {
                return true;
            }
        }
        self.seen.insert(key, Instant::now());
        false
    }

    fn prune_expired(&self) {
        let ttl = self.ttl;
        self.seen.retain(|_, seen_at| seen_at.elapsed() < ttl);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delivery_is_fresh_second_is_duplicate() {
        let dedup = EventDedup::with_default_ttl();
        assert!(!dedup.check_and_record(1, "evt-1"));
        assert!(dedup.check_and_record(1, "evt-1"));
    }

    #[test]
    fn events_are_scoped_per_session() {
        let dedup = EventDedup::with_default_ttl();
        assert!(!dedup.check_and_record(1, "evt-1"));
        assert!(!dedup.check_and_record(2, "evt-1"));
    }

    #[test]
    fn expired_entries_are_fresh_again() {
        let dedup = EventDedup::new(Duration::from_millis(0));
        assert!(!dedup.check_and_record(1, "evt-1"));
        assert!(!dedup.check_and_record(1, "evt-1"));
    }

    #[test]
    fn prune_drops_expired_entries() {
        let dedup = EventDedup::new(Duration::from_millis(0));
        for i in 0..(PRUNE_THRESHOLD + 10) {
            dedup.check_and_record(1, &format!("evt-{}", i));
        }
        assert!(dedup.len() < PRUNE_THRESHOLD);
    }
}
