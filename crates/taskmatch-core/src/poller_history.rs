//! Recently-seen pollers and their observed demand rate.
//!
//! Entries are refreshed on every poll attempt (including ones that time
//! out) and evicted lazily once they exceed the TTL. The demand rate is an
//! exponentially-weighted estimate over observed poll gaps; an explicit
//! poller-advertised rate always wins.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::PollerInfo;

/// EWMA weight given to the newest observation.
const RATE_SMOOTHING: f64 = 0.2;

/// Hard cap on tracked identities. A flood of distinct pollers within one
/// TTL window evicts the least recently seen instead of growing the map.
const MAX_ENTRIES: usize = 5_000;

#[derive(Debug, Clone)]
struct PollerEntry {
    last_access: DateTime<Utc>,
    rate_per_second: f64,
}

#[derive(Debug)]
pub struct PollerHistory {
    ttl: Duration,
    default_rps: f64,
    capacity: usize,
    entries: Mutex<HashMap<String, PollerEntry>>,
}

impl PollerHistory {
    pub fn new(ttl: Duration, default_rps: f64) -> Self {
        Self {
            ttl,
            default_rps,
            capacity: MAX_ENTRIES,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Refresh (or create) the record for `identity`.
    ///
    /// Without an override, a first sighting is seeded with the default
    /// dispatch rate and later sightings blend in the observed poll
    /// frequency.
    pub fn update_poller_info(&self, identity: &str, rate_override: Option<f64>) {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("poller history poisoned");
        if entries.len() >= self.capacity && !entries.contains_key(identity) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(identity, _)| identity.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        let entry = entries
            .entry(identity.to_string())
            .or_insert_with(|| PollerEntry {
                last_access: now,
                rate_per_second: self.default_rps,
            });

        if let Some(rate) = rate_override {
            entry.rate_per_second = rate;
        } else if now > entry.last_access {
            let gap = (now - entry.last_access)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .as_secs_f64();
            if gap > 0.0 {
                let observed = 1.0 / gap;
                entry.rate_per_second =
                    entry.rate_per_second * (1.0 - RATE_SMOOTHING) + observed * RATE_SMOOTHING;
            }
        }
        entry.last_access = now;
    }

    /// Snapshot of all live pollers, sorted by identity. Expired entries are
    /// evicted on the way out.
    pub fn get_all_poller_info(&self) -> Vec<PollerInfo> {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("poller history poisoned");
        entries.retain(|_, entry| !Self::expired(entry, now, self.ttl));

        let mut pollers: Vec<PollerInfo> = entries
            .iter()
            .map(|(identity, entry)| PollerInfo {
                identity: identity.clone(),
                last_access_time: entry.last_access,
                rate_per_second: entry.rate_per_second,
            })
            .collect();
        pollers.sort_by(|a, b| a.identity.cmp(&b.identity));
        pollers
    }

    /// True when at least one non-expired poller record exists.
    pub fn has_pollers(&self) -> bool {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("poller history poisoned");
        entries.retain(|_, entry| !Self::expired(entry, now, self.ttl));
        !entries.is_empty()
    }

    fn expired(entry: &PollerEntry, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (now - entry.last_access).to_std() {
            Ok(age) => age > ttl,
            Err(_) => false, // last_access in the future, entry is fresh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(ttl_ms: u64) -> PollerHistory {
        PollerHistory::new(Duration::from_millis(ttl_ms), 100.0)
    }

    #[test]
    fn first_sighting_uses_default_rate() {
        let history = history(60_000);
        history.update_poller_info("poller-a", None);

        let pollers = history.get_all_poller_info();
        assert_eq!(pollers.len(), 1);
        assert_eq!(pollers[0].identity, "poller-a");
        assert_eq!(pollers[0].rate_per_second, 100.0);
    }

    #[test]
    fn explicit_rate_override_wins() {
        let history = history(60_000);
        history.update_poller_info("poller-a", None);
        history.update_poller_info("poller-a", Some(5.0));

        let pollers = history.get_all_poller_info();
        assert!(pollers[0].rate_per_second > 4.0 && pollers[0].rate_per_second < 6.0);
    }

    #[test]
    fn repeated_polls_blend_toward_observed_rate() {
        let history = history(60_000);
        history.update_poller_info("poller-a", None);
        std::thread::sleep(Duration::from_millis(20));
        history.update_poller_info("poller-a", None);

        // One ~50/s observation blended into the 100/s seed must pull the
        // estimate down but not below the observation itself.
        let rate = history.get_all_poller_info()[0].rate_per_second;
        assert!(rate < 100.0);
        assert!(rate > 1.0);
    }

    #[test]
    fn stale_entries_are_evicted() {
        let history = history(10);
        history.update_poller_info("poller-a", None);
        std::thread::sleep(Duration::from_millis(30));

        assert!(history.get_all_poller_info().is_empty());
        assert!(!history.has_pollers());
    }

    #[test]
    fn capacity_overflow_evicts_least_recently_seen() {
        let history = PollerHistory {
            ttl: Duration::from_secs(60),
            default_rps: 100.0,
            capacity: 2,
            entries: Mutex::new(HashMap::new()),
        };
        history.update_poller_info("a", None);
        std::thread::sleep(Duration::from_millis(5));
        history.update_poller_info("b", None);
        std::thread::sleep(Duration::from_millis(5));
        history.update_poller_info("c", None);

        let identities: Vec<_> = history
            .get_all_poller_info()
            .into_iter()
            .map(|p| p.identity)
            .collect();
        assert_eq!(identities, vec!["b", "c"]);

        // Refreshing an existing identity never evicts.
        history.update_poller_info("b", None);
        assert_eq!(history.get_all_poller_info().len(), 2);
    }

    #[test]
    fn snapshot_is_sorted_by_identity() {
        let history = history(60_000);
        history.update_poller_info("b", None);
        history.update_poller_info("a", None);

        let identities: Vec<_> = history
            .get_all_poller_info()
            .into_iter()
            .map(|p| p.identity)
            .collect();
        assert_eq!(identities, vec!["a", "b"]);
    }
}
