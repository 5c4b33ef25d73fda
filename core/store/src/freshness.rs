//! TTL-based freshness tracking for remote reads.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use wayfarer_common::{now_millis, Result};

use crate::local::LocalStore;
use crate::schema::FRESHNESS_TABLE;
use crate::store_err;

/// Default time a fetched resource is considered fresh.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// A resource key and when it was last fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreshnessEntry {
    pub resource_key: String,
    pub fetched_at: i64,
}

/// Decides whether a read should go to the network.
///
/// Absence of an entry means the resource was never fetched and is stale.
#[derive(Clone)]
pub struct FreshnessTracker {
    store: Arc<LocalStore>,
}

impl FreshnessTracker {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Check staleness against the current time.
    pub fn is_stale(&self, resource_key: &str, ttl: Duration) -> Result<bool> {
        self.is_stale_at(resource_key, ttl, now_millis())
    }

    /// Check staleness against an explicit time (epoch ms).
    pub fn is_stale_at(&self, resource_key: &str, ttl: Duration, now: i64) -> Result<bool> {
        let stale = match self.last_fetched(resource_key)? {
            Some(fetched_at) => now - fetched_at > i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            None => true,
        };
        Ok(stale)
    }

    /// Record a successful fetch now.
    pub fn mark_fresh(&self, resource_key: &str) -> Result<()> {
        self.mark_fresh_at(resource_key, now_millis())
    }

    /// Record a successful fetch at an explicit time (epoch ms).
    pub fn mark_fresh_at(&self, resource_key: &str, fetched_at: i64) -> Result<()> {
        debug!("Marking {} fresh", resource_key);
        self.store.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {FRESHNESS_TABLE} (resource_key, fetched_at) VALUES (?1, ?2)"
                ),
                params![resource_key, fetched_at],
            )
            .map_err(store_err)?;
            Ok(())
        })
    }

    /// When a resource was last fetched, if ever.
    pub fn last_fetched(&self, resource_key: &str) -> Result<Option<i64>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT fetched_at FROM {FRESHNESS_TABLE} WHERE resource_key = ?1"),
                [resource_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)
        })
    }

    /// Forget a resource so the next read goes to the network.
    pub fn invalidate(&self, resource_key: &str) -> Result<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM {FRESHNESS_TABLE} WHERE resource_key = ?1"),
                [resource_key],
            )
            .map_err(store_err)?;
            Ok(())
        })
    }

    /// Forget every resource under a key prefix.
    pub fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
        self.store.with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM {FRESHNESS_TABLE} WHERE substr(resource_key, 1, length(?1)) = ?1"),
                [prefix],
            )
            .map_err(store_err)
        })
    }

    /// All tracked resources, most recent first.
    pub fn entries(&self) -> Result<Vec<FreshnessEntry>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT resource_key, fetched_at FROM {FRESHNESS_TABLE} ORDER BY fetched_at DESC, resource_key"
                ))
                .map_err(store_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(FreshnessEntry {
                        resource_key: row.get(0)?,
                        fetched_at: row.get(1)?,
                    })
                })
                .map_err(store_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tracker() -> FreshnessTracker {
        FreshnessTracker::new(Arc::new(LocalStore::in_memory().unwrap()))
    }

    #[test]
    fn test_unknown_key_is_stale() {
        let tracker = tracker();
        assert!(tracker.is_stale("trips", DEFAULT_TTL).unwrap());
    }

    #[test]
    fn test_ttl_boundaries() {
        let tracker = tracker();
        let ttl = Duration::from_millis(1_800_000);
        let now = now_millis();

        tracker.mark_fresh_at("trips", now - 1_900_000).unwrap();
        assert!(tracker.is_stale_at("trips", ttl, now).unwrap());

        tracker.mark_fresh_at("trips", now - 100_000).unwrap();
        assert!(!tracker.is_stale_at("trips", ttl, now).unwrap());
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let tracker = tracker();
        let now = now_millis();
        tracker.mark_fresh_at("cities", now - 86_400_000).unwrap();
        assert!(!tracker.is_stale_at("cities", Duration::MAX, now).unwrap());
    }

    #[test]
    fn test_mark_fresh_then_invalidate() {
        let tracker = tracker();
        tracker.mark_fresh("trips/1/events").unwrap();
        tracker.mark_fresh("trips/1/notes").unwrap();
        tracker.mark_fresh("trips").unwrap();
        assert!(!tracker.is_stale("trips/1/events", DEFAULT_TTL).unwrap());

        tracker.invalidate("trips").unwrap();
        assert!(tracker.is_stale("trips", DEFAULT_TTL).unwrap());

        assert_eq!(tracker.invalidate_prefix("trips/1/").unwrap(), 2);
        assert!(tracker.entries().unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_stale_iff_age_exceeds_ttl(age in 0i64..10_000_000, ttl_ms in 0u64..10_000_000) {
            let tracker = tracker();
            let now = 20_000_000;
            tracker.mark_fresh_at("k", now - age).unwrap();
            let stale = tracker.is_stale_at("k", Duration::from_millis(ttl_ms), now).unwrap();
            prop_assert_eq!(stale, age > ttl_ms as i64);
        }
    }
}
