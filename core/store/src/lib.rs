//! Wayfarer local store.
//!
//! This module provides the on-device half of the offline-first engine:
//! - Schema-versioned SQLite tables for every entity family
//! - The freshness tracker deciding when reads go to the network
//! - The durable mutation queue replayed by the sync processor
//! - Single-transaction writes so a local row and its queue entry commit together

pub mod freshness;
pub mod local;
pub mod queue;
pub mod schema;

pub use freshness::{FreshnessEntry, FreshnessTracker, DEFAULT_TTL};
pub use local::{LocalStore, Predicate, Reconciliation, StoreTx, StoredRecord, SYNCED_FIELD};
pub use queue::{
    MutationAction, MutationQueue, NewMutation, QueueCounts, QueueEntry, QueueStatus,
    LOCAL_ID_FIELD,
};
pub use schema::SCHEMA_VERSION;

use wayfarer_common::Error;

/// Map a SQLite failure onto the local store error.
pub(crate) fn store_err(err: rusqlite::Error) -> Error {
    Error::LocalStore(err.to_string())
}
