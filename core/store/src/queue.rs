//! Durable, ordered mutation queue.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use wayfarer_common::{now_millis, EntityFamily, Error, Result};

use crate::local::LocalStore;
use crate::schema::QUEUE_TABLE;
use crate::store_err;

/// Field carrying the local identifier in a `create` payload.
pub const LOCAL_ID_FIELD: &str = "localId";

/// Kind of queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl MutationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::Serialization(format!("Unknown queue action: {}", other))),
        }
    }
}

/// Replay status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Synced,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Serialization(format!("Unknown queue status: {}", other))),
        }
    }
}

/// A mutation about to be appended to the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMutation {
    pub action: MutationAction,
    pub family: EntityFamily,
    pub entity_id: String,
    pub parent_id: Option<String>,
    pub payload: Value,
}

impl NewMutation {
    /// A `create`; the payload gains a `localId` field.
    pub fn create(
        family: EntityFamily,
        local_id: impl Into<String>,
        parent_id: Option<String>,
        mut payload: Value,
    ) -> Self {
        let local_id = local_id.into();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert(LOCAL_ID_FIELD.to_string(), Value::String(local_id.clone()));
        }
        Self {
            action: MutationAction::Create,
            family,
            entity_id: local_id,
            parent_id,
            payload,
        }
    }

    pub fn update(
        family: EntityFamily,
        entity_id: impl Into<String>,
        parent_id: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            action: MutationAction::Update,
            family,
            entity_id: entity_id.into(),
            parent_id,
            payload,
        }
    }

    pub fn delete(family: EntityFamily, entity_id: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            action: MutationAction::Delete,
            family,
            entity_id: entity_id.into(),
            parent_id,
            payload: Value::Object(Default::default()),
        }
    }
}

/// A persisted queue entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    /// Auto-assigned sequence number.
    pub id: i64,
    pub action: MutationAction,
    pub family: EntityFamily,
    pub entity_id: String,
    pub parent_id: Option<String>,
    pub payload: Value,
    pub enqueued_at: i64,
    pub status: QueueStatus,
    pub error: Option<String>,
}

impl QueueEntry {
    /// Local identifier carried by a `create` payload.
    pub fn local_id(&self) -> Option<&str> {
        self.payload.get(LOCAL_ID_FIELD).and_then(Value::as_str)
    }
}

/// Entry counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub synced: usize,
    pub failed: usize,
}

const ENTRY_COLUMNS: &str =
    "seq, action, table_name, entity_id, parent_id, payload, enqueued_at, status, error";

struct RawEntry {
    seq: i64,
    action: String,
    table_name: String,
    entity_id: String,
    parent_id: Option<String>,
    payload: String,
    enqueued_at: i64,
    status: String,
    error: Option<String>,
}

fn read_entry(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        seq: row.get(0)?,
        action: row.get(1)?,
        table_name: row.get(2)?,
        entity_id: row.get(3)?,
        parent_id: row.get(4)?,
        payload: row.get(5)?,
        enqueued_at: row.get(6)?,
        status: row.get(7)?,
        error: row.get(8)?,
    })
}

fn into_entry(raw: RawEntry) -> Result<QueueEntry> {
    Ok(QueueEntry {
        id: raw.seq,
        action: raw.action.parse()?,
        family: raw.table_name.parse()?,
        entity_id: raw.entity_id,
        parent_id: raw.parent_id,
        payload: serde_json::from_str(&raw.payload)?,
        enqueued_at: raw.enqueued_at,
        status: raw.status.parse()?,
        error: raw.error,
    })
}

fn select_entries(conn: &Connection, filter: &str, status: Option<QueueStatus>) -> Result<Vec<QueueEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM {QUEUE_TABLE} WHERE {filter} ORDER BY enqueued_at, seq"
    );
    let mut stmt = conn.prepare(&sql).map_err(store_err)?;
    let rows = match status {
        Some(status) => stmt.query_map([status.as_str()], read_entry),
        None => stmt.query_map([], read_entry),
    }
    .map_err(store_err)?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(into_entry(row.map_err(store_err)?)?);
    }
    Ok(entries)
}

pub(crate) fn enqueue_in(conn: &Connection, mutation: &NewMutation) -> Result<i64> {
    conn.execute(
        &format!(
            "INSERT INTO {QUEUE_TABLE} (action, table_name, entity_id, parent_id, payload, enqueued_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')"
        ),
        params![
            mutation.action.as_str(),
            mutation.family.table(),
            mutation.entity_id,
            mutation.parent_id,
            serde_json::to_string(&mutation.payload)?,
            now_millis(),
        ],
    )
    .map_err(store_err)?;

    let seq = conn.last_insert_rowid();
    debug!(
        "Enqueued #{} {} {} {}",
        seq, mutation.action, mutation.family, mutation.entity_id
    );
    Ok(seq)
}

pub(crate) fn set_status(
    conn: &Connection,
    seq: i64,
    status: QueueStatus,
    error: Option<&str>,
) -> Result<()> {
    let updated = conn
        .execute(
            &format!("UPDATE {QUEUE_TABLE} SET status = ?1, error = ?2 WHERE seq = ?3"),
            params![status.as_str(), error, seq],
        )
        .map_err(store_err)?;

    if updated == 0 {
        return Err(Error::NotFound(format!("Queue entry #{}", seq)));
    }
    Ok(())
}

pub(crate) fn has_history(conn: &Connection, family: EntityFamily, entity_id: &str) -> Result<bool> {
    conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {QUEUE_TABLE}
             WHERE table_name = ?1 AND entity_id = ?2 AND status IN ('pending', 'failed'))"
        ),
        params![family.table(), entity_id],
        |row| row.get(0),
    )
    .map_err(store_err)
}

pub(crate) fn has_pending_after(
    conn: &Connection,
    family: EntityFamily,
    entity_id: &str,
    seq: i64,
) -> Result<bool> {
    conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {QUEUE_TABLE}
             WHERE table_name = ?1 AND entity_id = ?2 AND status = 'pending' AND seq > ?3)"
        ),
        params![family.table(), entity_id, seq],
        |row| row.get(0),
    )
    .map_err(store_err)
}

pub(crate) fn has_pending_delete(conn: &Connection, family: EntityFamily, entity_id: &str) -> Result<bool> {
    conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {QUEUE_TABLE}
             WHERE table_name = ?1 AND entity_id = ?2 AND action = 'delete' AND status = 'pending')"
        ),
        params![family.table(), entity_id],
        |row| row.get(0),
    )
    .map_err(store_err)
}

/// Drop failed entries of an entity that no longer exists.
pub(crate) fn discard_failed_for(conn: &Connection, family: EntityFamily, entity_id: &str) -> Result<usize> {
    let dropped = conn
        .execute(
            &format!(
                "DELETE FROM {QUEUE_TABLE}
                 WHERE table_name = ?1 AND entity_id = ?2 AND status = 'failed'"
            ),
            params![family.table(), entity_id],
        )
        .map_err(store_err)?;
    if dropped > 0 {
        info!("Discarded {} failed entries of deleted {} {}", dropped, family, entity_id);
    }
    Ok(dropped)
}

/// Point unsynced queue entries at a server identifier.
pub(crate) fn remap_in_queue(
    conn: &Connection,
    family: EntityFamily,
    local_id: &str,
    server_id: &str,
) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {QUEUE_TABLE}
             SET entity_id = ?1,
                 payload = CASE WHEN json_type(payload, '$.id') IS NULL
                                THEN payload ELSE json_set(payload, '$.id', ?1) END
             WHERE table_name = ?2 AND entity_id = ?3 AND status IN ('pending', 'failed')"
        ),
        params![server_id, family.table(), local_id],
    )
    .map_err(store_err)?;

    for child in family.children() {
        let Some(field) = child.parent_field() else {
            continue;
        };
        conn.execute(
            &format!(
                "UPDATE {QUEUE_TABLE}
                 SET parent_id = ?1, payload = json_set(payload, '$.{field}', ?1)
                 WHERE table_name = ?2 AND parent_id = ?3 AND status IN ('pending', 'failed')"
            ),
            params![server_id, child.table(), local_id],
        )
        .map_err(store_err)?;
    }
    Ok(())
}

/// Durable FIFO of mutations waiting for replay.
///
/// Only the sync processor moves entries out of `pending`.
#[derive(Clone)]
pub struct MutationQueue {
    store: Arc<LocalStore>,
}

impl MutationQueue {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Append a mutation. Returns its sequence number.
    pub fn enqueue(&self, mutation: &NewMutation) -> Result<i64> {
        self.store.with_conn(|conn| enqueue_in(conn, mutation))
    }

    /// Pending entries in enqueue order.
    pub fn list_pending(&self) -> Result<Vec<QueueEntry>> {
        self.store
            .with_conn(|conn| select_entries(conn, "status = ?1", Some(QueueStatus::Pending)))
    }

    /// Failed entries in enqueue order.
    pub fn list_failed(&self) -> Result<Vec<QueueEntry>> {
        self.store
            .with_conn(|conn| select_entries(conn, "status = ?1", Some(QueueStatus::Failed)))
    }

    /// Every entry in enqueue order.
    pub fn list_all(&self) -> Result<Vec<QueueEntry>> {
        self.store.with_conn(|conn| select_entries(conn, "1 = 1", None))
    }

    /// Look up a single entry.
    pub fn get(&self, seq: i64) -> Result<Option<QueueEntry>> {
        self.store.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {ENTRY_COLUMNS} FROM {QUEUE_TABLE} WHERE seq = ?1"),
                    [seq],
                    read_entry,
                )
                .optional()
                .map_err(store_err)?;
            raw.map(into_entry).transpose()
        })
    }

    pub fn mark_synced(&self, seq: i64) -> Result<()> {
        self.store
            .with_conn(|conn| set_status(conn, seq, QueueStatus::Synced, None))
    }

    pub fn mark_failed(&self, seq: i64, error: &str) -> Result<()> {
        warn!("Queue entry #{} failed: {}", seq, error);
        self.store
            .with_conn(|conn| set_status(conn, seq, QueueStatus::Failed, Some(error)))
    }

    /// Remove every synced entry. Pending and failed entries stay.
    pub fn purge_synced(&self) -> Result<usize> {
        let purged = self.store.with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM {QUEUE_TABLE} WHERE status = 'synced'"),
                [],
            )
            .map_err(store_err)
        })?;
        if purged > 0 {
            debug!("Purged {} synced queue entries", purged);
        }
        Ok(purged)
    }

    /// Put a failed entry back in line for the next replay run.
    ///
    /// The entry keeps its original position in the queue.
    pub fn retry_failed(&self, seq: i64) -> Result<()> {
        match self.get(seq)? {
            Some(entry) if entry.status == QueueStatus::Failed => {
                info!("Retrying queue entry #{}", seq);
                self.store
                    .with_conn(|conn| set_status(conn, seq, QueueStatus::Pending, None))
            }
            Some(entry) => Err(Error::InvalidInput(format!(
                "Queue entry #{} is {}, not failed",
                seq, entry.status
            ))),
            None => Err(Error::NotFound(format!("Queue entry #{}", seq))),
        }
    }

    /// Drop a failed entry for good.
    pub fn discard(&self, seq: i64) -> Result<()> {
        match self.get(seq)? {
            Some(entry) if entry.status == QueueStatus::Failed => {
                info!("Discarding queue entry #{}", seq);
                self.store.with_conn(|conn| {
                    conn.execute(&format!("DELETE FROM {QUEUE_TABLE} WHERE seq = ?1"), [seq])
                        .map_err(store_err)?;
                    Ok(())
                })
            }
            Some(entry) => Err(Error::InvalidInput(format!(
                "Queue entry #{} is {}, only failed entries can be discarded",
                seq, entry.status
            ))),
            None => Err(Error::NotFound(format!("Queue entry #{}", seq))),
        }
    }

    /// Whether an entity has pending or failed entries.
    pub fn has_history(&self, family: EntityFamily, entity_id: &str) -> Result<bool> {
        self.store
            .with_conn(|conn| has_history(conn, family, entity_id))
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        self.store.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT status, COUNT(*) FROM {QUEUE_TABLE} GROUP BY status"
                ))
                .map_err(store_err)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(store_err)?;

            let mut counts = QueueCounts::default();
            for row in rows {
                let (status, count) = row.map_err(store_err)?;
                match status.parse::<QueueStatus>()? {
                    QueueStatus::Pending => counts.pending = count as usize,
                    QueueStatus::Synced => counts.synced = count as usize,
                    QueueStatus::Failed => counts.failed = count as usize,
                }
            }
            Ok(counts)
        })
    }
}
