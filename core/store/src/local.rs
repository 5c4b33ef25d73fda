//! SQLite-backed local store for entity tables.
//!
//! Rows keep the full JSON body next to a few extracted columns
//! (`parent_id`, `sort_key`, `synced`) so that queries by parent and by
//! `(parent, secondary key)` hit an index.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use wayfarer_common::{id_from_value, now_millis, parse_timestamp_millis, EntityFamily, Error, Result};

use crate::queue::{self, NewMutation};
use crate::schema;
use crate::store_err;

/// Field carrying the synced flag inside a record body.
pub const SYNCED_FIELD: &str = "_synced";

/// A single entity row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub family: EntityFamily,
    pub id: String,
    pub parent_id: Option<String>,
    pub sort_key: Option<String>,
    pub synced: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub body: Value,
}

impl StoredRecord {
    /// Build a record from a JSON object.
    ///
    /// The identifier and parent identifier are normalized to strings
    /// (the backend sends numbers), and `_synced` is written into the body.
    ///
    /// # Errors
    /// - Body is not an object
    /// - Body has no usable `id`
    pub fn from_json(family: EntityFamily, mut body: Value, synced: bool) -> Result<Self> {
        let obj = body.as_object_mut().ok_or_else(|| {
            Error::InvalidInput(format!("{} record must be a JSON object", family))
        })?;

        let id = obj
            .get("id")
            .and_then(id_from_value)
            .ok_or_else(|| Error::InvalidInput(format!("{} record has no id", family)))?;
        obj.insert("id".to_string(), Value::String(id.clone()));

        let parent_id = match family.parent_field() {
            Some(field) => {
                let parent = obj.get(field).and_then(id_from_value);
                if let Some(ref p) = parent {
                    obj.insert(field.to_string(), Value::String(p.clone()));
                }
                parent
            }
            None => None,
        };

        let sort_key = family
            .sort_field()
            .and_then(|field| obj.get(field))
            .and_then(sort_value);

        let now = now_millis();
        let created_at = timestamp_field(obj, "createdAt").unwrap_or(now);
        let updated_at = timestamp_field(obj, "updatedAt").unwrap_or(created_at);

        obj.insert(SYNCED_FIELD.to_string(), Value::Bool(synced));

        Ok(Self {
            family,
            id,
            parent_id,
            sort_key,
            synced,
            created_at,
            updated_at,
            body,
        })
    }

    /// Set the parent identifier, keeping the body in step.
    pub fn set_parent(&mut self, parent_id: &str) {
        if let Some(field) = self.family.parent_field() {
            if let Some(obj) = self.body.as_object_mut() {
                obj.insert(field.to_string(), Value::String(parent_id.to_string()));
            }
            self.parent_id = Some(parent_id.to_string());
        }
    }

    /// Set the synced flag, keeping the body in step.
    pub fn set_synced(&mut self, synced: bool) {
        if let Some(obj) = self.body.as_object_mut() {
            obj.insert(SYNCED_FIELD.to_string(), Value::Bool(synced));
        }
        self.synced = synced;
    }

    /// Replace the identifier, keeping the body in step.
    pub fn rekey(&mut self, id: &str) {
        if let Some(obj) = self.body.as_object_mut() {
            obj.insert("id".to_string(), Value::String(id.to_string()));
        }
        self.id = id.to_string();
    }
}

fn sort_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn timestamp_field(obj: &Map<String, Value>, field: &str) -> Option<i64> {
    match obj.get(field)? {
        Value::String(s) => parse_timestamp_millis(s),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Row filter for [`LocalStore::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Every row in the table.
    All,
    /// Rows under a parent.
    Parent(String),
    /// Rows under a parent whose secondary key is within `[from, to]`.
    ParentRange {
        parent: String,
        from: Option<String>,
        to: Option<String>,
    },
    /// Rows not yet confirmed by the server.
    Unsynced,
}

/// Outcome of reconciling a scope against a server list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Rows written from the server list.
    pub written: usize,
    /// Server rows skipped because of an unsynced local edit or a pending delete.
    pub kept_local: usize,
    /// Synced rows removed because the server no longer lists them.
    pub pruned: usize,
}

const ROW_COLUMNS: &str = "id, parent_id, sort_key, synced, created_at, updated_at, body";

struct RawRow {
    id: String,
    parent_id: Option<String>,
    sort_key: Option<String>,
    synced: bool,
    created_at: i64,
    updated_at: i64,
    body: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        sort_key: row.get(2)?,
        synced: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        body: row.get(6)?,
    })
}

fn into_record(family: EntityFamily, raw: RawRow) -> Result<StoredRecord> {
    Ok(StoredRecord {
        family,
        id: raw.id,
        parent_id: raw.parent_id,
        sort_key: raw.sort_key,
        synced: raw.synced,
        created_at: raw.created_at,
        updated_at: raw.updated_at,
        body: serde_json::from_str(&raw.body)?,
    })
}

pub(crate) fn get_record(
    conn: &Connection,
    family: EntityFamily,
    id: &str,
) -> Result<Option<StoredRecord>> {
    let sql = format!("SELECT {ROW_COLUMNS} FROM {} WHERE id = ?1", family.table());
    let raw = conn
        .query_row(&sql, [id], read_row)
        .optional()
        .map_err(store_err)?;
    raw.map(|r| into_record(family, r)).transpose()
}

pub(crate) fn query_records(
    conn: &Connection,
    family: EntityFamily,
    predicate: &Predicate,
) -> Result<Vec<StoredRecord>> {
    let table = family.table();
    let order = "ORDER BY sort_key IS NULL, sort_key, created_at, id";

    let (filter, args): (&str, Vec<Option<String>>) = match predicate {
        Predicate::All => ("1 = 1", vec![]),
        Predicate::Parent(parent) => ("parent_id = ?1", vec![Some(parent.clone())]),
        Predicate::ParentRange { parent, from, to } => (
            "parent_id = ?1 AND (?2 IS NULL OR sort_key >= ?2) AND (?3 IS NULL OR sort_key <= ?3)",
            vec![Some(parent.clone()), from.clone(), to.clone()],
        ),
        Predicate::Unsynced => ("synced = 0", vec![]),
    };

    let sql = format!("SELECT {ROW_COLUMNS} FROM {table} WHERE {filter} {order}");
    let mut stmt = conn.prepare(&sql).map_err(store_err)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), read_row)
        .map_err(store_err)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(into_record(family, row.map_err(store_err)?)?);
    }
    Ok(records)
}

pub(crate) fn put_record(conn: &Connection, record: &StoredRecord) -> Result<()> {
    let sql = format!(
        "INSERT OR REPLACE INTO {} ({ROW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        record.family.table()
    );
    conn.execute(
        &sql,
        params![
            record.id,
            record.parent_id,
            record.sort_key,
            record.synced,
            record.created_at,
            record.updated_at,
            serde_json::to_string(&record.body)?,
        ],
    )
    .map_err(store_err)?;
    Ok(())
}

pub(crate) fn delete_record(conn: &Connection, family: EntityFamily, id: &str) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", family.table());
    let removed = conn.execute(&sql, [id]).map_err(store_err)?;
    Ok(removed > 0)
}

/// Rewrite every local reference to `local_id` so it points at `server_id`.
///
/// Covers the entity row itself, child rows that use it as their parent,
/// and queue entries that have not synced yet.
pub(crate) fn remap_identifier(
    conn: &Connection,
    family: EntityFamily,
    local_id: &str,
    server_id: &str,
) -> Result<()> {
    if let Some(mut record) = get_record(conn, family, local_id)? {
        delete_record(conn, family, local_id)?;
        record.rekey(server_id);
        put_record(conn, &record)?;
    }

    for child in family.children() {
        let Some(field) = child.parent_field() else {
            continue;
        };
        let sql = format!(
            "UPDATE {} SET parent_id = ?1, body = json_set(body, '$.{field}', ?1) WHERE parent_id = ?2",
            child.table()
        );
        let moved = conn
            .execute(&sql, params![server_id, local_id])
            .map_err(store_err)?;
        if moved > 0 {
            debug!("Re-parented {} {} rows {} -> {}", moved, child, local_id, server_id);
        }
    }

    queue::remap_in_queue(conn, family, local_id, server_id)
}

/// Remove synced child rows of a deleted parent. Unsynced children stay.
pub(crate) fn prune_children(conn: &Connection, family: EntityFamily, parent_id: &str) -> Result<usize> {
    let mut pruned = 0;
    for child in family.children() {
        let sql = format!("DELETE FROM {} WHERE parent_id = ?1 AND synced = 1", child.table());
        pruned += conn.execute(&sql, [parent_id]).map_err(store_err)?;
    }
    if pruned > 0 {
        debug!("Pruned {} synced child rows of {} {}", pruned, family, parent_id);
    }
    Ok(pruned)
}

fn reconcile_scope(
    conn: &Connection,
    family: EntityFamily,
    predicate: &Predicate,
    incoming: &[StoredRecord],
) -> Result<Reconciliation> {
    let mut outcome = Reconciliation::default();
    let existing = query_records(conn, family, predicate)?;

    for record in incoming {
        let keep_local = existing
            .iter()
            .any(|row| row.id == record.id && !row.synced)
            || queue::has_pending_delete(conn, family, &record.id)?;
        if keep_local {
            outcome.kept_local += 1;
        } else {
            put_record(conn, record)?;
            outcome.written += 1;
        }
    }

    for row in existing.iter().filter(|row| row.synced) {
        if !incoming.iter().any(|record| record.id == row.id) {
            delete_record(conn, family, &row.id)?;
            outcome.pruned += 1;
        }
    }

    Ok(outcome)
}

/// A handle for running several store operations in one transaction.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    /// Get a row by id.
    pub fn get(&self, family: EntityFamily, id: &str) -> Result<Option<StoredRecord>> {
        get_record(self.conn, family, id)
    }

    /// Insert or replace a row.
    pub fn put(&self, record: &StoredRecord) -> Result<()> {
        put_record(self.conn, record)
    }

    /// Delete a row; returns whether it existed.
    pub fn delete(&self, family: EntityFamily, id: &str) -> Result<bool> {
        delete_record(self.conn, family, id)
    }

    /// Append a mutation to the queue.
    pub fn enqueue(&self, mutation: &NewMutation) -> Result<i64> {
        queue::enqueue_in(self.conn, mutation)
    }

    /// Mark a queue entry as synced.
    pub fn mark_synced(&self, seq: i64) -> Result<()> {
        queue::set_status(self.conn, seq, queue::QueueStatus::Synced, None)
    }

    /// Whether an entity has pending or failed queue entries.
    pub fn has_queue_history(&self, family: EntityFamily, entity_id: &str) -> Result<bool> {
        queue::has_history(self.conn, family, entity_id)
    }

    /// Whether pending entries for an entity exist after `seq`.
    pub fn has_pending_after(&self, family: EntityFamily, entity_id: &str, seq: i64) -> Result<bool> {
        queue::has_pending_after(self.conn, family, entity_id, seq)
    }

    /// Remove synced child rows of a deleted parent.
    pub fn prune_children(&self, family: EntityFamily, parent_id: &str) -> Result<usize> {
        prune_children(self.conn, family, parent_id)
    }

    /// Drop failed queue entries of an entity that was deleted.
    pub fn discard_failed(&self, family: EntityFamily, entity_id: &str) -> Result<usize> {
        queue::discard_failed_for(self.conn, family, entity_id)
    }

    /// Replace a local identifier with its server identifier everywhere.
    pub fn remap_identifier(
        &self,
        family: EntityFamily,
        local_id: &str,
        server_id: &str,
    ) -> Result<()> {
        remap_identifier(self.conn, family, local_id, server_id)
    }
}

/// Local store manager using SQLite.
///
/// The connection sits behind a mutex: the store is a single-writer
/// resource shared by the entity services and the sync processor.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Create or open a local store database and migrate it.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref()).map_err(store_err)?;
        let version = schema::migrate(&mut conn)?;
        info!(
            "Local store opened at {} (schema v{})",
            db_path.as_ref().display(),
            version
        );
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(store_err)?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::LocalStore("Connection lock poisoned".to_string()))?;
        f(&conn)
    }

    /// Run `f` inside a single SQLite transaction.
    ///
    /// Either everything `f` wrote is committed or nothing is.
    pub fn transaction<T>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::LocalStore("Connection lock poisoned".to_string()))?;
        let tx = conn.transaction().map_err(store_err)?;
        let out = f(&StoreTx { conn: &*tx })?;
        tx.commit().map_err(store_err)?;
        Ok(out)
    }

    /// Current schema version.
    pub fn schema_version(&self) -> Result<u32> {
        self.with_conn(schema::current_version)
    }

    /// Get a row by id.
    pub fn get(&self, family: EntityFamily, id: &str) -> Result<Option<StoredRecord>> {
        self.with_conn(|conn| get_record(conn, family, id))
    }

    /// Query rows of a family.
    pub fn query(&self, family: EntityFamily, predicate: &Predicate) -> Result<Vec<StoredRecord>> {
        self.with_conn(|conn| query_records(conn, family, predicate))
    }

    /// Insert or replace a row by id.
    pub fn put(&self, record: &StoredRecord) -> Result<()> {
        self.with_conn(|conn| put_record(conn, record))
    }

    /// Insert or replace several rows atomically.
    pub fn bulk_put(&self, records: &[StoredRecord]) -> Result<()> {
        self.transaction(|tx| {
            for record in records {
                tx.put(record)?;
            }
            Ok(())
        })
    }

    /// Delete a row; returns whether it existed.
    pub fn delete(&self, family: EntityFamily, id: &str) -> Result<bool> {
        self.with_conn(|conn| delete_record(conn, family, id))
    }

    /// Delete several rows atomically; returns how many existed.
    pub fn bulk_delete(&self, family: EntityFamily, ids: &[String]) -> Result<usize> {
        self.transaction(|tx| {
            let mut removed = 0;
            for id in ids {
                if tx.delete(family, id)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    /// Replace the rows matching `predicate` with a fresh server list.
    ///
    /// Unsynced local rows are never overwritten or pruned, and rows with a
    /// pending delete are not brought back. Synced rows the server no longer
    /// lists are removed.
    pub fn reconcile(
        &self,
        family: EntityFamily,
        predicate: &Predicate,
        incoming: &[StoredRecord],
    ) -> Result<Reconciliation> {
        let outcome =
            self.transaction(|tx| reconcile_scope(tx.conn, family, predicate, incoming))?;
        if outcome.pruned > 0 {
            info!("Pruned {} {} rows absent from server list", outcome.pruned, family);
        }
        Ok(outcome)
    }
}
