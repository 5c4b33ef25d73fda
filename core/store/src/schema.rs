//! Versioned, additive schema for the local store.
//!
//! The schema version lives in SQLite's `user_version` pragma. Migrations
//! only ever create tables and indexes, so opening an older database never
//! loses rows.

use rusqlite::Connection;
use tracing::{debug, info};

use wayfarer_common::{EntityFamily, Error, Result};

use crate::store_err;

/// Name of the mutation queue table.
pub const QUEUE_TABLE: &str = "mutation_queue";

/// Name of the freshness table.
pub const FRESHNESS_TABLE: &str = "freshness";

/// A single additive schema step.
struct Migration {
    version: u32,
    description: &'static str,
    statements: fn() -> String,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "core entity tables, freshness and mutation queue",
        statements: v1_statements,
    },
    Migration {
        version: 2,
        description: "city and saved place tables",
        statements: v2_statements,
    },
    Migration {
        version: 3,
        description: "queue lookup by entity",
        statements: v3_statements,
    },
];

/// Latest schema version known to this build.
pub const SCHEMA_VERSION: u32 = 3;

fn entity_table(family: EntityFamily) -> String {
    let t = family.table();
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {t} (
            id TEXT PRIMARY KEY,
            parent_id TEXT,
            sort_key TEXT,
            synced INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            body TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{t}_parent ON {t}(parent_id);
        CREATE INDEX IF NOT EXISTS idx_{t}_parent_sort ON {t}(parent_id, sort_key);
        "#
    )
}

fn v1_statements() -> String {
    let mut sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {FRESHNESS_TABLE} (
            resource_key TEXT PRIMARY KEY,
            fetched_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS {QUEUE_TABLE} (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            table_name TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            parent_id TEXT,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_queue_status ON {QUEUE_TABLE}(status, enqueued_at);
        "#
    );

    for family in [
        EntityFamily::Trip,
        EntityFamily::Event,
        EntityFamily::Packing,
        EntityFamily::Document,
        EntityFamily::Expense,
        EntityFamily::Note,
    ] {
        sql.push_str(&entity_table(family));
    }
    sql
}

fn v2_statements() -> String {
    let mut sql = entity_table(EntityFamily::City);
    sql.push_str(&entity_table(EntityFamily::Place));
    sql
}

fn v3_statements() -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS idx_queue_entity ON {QUEUE_TABLE}(table_name, entity_id);"
    )
}

/// Read the schema version stored in the database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(store_err)
}

/// Bring the database up to [`SCHEMA_VERSION`].
///
/// Each step runs in its own transaction together with the version bump.
///
/// # Errors
/// - The database was written by a newer build
/// - A migration statement fails
pub fn migrate(conn: &mut Connection) -> Result<u32> {
    let from = current_version(conn)?;

    if from > SCHEMA_VERSION {
        return Err(Error::LocalStore(format!(
            "Database schema version {} is newer than supported version {}",
            from, SCHEMA_VERSION
        )));
    }

    let mut version = from;
    for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
        info!(
            "Applying schema migration {}: {}",
            migration.version, migration.description
        );

        let tx = conn.transaction().map_err(store_err)?;
        tx.execute_batch(&(migration.statements)())
            .map_err(store_err)?;
        tx.pragma_update(None, "user_version", migration.version)
            .map_err(store_err)?;
        tx.commit().map_err(store_err)?;

        version = migration.version;
    }

    debug!("Local store schema at version {}", version);
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn test_fresh_database_reaches_latest_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);

        let version = migrate(&mut conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        for family in EntityFamily::ALL {
            assert!(table_exists(&conn, family.table()), "missing {}", family);
        }
        assert!(table_exists(&conn, QUEUE_TABLE));
        assert!(table_exists(&conn, FRESHNESS_TABLE));
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(migrate(&mut conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_upgrade_keeps_existing_rows() {
        let mut conn = Connection::open_in_memory().unwrap();

        // Simulate a database created by a build that only knew version 1.
        conn.execute_batch(&v1_statements()).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO trips (id, synced, created_at, updated_at, body) VALUES ('7', 1, 0, 0, '{}')",
            [],
        )
        .unwrap();
        assert!(!table_exists(&conn, "cities"));

        assert_eq!(migrate(&mut conn).unwrap(), SCHEMA_VERSION);
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);

        assert!(table_exists(&conn, "cities"));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM trips", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();

        let err = migrate(&mut conn).unwrap_err();
        assert!(matches!(err, Error::LocalStore(_)));
    }
}
