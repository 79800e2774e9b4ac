//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration transforms the schema
//! from version N to N+1.

use rusqlite::Connection;

use medshare_core::now_millis;

use crate::error::{LedgerError, Result};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// Idempotent: safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(LedgerError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(LedgerError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: records, grants, and the audit trail.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE records (
            record_id BLOB PRIMARY KEY,       -- 32 bytes
            owner TEXT NOT NULL,
            uploader TEXT,                    -- doctor who uploaded, if any
            ciphertext BLOB NOT NULL,         -- 32 bytes, blob locator
            capsule BLOB NOT NULL,            -- 32 bytes, blob locator
            created_at INTEGER NOT NULL,
            grant_ordinal INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE grants (
            grant_id BLOB PRIMARY KEY,        -- 32 bytes
            record_id BLOB NOT NULL REFERENCES records(record_id),
            ordinal INTEGER NOT NULL,         -- request order within the record
            viewer TEXT NOT NULL,
            state TEXT NOT NULL,              -- requested | approved | revoked
            rekey_digest BLOB,                -- set while approved
            rekey_capsule BLOB,               -- set while approved
            version INTEGER NOT NULL,
            requested_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,

            UNIQUE(record_id, ordinal)
        );

        CREATE TABLE events (
            record_id BLOB NOT NULL REFERENCES records(record_id),
            seq INTEGER NOT NULL,
            at INTEGER NOT NULL,
            action TEXT NOT NULL,
            grant_id BLOB,
            actor TEXT NOT NULL,
            PRIMARY KEY (record_id, seq)
        );

        CREATE INDEX idx_grants_record_viewer ON grants(record_id, viewer);
        "#,
    )?;

    Ok(())
}

/// Migration v2: the role each grant was requested under.
///
/// Grants written before v2 were always requested as viewers.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE grants ADD COLUMN viewer_role TEXT NOT NULL DEFAULT 'viewer';
        "#,
    )?;

    Ok(())
}
