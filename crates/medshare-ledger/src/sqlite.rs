//! SQLite implementation of the Ledger trait.
//!
//! The durable backend: state survives process restarts. Uses rusqlite with
//! bundled SQLite, wrapped in async via `tokio::task::spawn_blocking`.
//! Every mutation runs in an immediate transaction and updates grants with
//! a version check, so the database is the serialization point for a
//! record's grant set.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use medshare_core::{now_millis, Digest, GrantId, Locator, PrincipalId, RecordId, Role};

use crate::error::{LedgerError, Result};
use crate::grant::{
    AccessGrant, GrantState, LedgerAction, LedgerEvent, NewRecord, RecordMetadata, RekeyRef,
    Revocation,
};
use crate::migration;
use crate::snapshot::{LedgerSnapshot, RecordSnapshot};
use crate::traits::Ledger;

const RECORD_COLUMNS: &str =
    "record_id, owner, uploader, ciphertext, capsule, created_at, grant_ordinal";

const GRANT_COLUMNS: &str = "grant_id, record_id, viewer, viewer_role, state, rekey_digest, \
     rekey_capsule, version, requested_at, updated_at";

/// SQLite-backed ledger.
///
/// Thread-safe via an internal mutex around the connection. That mutex
/// serializes mutations across all records, not per record: this backend
/// trades per-record concurrency for durability. Use [`MemoryLedger`] when
/// unrelated records must proceed in parallel.
///
/// [`MemoryLedger`]: crate::MemoryLedger
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Open a ledger database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory ledger database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Load a snapshot into this ledger.
    ///
    /// Fails with `DuplicateRecord` if any snapshot record is already
    /// present; nothing is written in that case.
    pub async fn restore(&self, snapshot: LedgerSnapshot) -> Result<()> {
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for record in &snapshot.records {
                let metadata = &record.metadata;
                if load_record(&tx, &metadata.id)?.is_some() {
                    return Err(LedgerError::DuplicateRecord(metadata.id));
                }
                insert_record(&tx, metadata)?;
                for (ordinal, grant) in record.grants.iter().enumerate() {
                    insert_grant(&tx, grant, ordinal as u64)?;
                }
                for event in &record.events {
                    insert_event(&tx, event)?;
                }
            }
            tx.commit()?;
            debug!(records = snapshot.len(), "ledger restored from snapshot");
            Ok(())
        })
        .await
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| LedgerError::Poisoned("sqlite connection".into()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| LedgerError::Task(e.to_string()))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row conversion
// ─────────────────────────────────────────────────────────────────────────────

fn conversion_error(ty: Type, err: LedgerError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, ty, Box::new(err))
}

fn blob32(bytes: Vec<u8>) -> rusqlite::Result<[u8; 32]> {
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        conversion_error(
            Type::Blob,
            LedgerError::InvalidData(format!("expected 32-byte blob, got {} bytes", len)),
        )
    })
}

fn digest_col(row: &Row<'_>, name: &str) -> rusqlite::Result<Digest> {
    Ok(Digest::from_bytes(blob32(row.get(name)?)?))
}

fn principal_col(row: &Row<'_>, name: &str) -> rusqlite::Result<PrincipalId> {
    let raw: String = row.get(name)?;
    PrincipalId::new(raw)
        .map_err(|e| conversion_error(Type::Text, LedgerError::InvalidData(e.to_string())))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<RecordMetadata> {
    let uploader = match row.get::<_, Option<String>>("uploader")? {
        Some(raw) => Some(PrincipalId::new(raw).map_err(|e| {
            conversion_error(Type::Text, LedgerError::InvalidData(e.to_string()))
        })?),
        None => None,
    };
    Ok(RecordMetadata {
        id: RecordId(digest_col(row, "record_id")?),
        owner: principal_col(row, "owner")?,
        uploader,
        ciphertext: Locator(digest_col(row, "ciphertext")?),
        capsule: Locator(digest_col(row, "capsule")?),
        created_at: row.get("created_at")?,
        grant_ordinal: row.get::<_, i64>("grant_ordinal")? as u64,
    })
}

fn row_to_grant(row: &Row<'_>) -> rusqlite::Result<AccessGrant> {
    let state: String = row.get("state")?;
    let state: GrantState = state
        .parse()
        .map_err(|e| conversion_error(Type::Text, e))?;

    let rekey = match (
        row.get::<_, Option<Vec<u8>>>("rekey_digest")?,
        row.get::<_, Option<Vec<u8>>>("rekey_capsule")?,
    ) {
        (Some(digest), Some(capsule)) => Some(RekeyRef {
            rekey: Digest::from_bytes(blob32(digest)?),
            capsule: Locator(Digest::from_bytes(blob32(capsule)?)),
        }),
        _ => None,
    };

    let role: String = row.get("viewer_role")?;
    let role = role
        .parse::<Role>()
        .map_err(|e| conversion_error(Type::Text, LedgerError::InvalidData(e.to_string())))?;

    Ok(AccessGrant {
        id: GrantId(digest_col(row, "grant_id")?),
        record_id: RecordId(digest_col(row, "record_id")?),
        viewer: principal_col(row, "viewer")?,
        role,
        state,
        rekey,
        version: row.get::<_, i64>("version")? as u64,
        requested_at: row.get("requested_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<LedgerEvent> {
    let action: String = row.get("action")?;
    let action: LedgerAction = action
        .parse()
        .map_err(|e| conversion_error(Type::Text, e))?;
    let grant_id = match row.get::<_, Option<Vec<u8>>>("grant_id")? {
        Some(bytes) => Some(GrantId::from_bytes(blob32(bytes)?)),
        None => None,
    };

    Ok(LedgerEvent {
        seq: row.get::<_, i64>("seq")? as u64,
        at: row.get("at")?,
        action,
        record_id: RecordId(digest_col(row, "record_id")?),
        grant_id,
        actor: principal_col(row, "actor")?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

fn load_record(conn: &Connection, id: &RecordId) -> Result<Option<RecordMetadata>> {
    let sql = format!("SELECT {} FROM records WHERE record_id = ?1", RECORD_COLUMNS);
    Ok(conn
        .query_row(&sql, params![&id.as_bytes()[..]], row_to_record)
        .optional()?)
}

fn require_record(conn: &Connection, id: &RecordId) -> Result<RecordMetadata> {
    load_record(conn, id)?.ok_or_else(|| LedgerError::NotFound(format!("record {}", id)))
}

fn load_grant(conn: &Connection, id: &GrantId) -> Result<AccessGrant> {
    let sql = format!("SELECT {} FROM grants WHERE grant_id = ?1", GRANT_COLUMNS);
    conn.query_row(&sql, params![&id.as_bytes()[..]], row_to_grant)
        .optional()?
        .ok_or_else(|| LedgerError::NotFound(format!("grant {}", id)))
}

fn load_grants(conn: &Connection, record_id: &RecordId) -> Result<Vec<AccessGrant>> {
    let sql = format!(
        "SELECT {} FROM grants WHERE record_id = ?1 ORDER BY ordinal",
        GRANT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let grants = stmt
        .query_map(params![&record_id.as_bytes()[..]], row_to_grant)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(grants)
}

fn load_events(conn: &Connection, record_id: &RecordId) -> Result<Vec<LedgerEvent>> {
    let mut stmt = conn.prepare(
        "SELECT record_id, seq, at, action, grant_id, actor
         FROM events WHERE record_id = ?1 ORDER BY seq",
    )?;
    let events = stmt
        .query_map(params![&record_id.as_bytes()[..]], row_to_event)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(events)
}

fn insert_record(conn: &Connection, record: &RecordMetadata) -> Result<()> {
    conn.execute(
        "INSERT INTO records (
            record_id, owner, uploader, ciphertext, capsule, created_at, grant_ordinal
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &record.id.as_bytes()[..],
            record.owner.as_str(),
            record.uploader.as_ref().map(|u| u.as_str()),
            &record.ciphertext.digest().as_bytes()[..],
            &record.capsule.digest().as_bytes()[..],
            record.created_at,
            record.grant_ordinal as i64,
        ],
    )?;
    Ok(())
}

fn insert_grant(conn: &Connection, grant: &AccessGrant, ordinal: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO grants (
            grant_id, record_id, ordinal, viewer, viewer_role, state, rekey_digest,
            rekey_capsule, version, requested_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &grant.id.as_bytes()[..],
            &grant.record_id.as_bytes()[..],
            ordinal as i64,
            grant.viewer.as_str(),
            grant.role.as_str(),
            grant.state.as_str(),
            grant.rekey.as_ref().map(|r| r.rekey.as_bytes().to_vec()),
            grant.rekey.as_ref().map(|r| r.capsule.digest().as_bytes().to_vec()),
            grant.version as i64,
            grant.requested_at,
            grant.updated_at,
        ],
    )?;
    Ok(())
}

/// Write a transitioned grant, provided nobody changed it since it was read.
fn update_grant(conn: &Connection, grant: &AccessGrant, read_version: u64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE grants
         SET state = ?1, rekey_digest = ?2, rekey_capsule = ?3, version = ?4, updated_at = ?5
         WHERE grant_id = ?6 AND version = ?7",
        params![
            grant.state.as_str(),
            grant.rekey.as_ref().map(|r| r.rekey.as_bytes().to_vec()),
            grant.rekey.as_ref().map(|r| r.capsule.digest().as_bytes().to_vec()),
            grant.version as i64,
            grant.updated_at,
            &grant.id.as_bytes()[..],
            read_version as i64,
        ],
    )?;
    if changed != 1 {
        return Err(LedgerError::InvalidData(format!(
            "grant {} changed underneath version {}",
            grant.id, read_version
        )));
    }
    Ok(())
}

fn insert_event(conn: &Connection, event: &LedgerEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO events (record_id, seq, at, action, grant_id, actor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &event.record_id.as_bytes()[..],
            event.seq as i64,
            event.at,
            event.action.as_str(),
            event.grant_id.map(|g| g.as_bytes().to_vec()),
            event.actor.as_str(),
        ],
    )?;
    Ok(())
}

/// Append to a record's audit trail at the next sequence number.
fn append_event(
    conn: &Connection,
    record_id: &RecordId,
    action: LedgerAction,
    grant_id: Option<&GrantId>,
    actor: &PrincipalId,
    at: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO events (record_id, seq, at, action, grant_id, actor)
         SELECT ?1, COALESCE(MAX(seq), 0) + 1, ?2, ?3, ?4, ?5
         FROM events WHERE record_id = ?1",
        params![
            &record_id.as_bytes()[..],
            at,
            action.as_str(),
            grant_id.map(|g| g.as_bytes().to_vec()),
            actor.as_str(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn register_record(&self, record: NewRecord) -> Result<RecordId> {
        self.run(move |conn| {
            let metadata = record.into_metadata(now_millis());
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if load_record(&tx, &metadata.id)?.is_some() {
                return Err(LedgerError::DuplicateRecord(metadata.id));
            }
            insert_record(&tx, &metadata)?;
            append_event(
                &tx,
                &metadata.id,
                LedgerAction::RecordRegistered,
                None,
                metadata.registrar(),
                metadata.created_at,
            )?;
            tx.commit()?;

            debug!(record = %metadata.id, "record registered");
            Ok(metadata.id)
        })
        .await
    }

    async fn request_access(
        &self,
        record_id: &RecordId,
        viewer: &PrincipalId,
        role: Role,
    ) -> Result<GrantId> {
        let record_id = *record_id;
        let viewer = viewer.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut record =
                load_record(&tx, &record_id)?.ok_or(LedgerError::UnknownRecord(record_id))?;

            let existing: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT grant_id FROM grants
                     WHERE record_id = ?1 AND viewer = ?2 AND state != ?3
                     LIMIT 1",
                    params![
                        &record_id.as_bytes()[..],
                        viewer.as_str(),
                        GrantState::Revoked.as_str()
                    ],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing) = existing {
                return Err(LedgerError::DuplicateGrant {
                    record: record_id,
                    viewer,
                    existing: GrantId::from_bytes(blob32(existing)?),
                });
            }

            let now = now_millis();
            let ordinal = record.grant_ordinal;
            let grant = AccessGrant::request(&mut record, viewer.clone(), role, now);
            insert_grant(&tx, &grant, ordinal)?;
            tx.execute(
                "UPDATE records SET grant_ordinal = ?1 WHERE record_id = ?2",
                params![record.grant_ordinal as i64, &record_id.as_bytes()[..]],
            )?;
            append_event(
                &tx,
                &record_id,
                LedgerAction::AccessRequested,
                Some(&grant.id),
                &viewer,
                now,
            )?;
            tx.commit()?;

            debug!(record = %record_id, grant = %grant.id, viewer = %viewer, %role, "access requested");
            Ok(grant.id)
        })
        .await
    }

    async fn approve_access(
        &self,
        grant_id: &GrantId,
        patient: &PrincipalId,
        rekey: RekeyRef,
    ) -> Result<()> {
        let grant_id = *grant_id;
        let patient = patient.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut grant = load_grant(&tx, &grant_id)?;
            require_record(&tx, &grant.record_id)?.authorize(&patient)?;

            let now = now_millis();
            let read_version = grant.version;
            grant.approve(rekey, now)?;
            update_grant(&tx, &grant, read_version)?;
            append_event(
                &tx,
                &grant.record_id,
                LedgerAction::AccessApproved,
                Some(&grant_id),
                &patient,
                now,
            )?;
            tx.commit()?;

            debug!(grant = %grant_id, version = grant.version, "access approved");
            Ok(())
        })
        .await
    }

    async fn revoke_access(&self, grant_id: &GrantId, patient: &PrincipalId) -> Result<Revocation> {
        let grant_id = *grant_id;
        let patient = patient.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut grant = load_grant(&tx, &grant_id)?;
            require_record(&tx, &grant.record_id)?.authorize(&patient)?;

            let now = now_millis();
            let read_version = grant.version;
            let outcome = grant.revoke(now);
            if outcome == Revocation::Revoked {
                update_grant(&tx, &grant, read_version)?;
                append_event(
                    &tx,
                    &grant.record_id,
                    LedgerAction::AccessRevoked,
                    Some(&grant_id),
                    &patient,
                    now,
                )?;
                tx.commit()?;
                debug!(grant = %grant_id, "access revoked");
            } else {
                debug!(grant = %grant_id, "grant already revoked");
            }
            Ok(outcome)
        })
        .await
    }

    async fn get_grant(&self, grant_id: &GrantId) -> Result<AccessGrant> {
        let grant_id = *grant_id;
        self.run(move |conn| load_grant(conn, &grant_id)).await
    }

    async fn get_record(&self, record_id: &RecordId) -> Result<RecordMetadata> {
        let record_id = *record_id;
        self.run(move |conn| require_record(conn, &record_id)).await
    }

    async fn grants_for_record(&self, record_id: &RecordId) -> Result<Vec<AccessGrant>> {
        let record_id = *record_id;
        self.run(move |conn| {
            require_record(conn, &record_id)?;
            load_grants(conn, &record_id)
        })
        .await
    }

    async fn audit_trail(&self, record_id: &RecordId) -> Result<Vec<LedgerEvent>> {
        let record_id = *record_id;
        self.run(move |conn| {
            require_record(conn, &record_id)?;
            load_events(conn, &record_id)
        })
        .await
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        self.run(|conn| {
            let tx = conn.transaction()?;
            let sql = format!("SELECT {} FROM records", RECORD_COLUMNS);
            let records = {
                let mut stmt = tx.prepare(&sql)?;
                let rows = stmt
                    .query_map([], row_to_record)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };

            let mut out = Vec::with_capacity(records.len());
            for metadata in records {
                let grants = load_grants(&tx, &metadata.id)?;
                let events = load_events(&tx, &metadata.id)?;
                out.push(RecordSnapshot {
                    metadata,
                    grants,
                    events,
                });
            }
            tx.commit()?;
            Ok(LedgerSnapshot::new(out))
        })
        .await
    }
}
