//! Serialized ledger state.
//!
//! A snapshot preserves every record, grant, and audit event exactly, so a
//! ledger restored from one behaves identically to the ledger it was taken
//! from.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::grant::{AccessGrant, LedgerEvent, RecordMetadata};

/// Current snapshot format version.
pub const SNAPSHOT_FORMAT: u32 = 2;

/// One record with its grants and audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub metadata: RecordMetadata,
    /// Grants in request order.
    pub grants: Vec<AccessGrant>,
    /// Audit events in order.
    pub events: Vec<LedgerEvent>,
}

/// The full contents of a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub format: u32,
    /// Records ordered by id.
    pub records: Vec<RecordSnapshot>,
}

impl LedgerSnapshot {
    /// Build a snapshot, ordering records by id so equal ledgers produce
    /// equal bytes.
    pub fn new(mut records: Vec<RecordSnapshot>) -> Self {
        records.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));
        Self {
            format: SNAPSHOT_FORMAT,
            records,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes, rejecting unknown formats.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = ciborium::from_reader(bytes)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(LedgerError::Serialization(format!(
                "unsupported snapshot format: {}",
                snapshot.format
            )));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::NewRecord;
    use medshare_core::{Locator, PrincipalId};

    fn record(owner: &str) -> RecordSnapshot {
        let metadata = NewRecord::new(
            PrincipalId::new(owner).unwrap(),
            Locator::for_bytes(owner.as_bytes()),
            Locator::for_bytes(b"capsule"),
        )
        .into_metadata(42);
        RecordSnapshot {
            metadata,
            grants: Vec::new(),
            events: Vec::new(),
        }
    }

    #[test]
    fn test_snapshot_order_is_canonical() {
        let a = LedgerSnapshot::new(vec![record("p1"), record("p2")]);
        let b = LedgerSnapshot::new(vec![record("p2"), record("p1")]);
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn test_snapshot_bytes_roundtrip() {
        let snapshot = LedgerSnapshot::new(vec![record("p1")]);
        let restored = LedgerSnapshot::from_bytes(&snapshot.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let mut snapshot = LedgerSnapshot::new(vec![]);
        snapshot.format = 99;
        let bytes = snapshot.to_bytes().unwrap();
        assert!(matches!(
            LedgerSnapshot::from_bytes(&bytes),
            Err(LedgerError::Serialization(_))
        ));
    }
}
