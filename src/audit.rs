//! Append-only audit trail: who did what to which record, and when.
//!
//! Entries are written in the same transaction as the mutation they
//! document, under a monotonically increasing sequence key. Each entry
//! carries the sha256 of its own CBOR encoding plus the hash of its
//! predecessor, so edits or deletions anywhere in the trail break the chain.

use std::sync::Arc;

use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree, abort};

use crate::error::{LedgerError, Result};
use crate::store;
use crate::types::TimeStamp;

const HEAD_KEY: &[u8] = b"audit_head";
const ENTRY_PREFIX: &[u8] = b"audit/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum AuditAction {
    #[n(0)]
    ExpenseCreated,
    #[n(1)]
    ExpenseApproved,
    #[n(2)]
    ExpenseRejected,
    #[n(3)]
    ExpenseMarkedPaid,
    #[n(4)]
    SupplierRegistered,
    #[n(5)]
    SupplierDeactivated,
    #[n(6)]
    PurchaseRecorded,
    #[n(7)]
    PaymentApplied,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuditAction::ExpenseCreated => "expense created",
            AuditAction::ExpenseApproved => "expense approved",
            AuditAction::ExpenseRejected => "expense rejected",
            AuditAction::ExpenseMarkedPaid => "expense marked paid",
            AuditAction::SupplierRegistered => "supplier registered",
            AuditAction::SupplierDeactivated => "supplier deactivated",
            AuditAction::PurchaseRecorded => "purchase recorded",
            AuditAction::PaymentApplied => "payment applied",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct AuditEntry {
    #[n(0)]
    pub seq: u64,
    #[n(1)]
    pub actor: String,
    #[n(2)]
    pub action: AuditAction,
    #[n(3)]
    pub subject_kind: String,
    #[n(4)]
    pub subject_id: String,
    #[n(5)]
    pub details: String,
    #[n(6)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(7)]
    pub prev_hash: String,
    #[n(8)]
    pub hash: String,
}

impl AuditEntry {
    /// Hash of the entry's CBOR encoding with the hash field cleared.
    pub fn content_hash(&self) -> Result<String> {
        let mut unsealed = self.clone();
        unsealed.hash = String::new();
        let bytes =
            minicbor::to_vec(&unsealed).map_err(|err| LedgerError::Codec(err.to_string()))?;
        Ok(sha256::digest(bytes.as_slice()))
    }
}

fn entry_key(seq: u64) -> Vec<u8> {
    let mut key = ENTRY_PREFIX.to_vec();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Append one entry inside the caller's transaction. The head key carries
/// the last sequence number and chain hash, so appends serialize behind the
/// mutation they belong to.
pub(crate) fn append(
    tx: &TransactionalTree,
    actor: &str,
    action: AuditAction,
    subject_kind: &str,
    subject_id: &str,
    details: &str,
) -> ConflictableTransactionResult<(), LedgerError> {
    let (last_seq, prev_hash) =
        store::tx_get::<(u64, String)>(tx, HEAD_KEY)?.unwrap_or((0, String::new()));
    let seq = last_seq + 1;

    let mut entry = AuditEntry {
        seq,
        actor: actor.to_string(),
        action,
        subject_kind: subject_kind.to_string(),
        subject_id: subject_id.to_string(),
        details: details.to_string(),
        recorded_at: TimeStamp::new(),
        prev_hash,
        hash: String::new(),
    };
    entry.hash = match entry.content_hash() {
        Ok(hash) => hash,
        Err(err) => return abort(err),
    };

    store::tx_put(tx, &entry_key(seq), &entry)?;
    store::tx_put(tx, HEAD_KEY, &(seq, entry.hash.clone()))?;

    Ok(())
}

/// Read access to the trail. Writes go exclusively through `append`.
pub struct AuditTrail {
    db: Arc<sled::Db>,
}

impl AuditTrail {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    /// All entries in append order.
    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(ENTRY_PREFIX) {
            let (_, raw) = item?;
            let entry: AuditEntry =
                minicbor::decode(&raw).map_err(|err| LedgerError::Codec(err.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn entries_for(&self, subject_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| entry.subject_id == subject_id)
            .collect())
    }

    /// Walk the chain and recompute every hash. A mismatch means the trail
    /// was edited after the fact.
    pub fn verify_chain(&self) -> Result<()> {
        let mut prev_hash = String::new();
        for entry in self.entries()? {
            if entry.prev_hash != prev_hash {
                return Err(LedgerError::Codec(format!(
                    "audit chain broken before entry {}",
                    entry.seq
                )));
            }
            let expected = entry.content_hash()?;
            if expected != entry.hash {
                return Err(LedgerError::Codec(format!(
                    "audit entry {} was altered after sealing",
                    entry.seq
                )));
            }
            prev_hash = entry.hash;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> AuditEntry {
        AuditEntry {
            seq: 1,
            actor: "clerk".into(),
            action: AuditAction::ExpenseCreated,
            subject_kind: "expense".into(),
            subject_id: "exp1abc".into(),
            details: "EXP-2024-000001".into(),
            recorded_at: TimeStamp::new(),
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    #[test]
    fn content_hash_ignores_the_stored_hash() {
        let mut entry = sample_entry();
        let before = entry.content_hash().unwrap();
        entry.hash = before.clone();

        assert_eq!(entry.content_hash().unwrap(), before);
    }

    #[test]
    fn content_hash_detects_tampering() {
        let mut entry = sample_entry();
        let sealed = entry.content_hash().unwrap();
        entry.details = "EXP-2024-999999".into();

        assert_ne!(entry.content_hash().unwrap(), sealed);
    }

    #[test]
    fn entry_keys_sort_in_sequence_order() {
        assert!(entry_key(9) < entry_key(10));
        assert!(entry_key(255) < entry_key(256));
    }
}
