//! Business reference numbers: unique, strictly increasing per entity kind.
//!
//! The counter increment happens inside the caller's transaction, so a
//! racing allocation for the same kind conflicts on the counter key and is
//! serialized by the store. Reading the current maximum and adding one would
//! hand two concurrent creations the same number; the counter key makes the
//! allocation atomic relative to every other caller.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use sled::transaction::{ConflictableTransactionResult, TransactionalTree, abort};

use crate::error::{LedgerError, Result};
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Expense,
    Purchase,
    Payment,
    Supplier,
    Vehicle,
    Machine,
}

impl RefKind {
    pub fn prefix(self) -> &'static str {
        match self {
            RefKind::Expense => "EXP",
            RefKind::Purchase => "PUR",
            RefKind::Payment => "PAY",
            RefKind::Supplier => "SUP",
            RefKind::Vehicle => "VEH",
            RefKind::Machine => "MCH",
        }
    }

    fn counter_key(self) -> Vec<u8> {
        format!("seq/{}", self.prefix()).into_bytes()
    }
}

/// Allocate the next reference for `kind` within the caller's transaction.
/// If the enclosing transaction aborts, the increment rolls back with it, so
/// no allocation ever outlives a failed creation.
pub(crate) fn allocate(
    tx: &TransactionalTree,
    kind: RefKind,
    year: i32,
) -> ConflictableTransactionResult<String, LedgerError> {
    let key = kind.counter_key();
    let next = match tx.get(&key)? {
        Some(raw) => {
            let bytes: [u8; 8] = match raw.as_ref().try_into() {
                Ok(bytes) => bytes,
                Err(_) => {
                    return abort(LedgerError::Codec(format!(
                        "sequence counter for {} is corrupt",
                        kind.prefix()
                    )));
                }
            };
            u64::from_be_bytes(bytes) + 1
        }
        None => 1,
    };
    tx.insert(key, next.to_be_bytes().to_vec())?;

    Ok(format!("{}-{}-{:06}", kind.prefix(), year, next))
}

/// Standalone allocator for callers outside the ledger services, e.g.
/// vehicle and machine registration.
pub struct SequenceGenerator {
    db: Arc<sled::Db>,
}

impl SequenceGenerator {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    pub fn next(&self, kind: RefKind) -> Result<String> {
        let year = Utc::now().year();
        store::run(&self.db, |tx| allocate(tx, kind, year))
    }
}
