//! Keyspace layout and transaction plumbing over the shared sled database.
//!
//! Every entity lives in the default keyspace under a table-like prefix.
//! Mutating operations run inside a single sled transaction: sled serializes
//! conflicting transactions per touched key and retries them, which gives
//! the per-supplier and per-counter serialization the ledger relies on.

use sled::transaction::{
    ConflictableTransactionResult, TransactionError, TransactionalTree, abort,
};

use crate::error::{LedgerError, Result};

pub(crate) fn expense_key(id: &str) -> Vec<u8> {
    key("expense/", id)
}

pub(crate) fn purchase_key(id: &str) -> Vec<u8> {
    key("purchase/", id)
}

pub(crate) fn supplier_key(id: &str) -> Vec<u8> {
    key("supplier/", id)
}

pub(crate) fn payment_key(id: &str) -> Vec<u8> {
    key("payment/", id)
}

/// Creation-ordered purchase ids per supplier, the FIFO allocation order.
pub(crate) fn supplier_purchases_key(supplier_id: &str) -> Vec<u8> {
    key("supplier_purchases/", supplier_id)
}

/// Reference-number uniqueness guard, maps a reference to its entity id.
pub(crate) fn refno_key(reference: &str) -> Vec<u8> {
    key("refno/", reference)
}

fn key(prefix: &str, id: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(prefix.len() + id.len());
    k.extend_from_slice(prefix.as_bytes());
    k.extend_from_slice(id.as_bytes());
    k
}

/// Run one atomic unit of work. Typed aborts come back as-is, storage
/// failures surface as the retryable `Unavailable`.
pub(crate) fn run<T, F>(db: &sled::Db, f: F) -> Result<T>
where
    F: Fn(&TransactionalTree) -> ConflictableTransactionResult<T, LedgerError>,
{
    db.transaction(f).map_err(|err| match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => LedgerError::Unavailable(err.to_string()),
    })
}

pub(crate) fn tx_get<T>(
    tx: &TransactionalTree,
    key: &[u8],
) -> ConflictableTransactionResult<Option<T>, LedgerError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tx.get(key)? {
        Some(raw) => match minicbor::decode(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => abort(LedgerError::Codec(err.to_string())),
        },
        None => Ok(None),
    }
}

/// `tx_get` that aborts with `NotFound` when the key is absent.
pub(crate) fn tx_require<T>(
    tx: &TransactionalTree,
    key: &[u8],
    kind: &'static str,
    id: &str,
) -> ConflictableTransactionResult<T, LedgerError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tx_get(tx, key)? {
        Some(value) => Ok(value),
        None => abort(LedgerError::NotFound {
            kind,
            id: id.to_string(),
        }),
    }
}

pub(crate) fn tx_put<T>(
    tx: &TransactionalTree,
    key: &[u8],
    value: &T,
) -> ConflictableTransactionResult<(), LedgerError>
where
    T: minicbor::Encode<()>,
{
    let bytes = match minicbor::to_vec(value) {
        Ok(bytes) => bytes,
        Err(err) => return abort(LedgerError::Codec(err.to_string())),
    };
    tx.insert(key, bytes)?;
    Ok(())
}

/// Plain read outside any transaction, for the read-only accessors.
pub(crate) fn fetch<T>(db: &sled::Db, key: &[u8]) -> Result<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match db.get(key)? {
        Some(raw) => minicbor::decode(&raw)
            .map(Some)
            .map_err(|err| LedgerError::Codec(err.to_string())),
        None => Ok(None),
    }
}
