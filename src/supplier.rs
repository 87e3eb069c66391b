//! Supplier records and the supplier balance account.
//!
//! The cached `current_balance` is written only by purchase creation and
//! payment allocation. Every balance check recomputes the authoritative sum
//! of amounts due and reconciles it against the cache, so drift cannot go
//! unnoticed.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use sled::transaction::{ConflictableTransactionResult, abort};

use crate::audit::{self, AuditAction};
use crate::error::{LedgerError, Result};
use crate::purchase;
use crate::sequence::{self, RefKind};
use crate::store;
use crate::types::{Money, TimeStamp};
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum SupplierStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Inactive,
}

impl std::fmt::Display for SupplierStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupplierStatus::Active => f.write_str("ACTIVE"),
            SupplierStatus::Inactive => f.write_str("INACTIVE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Supplier {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub code: String,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub contact: Option<String>,
    #[n(4)]
    pub credit_limit: Money,
    #[n(5)]
    pub current_balance: Money,
    #[n(6)]
    pub payment_terms: Option<String>,
    #[n(7)]
    pub status: SupplierStatus,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

pub struct SupplierAccount {
    db: Arc<sled::Db>,
}

impl SupplierAccount {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    /// Register a supplier with a freshly allocated SUP code, Active status
    /// and a zero balance.
    pub fn register(
        &self,
        name: &str,
        contact: Option<&str>,
        credit_limit: Money,
        payment_terms: Option<&str>,
        actor: &str,
    ) -> Result<Supplier> {
        if name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "supplier name must not be empty".to_string(),
            ));
        }

        let id = utils::new_entity_id("sup")?;
        let year = Utc::now().year();
        store::run(&self.db, |tx| {
            let code = sequence::allocate(tx, RefKind::Supplier, year)?;
            let supplier = Supplier {
                id: id.clone(),
                code: code.clone(),
                name: name.to_string(),
                contact: contact.map(str::to_string),
                credit_limit,
                current_balance: Money::zero(),
                payment_terms: payment_terms.map(str::to_string),
                status: SupplierStatus::Active,
                created_at: TimeStamp::new(),
            };

            store::tx_put(tx, &store::supplier_key(&id), &supplier)?;
            store::tx_put(tx, &store::supplier_purchases_key(&id), &Vec::<String>::new())?;
            store::tx_put(tx, &store::refno_key(&code), &id)?;
            audit::append(
                tx,
                actor,
                AuditAction::SupplierRegistered,
                "supplier",
                &id,
                &code,
            )?;

            Ok(supplier)
        })
    }

    pub fn get(&self, supplier_id: &str) -> Result<Supplier> {
        store::fetch(&self.db, &store::supplier_key(supplier_id))?.ok_or_else(|| {
            LedgerError::NotFound {
                kind: "supplier",
                id: supplier_id.to_string(),
            }
        })
    }

    pub fn deactivate(&self, supplier_id: &str, actor: &str) -> Result<Supplier> {
        store::run(&self.db, |tx| {
            let mut supplier: Supplier =
                store::tx_require(tx, &store::supplier_key(supplier_id), "supplier", supplier_id)?;
            if supplier.status != SupplierStatus::Active {
                return abort(LedgerError::InvalidState {
                    entity: "supplier",
                    id: supplier_id.to_string(),
                    actual: supplier.status.to_string(),
                    expected: "ACTIVE",
                });
            }

            supplier.status = SupplierStatus::Inactive;
            store::tx_put(tx, &store::supplier_key(supplier_id), &supplier)?;
            audit::append(
                tx,
                actor,
                AuditAction::SupplierDeactivated,
                "supplier",
                supplier_id,
                &supplier.code,
            )?;

            Ok(supplier)
        })
    }

    /// The outstanding balance, recomputed from the supplier's purchases and
    /// reconciled against the cached value.
    pub fn balance(&self, supplier_id: &str) -> Result<Money> {
        store::run(&self.db, |tx| {
            let supplier: Supplier =
                store::tx_require(tx, &store::supplier_key(supplier_id), "supplier", supplier_id)?;
            let purchases = purchase::load_purchases(tx, supplier_id)?;
            reconcile(&supplier, &purchases)
        })
    }
}

/// Recompute the sum of amounts due and abort with `BalanceDrift` if the
/// cached balance disagrees. Called inside every transaction that bases a
/// decision on the balance.
pub(crate) fn reconcile(
    supplier: &Supplier,
    purchases: &[purchase::Purchase],
) -> ConflictableTransactionResult<Money, LedgerError> {
    let mut computed = Money::zero();
    for purchase in purchases {
        computed = match computed.checked_add(purchase.amount_due()) {
            Some(total) => total,
            None => {
                return abort(LedgerError::Validation(format!(
                    "outstanding balance for supplier {} exceeds the representable amount",
                    supplier.id
                )));
            }
        };
    }
    if computed != supplier.current_balance {
        return abort(LedgerError::BalanceDrift {
            supplier_id: supplier.id.clone(),
            cached: supplier.current_balance,
            computed,
        });
    }
    Ok(computed)
}
