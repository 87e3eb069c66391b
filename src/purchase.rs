//! Purchase records and their immutable line items.
//!
//! A purchase is created once with all of its items; the only field that
//! ever changes afterwards is `amount_paid`, and only the payment allocator
//! advances it. `amount_due` and `payment_status` are derived on read so
//! they cannot drift from the stored amounts.

use std::sync::Arc;

use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree, abort};

use crate::audit::{self, AuditAction};
use crate::error::{LedgerError, Result};
use crate::sequence::{self, RefKind};
use crate::store;
use crate::supplier::Supplier;
use crate::types::{BusinessDate, Money, TimeStamp};
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum PaymentStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Partial,
    #[n(2)]
    Paid,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => f.write_str("PENDING"),
            PaymentStatus::Partial => f.write_str("PARTIAL"),
            PaymentStatus::Paid => f.write_str("PAID"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct PurchaseItem {
    #[n(0)]
    pub product: String,
    #[n(1)]
    pub quantity: u32,
    #[n(2)]
    pub unit_cost: Money,
    #[n(3)]
    pub line_total: Money,
}

impl PurchaseItem {
    pub fn new(product: &str, quantity: u32, unit_cost: Money) -> Result<Self> {
        if product.trim().is_empty() {
            return Err(LedgerError::Validation(
                "purchase item product must not be empty".to_string(),
            ));
        }
        if quantity == 0 {
            return Err(LedgerError::Validation(format!(
                "purchase item {product:?} quantity must be greater than zero"
            )));
        }

        Ok(Self {
            product: product.to_string(),
            quantity,
            unit_cost,
            line_total: unit_cost.times(quantity)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Purchase {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub reference: String,
    #[n(2)]
    pub supplier_id: String,
    #[n(3)]
    pub branch_id: String,
    #[n(4)]
    pub date: BusinessDate,
    #[n(5)]
    pub items: Vec<PurchaseItem>,
    #[n(6)]
    pub total_amount: Money,
    #[n(7)]
    pub amount_paid: Money,
    #[n(8)]
    pub payment_method: String,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
}

impl Purchase {
    pub fn amount_due(&self) -> Money {
        // amount_paid never exceeds total_amount.
        self.total_amount
            .checked_sub(self.amount_paid)
            .unwrap_or_else(Money::zero)
    }

    pub fn payment_status(&self) -> PaymentStatus {
        if self.amount_paid.is_zero() {
            PaymentStatus::Pending
        } else if self.amount_paid < self.total_amount {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Paid
        }
    }
}

pub struct PurchaseLedger {
    db: Arc<sled::Db>,
}

impl PurchaseLedger {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    /// Record a purchase with all of its items as one atomic unit. The
    /// supplier's cached balance grows by the purchase total in the same
    /// transaction.
    pub fn create_purchase(
        &self,
        supplier_id: &str,
        branch_id: &str,
        date: BusinessDate,
        items: Vec<PurchaseItem>,
        payment_method: &str,
        actor: &str,
    ) -> Result<Purchase> {
        if items.is_empty() {
            return Err(LedgerError::Validation(
                "purchase must contain at least one item".to_string(),
            ));
        }
        let total_amount = items.iter().try_fold(Money::zero(), |acc, item| {
            acc.checked_add(item.line_total).ok_or_else(|| {
                LedgerError::Validation(
                    "purchase total exceeds the representable amount".to_string(),
                )
            })
        })?;

        let id = utils::new_entity_id("pur")?;
        store::run(&self.db, |tx| {
            let mut supplier: Supplier =
                store::tx_require(tx, &store::supplier_key(supplier_id), "supplier", supplier_id)?;

            let reference = sequence::allocate(tx, RefKind::Purchase, date.year())?;
            let purchase = Purchase {
                id: id.clone(),
                reference: reference.clone(),
                supplier_id: supplier_id.to_string(),
                branch_id: branch_id.to_string(),
                date,
                items: items.clone(),
                total_amount,
                amount_paid: Money::zero(),
                payment_method: payment_method.to_string(),
                created_at: TimeStamp::new(),
            };

            store::tx_put(tx, &store::purchase_key(&id), &purchase)?;
            store::tx_put(tx, &store::refno_key(&reference), &id)?;

            let index_key = store::supplier_purchases_key(supplier_id);
            let mut index: Vec<String> = store::tx_get(tx, &index_key)?.unwrap_or_default();
            index.push(id.clone());
            store::tx_put(tx, &index_key, &index)?;

            supplier.current_balance = match supplier.current_balance.checked_add(total_amount) {
                Some(balance) => balance,
                None => {
                    return abort(LedgerError::Validation(format!(
                        "supplier {supplier_id} balance exceeds the representable amount"
                    )));
                }
            };
            store::tx_put(tx, &store::supplier_key(supplier_id), &supplier)?;

            audit::append(
                tx,
                actor,
                AuditAction::PurchaseRecorded,
                "purchase",
                &id,
                &reference,
            )?;

            Ok(purchase)
        })
    }

    pub fn get(&self, purchase_id: &str) -> Result<Purchase> {
        store::fetch(&self.db, &store::purchase_key(purchase_id))?.ok_or_else(|| {
            LedgerError::NotFound {
                kind: "purchase",
                id: purchase_id.to_string(),
            }
        })
    }

    /// Purchases with an amount still due, oldest first. This is the order
    /// general payments are allocated in.
    pub fn outstanding(&self, supplier_id: &str) -> Result<Vec<Purchase>> {
        store::run(&self.db, |tx| {
            store::tx_require::<Supplier>(
                tx,
                &store::supplier_key(supplier_id),
                "supplier",
                supplier_id,
            )?;
            let purchases = load_purchases(tx, supplier_id)?;
            Ok(purchases
                .into_iter()
                .filter(|p| !p.amount_due().is_zero())
                .collect())
        })
    }
}

/// All purchases for a supplier in creation order, read inside the caller's
/// transaction.
pub(crate) fn load_purchases(
    tx: &TransactionalTree,
    supplier_id: &str,
) -> ConflictableTransactionResult<Vec<Purchase>, LedgerError> {
    let ids: Vec<String> =
        store::tx_get(tx, &store::supplier_purchases_key(supplier_id))?.unwrap_or_default();
    ids.iter()
        .map(|id| store::tx_require(tx, &store::purchase_key(id), "purchase", id))
        .collect()
}
