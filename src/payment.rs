//! Payment allocation against supplier balances.
//!
//! A payment is either linked to one purchase or general. General payments
//! walk the supplier's outstanding purchases oldest-first, fully satisfying
//! each amount due before moving to the next. The balance check, purchase
//! updates, payment record and audit entry commit as one transaction; racing
//! payments against the same supplier serialize on the supplier record, so
//! two payments can never both fit into the same balance.

use std::sync::Arc;

use chrono::Utc;
use sled::transaction::abort;

use crate::audit::{self, AuditAction};
use crate::error::{LedgerError, Result};
use crate::purchase;
use crate::sequence::{self, RefKind};
use crate::store;
use crate::supplier::{self, Supplier, SupplierStatus};
use crate::types::{BusinessDate, Money, TimeStamp};
use crate::utils;

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct SupplierPayment {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub reference: String,
    #[n(2)]
    pub supplier_id: String,
    /// None means a general payment allocated oldest-first.
    #[n(3)]
    pub purchase_id: Option<String>,
    #[n(4)]
    pub amount: Money,
    #[n(5)]
    pub method: String,
    #[n(6)]
    pub note: Option<String>,
    #[n(7)]
    pub date: BusinessDate,
    #[n(8)]
    pub recorded_by: String,
    #[n(9)]
    pub recorded_at: TimeStamp<Utc>,
}

pub struct PaymentAllocator {
    db: Arc<sled::Db>,
}

impl PaymentAllocator {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn apply(
        &self,
        supplier_id: &str,
        amount: Money,
        method: &str,
        note: Option<&str>,
        date: BusinessDate,
        recorded_by: &str,
        purchase_id: Option<&str>,
    ) -> Result<SupplierPayment> {
        if amount.is_zero() {
            return Err(LedgerError::Validation(
                "payment amount must be greater than zero".to_string(),
            ));
        }

        let id = utils::new_entity_id("pay")?;
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

            let mut purchases = purchase::load_purchases(tx, supplier_id)?;
            let outstanding = supplier::reconcile(&supplier, &purchases)?;
            if amount > outstanding {
                return abort(LedgerError::InsufficientOutstandingBalance {
                    requested: amount,
                    outstanding,
                });
            }
            match purchase_id {
                Some(target_id) => {
                    // Belonging to another supplier is out of scope here,
                    // surfaced the same way as a missing purchase.
                    let Some(target) = purchases.iter_mut().find(|p| p.id == target_id) else {
                        return abort(LedgerError::NotFound {
                            kind: "purchase",
                            id: target_id.to_string(),
                        });
                    };
                    let due = target.amount_due();
                    if amount > due {
                        return abort(LedgerError::InsufficientOutstandingBalance {
                            requested: amount,
                            outstanding: due,
                        });
                    }

                    target.amount_paid = match target.amount_paid.checked_add(amount) {
                        Some(paid) => paid,
                        None => {
                            return abort(LedgerError::Validation(format!(
                                "amount paid on purchase {target_id} exceeds the representable amount"
                            )));
                        }
                    };
                    store::tx_put(tx, &store::purchase_key(&target.id), target)?;
                }
                None => {
                    let mut remaining = amount;
                    for p in purchases.iter_mut() {
                        if remaining.is_zero() {
                            break;
                        }
                        let due = p.amount_due();
                        if due.is_zero() {
                            continue;
                        }
                        let slice = if remaining < due { remaining } else { due };
                        p.amount_paid = match p.amount_paid.checked_add(slice) {
                            Some(paid) => paid,
                            None => {
                                return abort(LedgerError::Validation(format!(
                                    "amount paid on purchase {} exceeds the representable amount",
                                    p.id
                                )));
                            }
                        };
                        remaining = remaining.checked_sub(slice).unwrap_or_else(Money::zero);
                        store::tx_put(tx, &store::purchase_key(&p.id), p)?;
                    }
                    // Unreachable given the balance check above; surfaced as
                    // an invariant violation rather than swallowed.
                    if !remaining.is_zero() {
                        return abort(LedgerError::OverAllocation {
                            remainder: remaining,
                        });
                    }
                }
            }

            supplier.current_balance = match supplier.current_balance.checked_sub(amount) {
                Some(balance) => balance,
                None => {
                    return abort(LedgerError::OverAllocation { remainder: amount });
                }
            };
            store::tx_put(tx, &store::supplier_key(supplier_id), &supplier)?;

            let reference = sequence::allocate(tx, RefKind::Payment, date.year())?;
            let payment = SupplierPayment {
                id: id.clone(),
                reference: reference.clone(),
                supplier_id: supplier_id.to_string(),
                purchase_id: purchase_id.map(str::to_string),
                amount,
                method: method.to_string(),
                note: note.map(str::to_string),
                date,
                recorded_by: recorded_by.to_string(),
                recorded_at: TimeStamp::new(),
            };

            store::tx_put(tx, &store::payment_key(&id), &payment)?;
            store::tx_put(tx, &store::refno_key(&reference), &id)?;
            audit::append(
                tx,
                recorded_by,
                AuditAction::PaymentApplied,
                "payment",
                &id,
                &reference,
            )?;

            Ok(payment)
        })
    }

    pub fn get(&self, payment_id: &str) -> Result<SupplierPayment> {
        store::fetch(&self.db, &store::payment_key(payment_id))?.ok_or_else(|| {
            LedgerError::NotFound {
                kind: "payment",
                id: payment_id.to_string(),
            }
        })
    }
}
