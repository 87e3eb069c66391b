//! Expense request lifecycle: creation, approval, rejection and payment.
//!
//! The state machine is strictly monotonic. PENDING is the only initial
//! state, APPROVED and REJECTED are reachable only from PENDING, PAID only
//! from APPROVED, and REJECTED and PAID are terminal. The state check and
//! the state write happen in the same transaction, so of two racing
//! transitions exactly one wins and the other fails with `InvalidState`.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use sled::transaction::abort;

use crate::audit::{self, AuditAction};
use crate::error::{LedgerError, Result};
use crate::sequence::{self, RefKind};
use crate::store;
use crate::types::{Money, TimeStamp};
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum ExpenseStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    Paid,
}

impl std::fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpenseStatus::Pending => f.write_str("PENDING"),
            ExpenseStatus::Approved => f.write_str("APPROVED"),
            ExpenseStatus::Rejected => f.write_str("REJECTED"),
            ExpenseStatus::Paid => f.write_str("PAID"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct ExpenseRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub reference: String,
    #[n(2)]
    pub expense_type: String,
    #[n(3)]
    pub category: String,
    #[n(4)]
    pub description: String,
    #[n(5)]
    pub amount: Money,
    #[n(6)]
    pub status: ExpenseStatus,
    #[n(7)]
    pub requested_by: String,
    #[n(8)]
    pub branch_id: String,
    #[n(9)]
    pub linked_asset: Option<String>,
    #[n(10)]
    pub approved_by: Option<String>,
    #[n(11)]
    pub rejection_reason: Option<String>,
    #[n(12)]
    pub requested_at: TimeStamp<Utc>,
    #[n(13)]
    pub processed_at: Option<TimeStamp<Utc>>,
}

pub struct ExpenseWorkflow {
    db: Arc<sled::Db>,
}

impl ExpenseWorkflow {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        requested_by: &str,
        branch_id: &str,
        expense_type: &str,
        category: &str,
        description: &str,
        amount: Money,
        linked_asset: Option<&str>,
    ) -> Result<ExpenseRequest> {
        if amount.is_zero() {
            return Err(LedgerError::Validation(
                "expense amount must be greater than zero".to_string(),
            ));
        }

        let id = utils::new_entity_id("exp")?;
        let year = Utc::now().year();
        store::run(&self.db, |tx| {
            let reference = sequence::allocate(tx, RefKind::Expense, year)?;
            let request = ExpenseRequest {
                id: id.clone(),
                reference: reference.clone(),
                expense_type: expense_type.to_string(),
                category: category.to_string(),
                description: description.to_string(),
                amount,
                status: ExpenseStatus::Pending,
                requested_by: requested_by.to_string(),
                branch_id: branch_id.to_string(),
                linked_asset: linked_asset.map(str::to_string),
                approved_by: None,
                rejection_reason: None,
                requested_at: TimeStamp::new(),
                processed_at: None,
            };

            store::tx_put(tx, &store::expense_key(&id), &request)?;
            store::tx_put(tx, &store::refno_key(&reference), &id)?;
            audit::append(
                tx,
                requested_by,
                AuditAction::ExpenseCreated,
                "expense",
                &id,
                &reference,
            )?;

            Ok(request)
        })
    }

    pub fn approve(&self, request_id: &str, approved_by: &str) -> Result<ExpenseRequest> {
        store::run(&self.db, |tx| {
            let mut request: ExpenseRequest =
                store::tx_require(tx, &store::expense_key(request_id), "expense", request_id)?;
            if request.status != ExpenseStatus::Pending {
                return abort(LedgerError::InvalidState {
                    entity: "expense",
                    id: request_id.to_string(),
                    actual: request.status.to_string(),
                    expected: "PENDING",
                });
            }

            request.status = ExpenseStatus::Approved;
            request.approved_by = Some(approved_by.to_string());
            request.processed_at = Some(TimeStamp::new());
            store::tx_put(tx, &store::expense_key(request_id), &request)?;
            audit::append(
                tx,
                approved_by,
                AuditAction::ExpenseApproved,
                "expense",
                request_id,
                &request.reference,
            )?;

            Ok(request)
        })
    }

    pub fn reject(
        &self,
        request_id: &str,
        approved_by: &str,
        reason: &str,
    ) -> Result<ExpenseRequest> {
        if reason.trim().is_empty() {
            return Err(LedgerError::Validation(
                "rejection reason must not be empty".to_string(),
            ));
        }

        store::run(&self.db, |tx| {
            let mut request: ExpenseRequest =
                store::tx_require(tx, &store::expense_key(request_id), "expense", request_id)?;
            if request.status != ExpenseStatus::Pending {
                return abort(LedgerError::InvalidState {
                    entity: "expense",
                    id: request_id.to_string(),
                    actual: request.status.to_string(),
                    expected: "PENDING",
                });
            }

            request.status = ExpenseStatus::Rejected;
            request.approved_by = Some(approved_by.to_string());
            request.rejection_reason = Some(reason.to_string());
            request.processed_at = Some(TimeStamp::new());
            store::tx_put(tx, &store::expense_key(request_id), &request)?;
            audit::append(
                tx,
                approved_by,
                AuditAction::ExpenseRejected,
                "expense",
                request_id,
                reason,
            )?;

            Ok(request)
        })
    }

    pub fn mark_paid(&self, request_id: &str, actor: &str) -> Result<ExpenseRequest> {
        store::run(&self.db, |tx| {
            let mut request: ExpenseRequest =
                store::tx_require(tx, &store::expense_key(request_id), "expense", request_id)?;
            if request.status != ExpenseStatus::Approved {
                return abort(LedgerError::InvalidState {
                    entity: "expense",
                    id: request_id.to_string(),
                    actual: request.status.to_string(),
                    expected: "APPROVED",
                });
            }

            request.status = ExpenseStatus::Paid;
            store::tx_put(tx, &store::expense_key(request_id), &request)?;
            audit::append(
                tx,
                actor,
                AuditAction::ExpenseMarkedPaid,
                "expense",
                request_id,
                &request.reference,
            )?;

            Ok(request)
        })
    }

    pub fn get(&self, request_id: &str) -> Result<ExpenseRequest> {
        store::fetch(&self.db, &store::expense_key(request_id))?.ok_or_else(|| {
            LedgerError::NotFound {
                kind: "expense",
                id: request_id.to_string(),
            }
        })
    }
}
