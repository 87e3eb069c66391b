//! Financial ledger and approval-workflow core.
//!
//! Owns the money-touching parts of the business-management application:
//! the expense-request state machine, purchase and line-item recording,
//! supplier balance accounting, payment allocation and collision-free
//! business reference numbers, with an append-only audit trail behind every
//! mutation. Request handling, sessions and authorization live with the
//! callers; inputs arriving here are already authenticated and role-checked
//! and this crate enforces state validity only.
//!
//! Every mutating operation is one atomic transaction against a shared
//! [`sled::Db`]; on any error nothing is persisted.

pub mod audit;
pub mod error;
pub mod expense;
pub mod payment;
pub mod purchase;
pub mod sequence;
pub mod supplier;
pub mod types;
pub mod utils;

mod store;
