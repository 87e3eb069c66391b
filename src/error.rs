use crate::types::Money;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Typed failures surfaced by every mutating operation. Nothing in this
/// crate crosses the boundary as an untyped error.
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} is {actual}, operation requires {expected}")]
    InvalidState {
        entity: &'static str,
        id: String,
        actual: String,
        expected: &'static str,
    },

    #[error("payment of {requested} exceeds the outstanding balance of {outstanding}")]
    InsufficientOutstandingBalance { requested: Money, outstanding: Money },

    #[error("payment remainder of {remainder} could not be allocated to any outstanding purchase")]
    OverAllocation { remainder: Money },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("a concurrent operation won the race for this record, retry")]
    Conflict,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("stored record could not be decoded: {0}")]
    Codec(String),

    #[error("supplier {supplier_id} balance drift: cached {cached}, recomputed {computed}")]
    BalanceDrift {
        supplier_id: String,
        cached: Money,
        computed: Money,
    },
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Unavailable(err.to_string())
    }
}
