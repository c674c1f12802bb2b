use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::Span;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("slot [{}, {}) conflicts with booking {booking}", .span.start, .span.end)]
    SlotConflict { booking: Ulid, span: Span },
    #[error("overpayment: {requested} exceeds outstanding balance {remaining}")]
    Overpayment { requested: Decimal, remaining: Decimal },
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: Ulid,
        from: &'static str,
        to: &'static str,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::SlotConflict { .. } => "slot_conflict",
            EngineError::Overpayment { .. } => "overpayment",
            EngineError::PolicyViolation(_) => "policy_violation",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal",
        }
    }
}
