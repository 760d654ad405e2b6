//! Error types for the clearing cycle engine

use crate::types::CycleId;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for clearing operations
pub type Result<T> = std::result::Result<T, ClearingError>;

/// Clearing errors
#[derive(Error, Debug)]
pub enum ClearingError {
    /// No cycle is currently open
    #[error("no open clearing cycle")]
    NoOpenCycle,

    /// Unknown cycle id
    #[error("cycle not found: {0}")]
    CycleNotFound(CycleId),

    /// Closure attempted against a cycle that is not open
    #[error("cycle {0} is already closed")]
    AlreadyClosed(CycleId),

    /// Zero-sum invariant violated at closure. Alerting-grade: signals a
    /// bookkeeping bug upstream, never retried.
    #[error("cycle {cycle_id} does not balance: net sum {sum}")]
    UnbalancedCycle {
        /// Cycle that failed the check
        cycle_id: CycleId,
        /// Computed net sum
        sum: Decimal,
    },

    /// Handoff to the external accounting ledger failed after local commit
    #[error("ledger dispatch failed: {0}")]
    DispatchFailed(String),

    /// Instruction id registered twice
    #[error("duplicate instruction: {0}")]
    DuplicateInstruction(Uuid),

    /// Unknown instruction id
    #[error("instruction not found: {0}")]
    InstructionNotFound(Uuid),

    /// Instruction amount must be strictly positive
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClearingError {
    /// Stable machine-readable code surfaced to external callers
    pub fn code(&self) -> &'static str {
        match self {
            ClearingError::NoOpenCycle => "NO_OPEN_CYCLE",
            ClearingError::CycleNotFound(_) => "CYCLE_NOT_FOUND",
            ClearingError::AlreadyClosed(_) => "CYCLE_ALREADY_CLOSED",
            ClearingError::UnbalancedCycle { .. } => "UNBALANCED_CYCLE",
            ClearingError::DispatchFailed(_) => "LEDGER_DISPATCH_FAILED",
            ClearingError::DuplicateInstruction(_) => "DUPLICATE_INSTRUCTION",
            ClearingError::InstructionNotFound(_) => "INSTRUCTION_NOT_FOUND",
            ClearingError::InvalidAmount(_) => "INVALID_AMOUNT",
            ClearingError::Config(_) => "CONFIGURATION_ERROR",
            ClearingError::Serialization(_) => "SERIALIZATION_ERROR",
            ClearingError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
