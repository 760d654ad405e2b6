//! Core types for the clearing cycle engine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bank identifier (BIC/SWIFT code), the participant key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bic(String);

impl Bic {
    /// Create new BIC
    pub fn new(bic: impl Into<String>) -> Self {
        Self(bic.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Bic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cycle identifier (store-assigned, monotonically increasing)
pub type CycleId = i64;

/// Cycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CycleStatus {
    /// Cycle open, accumulating instructions
    Open,
    /// Cycle closed, positions settled
    Closed,
}

impl CycleStatus {
    /// String form used in logs and exports
    pub fn as_str(&self) -> &str {
        match self {
            CycleStatus::Open => "OPEN",
            CycleStatus::Closed => "CLOSED",
        }
    }
}

/// A bounded clearing period. Exactly one cycle is open at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    /// Store-assigned identifier
    pub id: CycleId,

    /// Business sequence number, strictly greater than the predecessor's
    pub sequence: i64,

    /// Human-readable description
    pub description: String,

    /// Cycle status
    pub status: CycleStatus,

    /// Opening timestamp (UTC)
    pub opened_at: DateTime<Utc>,

    /// Closing timestamp (UTC), set only once the cycle closes
    pub closed_at: Option<DateTime<Utc>>,
}

impl Cycle {
    /// Whether the cycle is still accepting instructions
    pub fn is_open(&self) -> bool {
        matches!(self.status, CycleStatus::Open)
    }
}

/// Operation kind of a registered instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    /// Debits the sender, credits the receiver
    Payment,
    /// Credits the sender, debits the receiver. Sender/receiver keep the
    /// roles of the original payment; reversing does not swap them.
    Reversal,
}

impl OperationKind {
    /// Total mapping from operation kind to (debit party, credit party).
    /// Resolved here once so accumulation and recompute cannot diverge.
    pub fn debit_credit<'a>(&self, sender: &'a Bic, receiver: &'a Bic) -> (&'a Bic, &'a Bic) {
        match self {
            OperationKind::Payment => (sender, receiver),
            OperationKind::Reversal => (receiver, sender),
        }
    }
}

/// Inclusion status of an instruction in the netting recompute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InclusionStatus {
    /// Replayed by the netting recompute
    Included,
    /// Skipped by the netting recompute (operational exclusion)
    Excluded,
    /// Awaiting operational decision; skipped like Excluded
    Pending,
}

impl InclusionStatus {
    /// Whether the netting recompute replays this instruction
    pub fn is_included(&self) -> bool {
        matches!(self, InclusionStatus::Included)
    }
}

/// An entry in the append-only instruction log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    /// Externally supplied unique identifier
    pub instruction_id: Uuid,

    /// For reversals, the instruction being reversed
    pub original_instruction_id: Option<Uuid>,

    /// Cycle the instruction was received under
    pub cycle_id: CycleId,

    /// Operation kind
    pub kind: OperationKind,

    /// Sender BIC (original payment role, also for reversals)
    pub sender_bic: Bic,

    /// Receiver BIC (original payment role, also for reversals)
    pub receiver_bic: Bic,

    /// Positive amount
    pub amount: Decimal,

    /// Inclusion status, the only mutable field
    pub inclusion: InclusionStatus,

    /// Optional 6-digit bank reference code for returns
    pub reference_code: Option<String>,

    /// Reception timestamp (UTC)
    pub received_at: DateTime<Utc>,
}

/// Intake request for a new instruction (HTTP and queue adapters share it)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterInstruction {
    /// Externally supplied unique identifier
    pub instruction_id: Uuid,

    /// For reversals, the instruction being reversed
    pub original_instruction_id: Option<Uuid>,

    /// Operation kind
    pub kind: OperationKind,

    /// Sender BIC
    pub sender_bic: Bic,

    /// Receiver BIC
    pub receiver_bic: Bic,

    /// Positive amount
    pub amount: Decimal,

    /// Optional reference code
    pub reference_code: Option<String>,
}

/// A participant's accumulated debit/credit/net for one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Owning cycle
    pub cycle_id: CycleId,

    /// Participant BIC
    pub bic: Bic,

    /// Accumulated debit total
    pub total_debits: Decimal,

    /// Accumulated credit total
    pub total_credits: Decimal,

    /// Net position: credits minus debits
    pub net: Decimal,
}

impl Position {
    /// Create a zeroed position
    pub fn new(cycle_id: CycleId, bic: Bic) -> Self {
        Self {
            cycle_id,
            bic,
            total_debits: Decimal::ZERO,
            total_credits: Decimal::ZERO,
            net: Decimal::ZERO,
        }
    }

    /// Apply a debit and refresh the net
    pub fn apply_debit(&mut self, amount: Decimal) {
        self.total_debits += amount;
        self.recalculate_net();
    }

    /// Apply a credit and refresh the net
    pub fn apply_credit(&mut self, amount: Decimal) {
        self.total_credits += amount;
        self.recalculate_net();
    }

    /// Net is always credits minus debits
    pub fn recalculate_net(&mut self) {
        self.net = self.total_credits - self.total_debits;
    }
}

/// Settlement artifact generated exactly once per cycle closure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementArtifact {
    /// Store-assigned identifier
    pub id: i64,

    /// Owning cycle
    pub cycle_id: CycleId,

    /// Export file name, `LIQ_CICLO_{sequence}.xml`
    pub file_name: String,

    /// Generated XML document
    pub xml_content: String,

    /// Generation timestamp (UTC)
    pub generated_at: DateTime<Utc>,
}

/// Net position record as pushed to the external accounting ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetPositionRecord {
    /// Participant BIC
    pub bic: Bic,

    /// Accumulated debit total
    pub total_debits: Decimal,

    /// Accumulated credit total
    pub total_credits: Decimal,

    /// Net position
    pub net: Decimal,
}

impl From<&Position> for NetPositionRecord {
    fn from(position: &Position) -> Self {
        Self {
            bic: position.bic.clone(),
            total_debits: position.total_debits,
            total_credits: position.total_credits,
            net: position.net,
        }
    }
}
