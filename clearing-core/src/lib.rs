//! # Clearing Core
//!
//! Multilateral clearing and settlement cycle engine.
//!
//! Participant banks exchange payment and reversal instructions inside
//! bounded clearing cycles. While a cycle is open, the engine keeps an
//! interactive view of each participant's debit/credit/net position. At
//! closure it recomputes every position from the append-only instruction
//! log, verifies that the nets sum to zero, commits the closure
//! atomically, generates the settlement file, pushes the final balances
//! to the external accounting ledger, and opens the successor cycle with
//! an armed automatic closure.
//!
//! ## Modules
//!
//! - [`engine`]: lifecycle orchestration
//! - [`store`]: in-process state (cycles, positions, instruction log)
//! - [`netting`]: full-replay position recompute and the zero-sum check
//! - [`scheduler`]: deferred automatic closure tasks
//! - [`artifact`]: settlement XML generation
//! - [`dispatch`]: external ledger handoff
//! - [`metrics`]: Prometheus counters and gauges

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod artifact;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod netting;
pub mod scheduler;
pub mod store;
pub mod types;

pub use config::Config;
pub use dispatch::{HttpLedgerDispatcher, LedgerDispatcher, MockLedgerDispatcher};
pub use engine::{ClearingEngine, CycleClosure};
pub use error::{ClearingError, Result};
pub use store::ClearingStore;
pub use types::{
    Bic, Cycle, CycleId, CycleStatus, InclusionStatus, Instruction, OperationKind, Position,
    RegisterInstruction, SettlementArtifact,
};
