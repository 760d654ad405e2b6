//! Clearing cycle engine
//!
//! Orchestrates the full cycle lifecycle: bootstrap of the initial
//! cycle, instruction intake with interactive position accumulation,
//! operational inclusion overrides, and closure. Closure recomputes
//! every position from the instruction log, verifies the zero-sum
//! invariant, commits atomically (positions, artifact, status), pushes
//! the final balances to the external ledger, and only then opens the
//! successor cycle and arms its automatic closure.
//!
//! A single transaction lock serializes instruction intake against the
//! closure sequence, so an instruction can never land between the
//! recompute and the commit. Registrations arriving while a closure is
//! in flight park on the lock and land in the successor cycle (or get
//! `NoOpenCycle` if the ledger handoff failed and no successor opened).

use crate::artifact::SettlementFileGenerator;
use crate::config::Config;
use crate::dispatch::LedgerDispatcher;
use crate::error::{ClearingError, Result};
use crate::metrics::Metrics;
use crate::netting::NettingEngine;
use crate::scheduler::SettlementScheduler;
use crate::store::ClearingStore;
use crate::types::{
    Bic, Cycle, CycleId, InclusionStatus, Instruction, Position, RegisterInstruction,
    SettlementArtifact,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of a committed cycle closure
#[derive(Debug, Clone, Serialize)]
pub struct CycleClosure {
    /// The cycle as committed, status closed
    pub cycle: Cycle,

    /// Final recomputed positions
    pub positions: Vec<Position>,

    /// Settlement artifact generated for this closure
    pub artifact: SettlementArtifact,

    /// Successor cycle opened by the closure (a failed ledger handoff
    /// surfaces as an error before any closure value is produced)
    pub successor: Cycle,
}

/// The clearing cycle engine
pub struct ClearingEngine {
    store: ClearingStore,
    netting: NettingEngine,
    generator: SettlementFileGenerator,
    dispatcher: Arc<dyn LedgerDispatcher>,
    scheduler: SettlementScheduler,
    metrics: Metrics,
    config: Config,

    /// Serializes instruction intake against the closure sequence
    txn_lock: Mutex<()>,

    /// Handle to ourselves for deferred closure tasks. Weak so the
    /// scheduler never keeps a dropped engine alive.
    self_ref: Weak<ClearingEngine>,
}

impl ClearingEngine {
    /// Create a new engine. No cycle is opened yet; the first call to
    /// `bootstrap` or `list_cycles` opens the initial one.
    pub fn new(config: Config, dispatcher: Arc<dyn LedgerDispatcher>) -> Result<Arc<Self>> {
        let metrics =
            Metrics::new().map_err(|e| ClearingError::Internal(format!("metrics init: {}", e)))?;
        let fallback = Duration::from_secs(config.cycle.fallback_delay_seconds);
        let tolerance = config.cycle.balance_tolerance;

        Ok(Arc::new_cyclic(|weak| Self {
            store: ClearingStore::new(),
            netting: NettingEngine::new(tolerance),
            generator: SettlementFileGenerator::new("USD"),
            dispatcher,
            scheduler: SettlementScheduler::new(fallback),
            metrics,
            config,
            txn_lock: Mutex::new(()),
            self_ref: weak.clone(),
        }))
    }

    /// Engine metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Open the initial cycle if none exists yet. Idempotent.
    pub async fn bootstrap(&self) -> Result<Cycle> {
        let _guard = self.txn_lock.lock().await;
        self.ensure_open_cycle()
    }

    /// All cycles in creation order, bootstrapping the initial cycle on
    /// first call so the engine is never observed without one.
    pub async fn list_cycles(&self) -> Result<Vec<Cycle>> {
        let _guard = self.txn_lock.lock().await;
        self.ensure_open_cycle()?;
        Ok(self.store.cycles())
    }

    /// The single open cycle
    pub fn current_open_cycle(&self) -> Result<Cycle> {
        self.store.current_open().ok_or(ClearingError::NoOpenCycle)
    }

    /// Cycle by id
    pub fn cycle(&self, cycle_id: CycleId) -> Result<Cycle> {
        self.store
            .cycle(cycle_id)
            .ok_or(ClearingError::CycleNotFound(cycle_id))
    }

    /// Positions of a cycle, ordered by BIC
    pub fn positions(&self, cycle_id: CycleId) -> Result<Vec<Position>> {
        self.cycle(cycle_id)?;
        Ok(self.store.positions(cycle_id))
    }

    /// Instructions of a cycle in reception order
    pub fn instructions(&self, cycle_id: CycleId) -> Result<Vec<Instruction>> {
        self.cycle(cycle_id)?;
        Ok(self.store.instructions_for(cycle_id))
    }

    /// Settlement artifact of a cycle. `None` until the cycle closes.
    pub fn artifact(&self, cycle_id: CycleId) -> Result<Option<SettlementArtifact>> {
        self.cycle(cycle_id)?;
        Ok(self.store.artifact(cycle_id))
    }

    /// Register an instruction against the current open cycle.
    ///
    /// Appends to the log and applies the interactive accumulation to
    /// both counterparties' positions. The accumulation is a convenience
    /// view; the recompute at closure is the authority.
    pub async fn register_instruction(&self, request: RegisterInstruction) -> Result<Instruction> {
        if request.amount <= Decimal::ZERO {
            return Err(ClearingError::InvalidAmount(request.amount));
        }

        let _guard = self.txn_lock.lock().await;
        let cycle = self.current_open_cycle()?;

        let instruction = Instruction {
            instruction_id: request.instruction_id,
            original_instruction_id: request.original_instruction_id,
            cycle_id: cycle.id,
            kind: request.kind,
            sender_bic: request.sender_bic,
            receiver_bic: request.receiver_bic,
            amount: request.amount,
            inclusion: InclusionStatus::Included,
            reference_code: request.reference_code,
            received_at: Utc::now(),
        };

        self.store.append_instruction(instruction.clone())?;

        let (debit_party, credit_party) = instruction
            .kind
            .debit_credit(&instruction.sender_bic, &instruction.receiver_bic);
        self.store
            .accumulate_debit(cycle.id, debit_party, instruction.amount);
        self.store
            .accumulate_credit(cycle.id, credit_party, instruction.amount);

        self.metrics.instructions_registered_total.inc();
        info!(
            "Registered {:?} instruction {} for {} in cycle {}",
            instruction.kind, instruction.instruction_id, instruction.amount, cycle.sequence
        );

        Ok(instruction)
    }

    /// Flip the inclusion status of a logged instruction. Takes effect at
    /// the next recompute; the interactive positions are deliberately
    /// left untouched.
    pub async fn set_inclusion_status(
        &self,
        instruction_id: Uuid,
        status: InclusionStatus,
    ) -> Result<Instruction> {
        let _guard = self.txn_lock.lock().await;
        let updated = self.store.set_inclusion(instruction_id, status)?;
        info!(
            "Instruction {} inclusion set to {:?}",
            instruction_id, status
        );
        Ok(updated)
    }

    /// Close a cycle: recompute, verify zero-sum, commit, dispatch, open
    /// the successor. `next_duration_minutes` overrides the configured
    /// default duration for the successor cycle.
    ///
    /// The cycle commits as closed before the ledger handoff. If the
    /// handoff then fails, the closure stands (positions and artifact
    /// are final) but no successor opens; the error propagates for
    /// manual reconciliation.
    pub async fn close_cycle(
        &self,
        cycle_id: CycleId,
        next_duration_minutes: Option<i64>,
    ) -> Result<CycleClosure> {
        let _guard = self.txn_lock.lock().await;
        self.close_cycle_locked(cycle_id, next_duration_minutes).await
    }

    async fn close_cycle_locked(
        &self,
        cycle_id: CycleId,
        next_duration_minutes: Option<i64>,
    ) -> Result<CycleClosure> {
        let cycle = self.cycle(cycle_id)?;
        if !cycle.is_open() {
            return Err(ClearingError::AlreadyClosed(cycle_id));
        }

        // Replay the full log; the interactive accumulation is discarded
        let known_bics: Vec<Bic> = self
            .store
            .positions(cycle_id)
            .into_iter()
            .map(|p| p.bic)
            .collect();
        let instructions = self.store.instructions_for(cycle_id);
        let recomputed = self.netting.recompute(cycle_id, &known_bics, &instructions);

        let sum = match self.netting.check_balance(cycle_id, &recomputed) {
            Ok(sum) => sum,
            Err(e) => {
                self.metrics.unbalanced_closures_total.inc();
                error!("Closure of cycle {} aborted: {}", cycle.sequence, e);
                return Err(e);
            }
        };

        let closed_at = Utc::now();
        let (file_name, xml_content) = self.generator.generate(&cycle, &recomputed, closed_at)?;
        let artifact =
            self.store
                .commit_closure(cycle_id, recomputed, file_name, xml_content, closed_at)?;

        self.scheduler.cancel(cycle_id);
        self.metrics.cycles_closed_total.inc();
        self.metrics.open_cycle_sequence.set(0);

        let cycle = self.cycle(cycle_id)?;
        let positions = self.store.positions(cycle_id);
        info!(
            "Cycle {} closed with {} positions, net sum {}",
            cycle.sequence,
            positions.len(),
            sum
        );

        if let Err(e) = self.dispatcher.push(&cycle, &positions).await {
            self.metrics.dispatch_failures_total.inc();
            error!(
                "Cycle {} committed but ledger handoff failed, no successor opened: {}",
                cycle.sequence, e
            );
            return Err(e);
        }

        let successor = self.open_successor(&cycle, next_duration_minutes)?;

        Ok(CycleClosure {
            cycle,
            positions,
            artifact,
            successor,
        })
    }

    /// Deferred closure entry point. A task firing against a cycle that
    /// already closed (manual closure won the race) is a silent no-op.
    pub async fn auto_close(&self, cycle_id: CycleId) {
        let _guard = self.txn_lock.lock().await;

        match self.store.cycle(cycle_id) {
            Some(cycle) if cycle.is_open() => {
                info!("Automatic closure firing for cycle {}", cycle.sequence);
                if let Err(e) = self.close_cycle_locked(cycle_id, None).await {
                    error!("Automatic closure of cycle {} failed: {}", cycle_id, e);
                }
            }
            Some(_) => {
                debug!("Automatic closure for cycle {} skipped, already closed", cycle_id);
            }
            None => {
                warn!("Automatic closure for unknown cycle {}", cycle_id);
            }
        }
    }

    /// Open the initial cycle if the store is empty. Callers hold the
    /// transaction lock.
    fn ensure_open_cycle(&self) -> Result<Cycle> {
        if let Some(open) = self.store.current_open() {
            return Ok(open);
        }
        if self.store.has_cycles() {
            // All cycles closed after a dispatch failure; reopening is a
            // manual reconciliation step, not something reads trigger.
            return Err(ClearingError::NoOpenCycle);
        }

        let cycle = self
            .store
            .open_cycle(1, "Initial cycle".to_string(), Utc::now())?;
        self.record_opened(&cycle);
        info!("Bootstrapped initial cycle {}", cycle.sequence);
        Ok(cycle)
    }

    /// Open the successor of a just-closed cycle: next sequence number,
    /// participant set carried forward with zeroed balances, automatic
    /// closure armed.
    fn open_successor(&self, closed: &Cycle, duration_minutes: Option<i64>) -> Result<Cycle> {
        let sequence = closed.sequence + 1;
        let successor =
            self.store
                .open_cycle(sequence, format!("Cycle {}", sequence), Utc::now())?;

        // Balances never carry across cycles, only the participant set
        for position in self.store.positions(closed.id) {
            self.store.seed_position(successor.id, &position.bic);
        }

        self.record_opened_with(&successor, duration_minutes);
        info!(
            "Opened successor cycle {} after cycle {}",
            successor.sequence, closed.sequence
        );
        Ok(successor)
    }

    fn record_opened(&self, cycle: &Cycle) {
        self.record_opened_with(cycle, None);
    }

    fn record_opened_with(&self, cycle: &Cycle, duration_minutes: Option<i64>) {
        self.metrics.cycles_opened_total.inc();
        self.metrics.open_cycle_sequence.set(cycle.sequence);
        let minutes = duration_minutes.unwrap_or(self.config.cycle.default_duration_minutes);
        let deadline = cycle.opened_at + ChronoDuration::minutes(minutes);
        self.arm_auto_close(cycle.id, deadline);
    }

    /// Arm (or re-arm) the deferred closure for a cycle
    pub fn arm_auto_close(&self, cycle_id: CycleId, fire_at: DateTime<Utc>) {
        let weak = self.self_ref.clone();
        self.scheduler.arm(cycle_id, fire_at, async move {
            if let Some(engine) = weak.upgrade() {
                engine.auto_close(cycle_id).await;
            }
        });
    }

    /// Whether a deferred closure is armed for a cycle
    pub fn auto_close_armed(&self, cycle_id: CycleId) -> bool {
        self.scheduler.is_armed(cycle_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MockLedgerDispatcher;
    use crate::types::OperationKind;

    fn engine_with_mock() -> (Arc<ClearingEngine>, Arc<MockLedgerDispatcher>) {
        let dispatcher = Arc::new(MockLedgerDispatcher::new());
        let engine = ClearingEngine::new(Config::default(), dispatcher.clone()).unwrap();
        (engine, dispatcher)
    }

    fn payment(sender: &str, receiver: &str, cents: i64) -> RegisterInstruction {
        RegisterInstruction {
            instruction_id: Uuid::new_v4(),
            original_instruction_id: None,
            kind: OperationKind::Payment,
            sender_bic: Bic::new(sender),
            receiver_bic: Bic::new(receiver),
            amount: Decimal::new(cents, 2),
            reference_code: None,
        }
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let (engine, _) = engine_with_mock();
        let first = engine.bootstrap().await.unwrap();
        let second = engine.bootstrap().await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.sequence, 1);
    }

    #[tokio::test]
    async fn test_register_requires_open_cycle() {
        let (engine, _) = engine_with_mock();
        let result = engine.register_instruction(payment("BANKA", "BANKB", 100)).await;
        assert!(matches!(result, Err(ClearingError::NoOpenCycle)));
    }

    #[tokio::test]
    async fn test_register_rejects_non_positive_amount() {
        let (engine, _) = engine_with_mock();
        engine.bootstrap().await.unwrap();

        let mut request = payment("BANKA", "BANKB", 100);
        request.amount = Decimal::ZERO;
        let result = engine.register_instruction(request).await;
        assert!(matches!(result, Err(ClearingError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn test_close_dispatches_and_opens_successor() {
        let (engine, dispatcher) = engine_with_mock();
        let cycle = engine.bootstrap().await.unwrap();

        engine
            .register_instruction(payment("BANKA", "BANKB", 10000))
            .await
            .unwrap();

        let closure = engine.close_cycle(cycle.id, None).await.unwrap();
        assert_eq!(closure.cycle.status, crate::types::CycleStatus::Closed);

        let successor = closure.successor;
        assert_eq!(successor.sequence, 2);
        assert!(engine.auto_close_armed(successor.id));

        // Participant set carried forward with zeroed balances
        let seeded = engine.positions(successor.id).unwrap();
        assert_eq!(seeded.len(), 2);
        assert!(seeded.iter().all(|p| p.net == Decimal::ZERO));

        assert_eq!(dispatcher.recorded().len(), 1);
    }

    #[tokio::test]
    async fn test_close_twice_rejected() {
        let (engine, _) = engine_with_mock();
        let cycle = engine.bootstrap().await.unwrap();
        engine.close_cycle(cycle.id, None).await.unwrap();

        let result = engine.close_cycle(cycle.id, None).await;
        assert!(matches!(result, Err(ClearingError::AlreadyClosed(_))));
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_closure_without_successor() {
        let (engine, dispatcher) = engine_with_mock();
        let cycle = engine.bootstrap().await.unwrap();
        dispatcher.set_failing(true);

        let result = engine.close_cycle(cycle.id, None).await;
        assert!(matches!(result, Err(ClearingError::DispatchFailed(_))));

        // The closure itself stands
        let closed = engine.cycle(cycle.id).unwrap();
        assert!(!closed.is_open());
        assert!(engine.artifact(cycle.id).unwrap().is_some());

        // But no successor opened
        assert!(matches!(
            engine.current_open_cycle(),
            Err(ClearingError::NoOpenCycle)
        ));
    }

    #[tokio::test]
    async fn test_recompute_discards_inclusion_drift() {
        let (engine, _) = engine_with_mock();
        let cycle = engine.bootstrap().await.unwrap();

        let instruction = engine
            .register_instruction(payment("BANKA", "BANKB", 10000))
            .await
            .unwrap();

        // Interactive view shows the instruction applied
        let live = engine.positions(cycle.id).unwrap();
        assert_eq!(live[0].net, Decimal::new(-10000, 2));

        // Excluding it flips nothing interactively but the closure
        // recompute drops it
        engine
            .set_inclusion_status(instruction.instruction_id, InclusionStatus::Excluded)
            .await
            .unwrap();

        let closure = engine.close_cycle(cycle.id, None).await.unwrap();
        assert!(closure.positions.iter().all(|p| p.net == Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_list_cycles_bootstraps() {
        let (engine, _) = engine_with_mock();
        let cycles = engine.list_cycles().await.unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].sequence, 1);
    }
}
