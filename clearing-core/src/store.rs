//! In-process clearing store
//!
//! Holds the three shared mutable resources of the engine: cycles,
//! positions and the append-only instruction log, plus the settlement
//! artifacts produced at closure. All access goes through a single
//! `RwLock` so that every public method is an atomic read-modify-write;
//! `commit_closure` applies the whole closure write set in one critical
//! section.

use crate::error::{ClearingError, Result};
use crate::types::{
    Bic, Cycle, CycleId, CycleStatus, InclusionStatus, Instruction, Position, SettlementArtifact,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Default)]
struct StoreInner {
    cycles: BTreeMap<CycleId, Cycle>,
    positions: HashMap<CycleId, BTreeMap<Bic, Position>>,
    instructions: Vec<Instruction>,
    instruction_index: HashMap<Uuid, usize>,
    artifacts: HashMap<CycleId, SettlementArtifact>,
    next_cycle_id: CycleId,
    next_artifact_id: i64,
}

/// In-process store for cycles, positions, instructions and artifacts
pub struct ClearingStore {
    inner: RwLock<StoreInner>,
}

impl Default for ClearingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClearingStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    // ===== CYCLES =====

    /// Create a new open cycle. Fails if another cycle is still open,
    /// which would break the single-open-cycle invariant.
    pub fn open_cycle(
        &self,
        sequence: i64,
        description: String,
        opened_at: DateTime<Utc>,
    ) -> Result<Cycle> {
        let mut inner = self.inner.write();

        if let Some(open) = inner.cycles.values().find(|c| c.is_open()) {
            return Err(ClearingError::Internal(format!(
                "cycle {} is still open",
                open.id
            )));
        }

        inner.next_cycle_id += 1;
        let cycle = Cycle {
            id: inner.next_cycle_id,
            sequence,
            description,
            status: CycleStatus::Open,
            opened_at,
            closed_at: None,
        };

        inner.cycles.insert(cycle.id, cycle.clone());
        inner.positions.entry(cycle.id).or_default();

        Ok(cycle)
    }

    /// The single open cycle, if any
    pub fn current_open(&self) -> Option<Cycle> {
        let inner = self.inner.read();
        inner.cycles.values().find(|c| c.is_open()).cloned()
    }

    /// Cycle by id
    pub fn cycle(&self, cycle_id: CycleId) -> Option<Cycle> {
        self.inner.read().cycles.get(&cycle_id).cloned()
    }

    /// All cycles in creation order
    pub fn cycles(&self) -> Vec<Cycle> {
        self.inner.read().cycles.values().cloned().collect()
    }

    /// Whether any cycle exists yet
    pub fn has_cycles(&self) -> bool {
        !self.inner.read().cycles.is_empty()
    }

    // ===== POSITIONS =====

    /// Apply a debit to the participant's position, creating it zeroed on
    /// first reference. Interactive convenience view only; the netting
    /// recompute at closure is the authority.
    pub fn accumulate_debit(&self, cycle_id: CycleId, bic: &Bic, amount: Decimal) {
        let mut inner = self.inner.write();
        let position = entry_position(&mut inner, cycle_id, bic);
        position.apply_debit(amount);
    }

    /// Apply a credit to the participant's position, creating it zeroed on
    /// first reference
    pub fn accumulate_credit(&self, cycle_id: CycleId, bic: &Bic, amount: Decimal) {
        let mut inner = self.inner.write();
        let position = entry_position(&mut inner, cycle_id, bic);
        position.apply_credit(amount);
    }

    /// Pre-seed a zeroed position (carry-forward of the participant set
    /// into a successor cycle; balances never carry)
    pub fn seed_position(&self, cycle_id: CycleId, bic: &Bic) {
        let mut inner = self.inner.write();
        entry_position(&mut inner, cycle_id, bic);
    }

    /// Positions of a cycle, ordered by BIC
    pub fn positions(&self, cycle_id: CycleId) -> Vec<Position> {
        self.inner
            .read()
            .positions
            .get(&cycle_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    // ===== INSTRUCTION LOG =====

    /// Append an instruction to the log. Duplicate instruction ids are
    /// rejected so the netting recompute stays idempotent.
    pub fn append_instruction(&self, instruction: Instruction) -> Result<()> {
        let mut inner = self.inner.write();

        if inner
            .instruction_index
            .contains_key(&instruction.instruction_id)
        {
            return Err(ClearingError::DuplicateInstruction(
                instruction.instruction_id,
            ));
        }

        let index = inner.instructions.len();
        inner
            .instruction_index
            .insert(instruction.instruction_id, index);
        inner.instructions.push(instruction);

        Ok(())
    }

    /// Instructions of a cycle in insertion order
    pub fn instructions_for(&self, cycle_id: CycleId) -> Vec<Instruction> {
        self.inner
            .read()
            .instructions
            .iter()
            .filter(|i| i.cycle_id == cycle_id)
            .cloned()
            .collect()
    }

    /// Instruction by id
    pub fn instruction(&self, instruction_id: Uuid) -> Option<Instruction> {
        let inner = self.inner.read();
        inner
            .instruction_index
            .get(&instruction_id)
            .map(|&idx| inner.instructions[idx].clone())
    }

    /// Flip the inclusion status of an instruction (operational
    /// intervention before a later recompute)
    pub fn set_inclusion(
        &self,
        instruction_id: Uuid,
        status: InclusionStatus,
    ) -> Result<Instruction> {
        let mut inner = self.inner.write();
        let index = *inner
            .instruction_index
            .get(&instruction_id)
            .ok_or(ClearingError::InstructionNotFound(instruction_id))?;

        inner.instructions[index].inclusion = status;
        Ok(inner.instructions[index].clone())
    }

    // ===== ARTIFACTS =====

    /// Artifact of a cycle, if the cycle has closed
    pub fn artifact(&self, cycle_id: CycleId) -> Option<SettlementArtifact> {
        self.inner.read().artifacts.get(&cycle_id).cloned()
    }

    // ===== CLOSURE COMMIT =====

    /// Apply the full closure write set atomically: replace the cycle's
    /// positions with the recomputed ones, persist the artifact and
    /// transition the cycle to closed. Nothing is written if the cycle is
    /// not open.
    pub fn commit_closure(
        &self,
        cycle_id: CycleId,
        recomputed: Vec<Position>,
        file_name: String,
        xml_content: String,
        closed_at: DateTime<Utc>,
    ) -> Result<SettlementArtifact> {
        let mut inner = self.inner.write();

        let cycle = inner
            .cycles
            .get(&cycle_id)
            .ok_or(ClearingError::CycleNotFound(cycle_id))?;
        if !cycle.is_open() {
            return Err(ClearingError::AlreadyClosed(cycle_id));
        }

        let mut by_bic = BTreeMap::new();
        for position in recomputed {
            by_bic.insert(position.bic.clone(), position);
        }
        inner.positions.insert(cycle_id, by_bic);

        inner.next_artifact_id += 1;
        let artifact = SettlementArtifact {
            id: inner.next_artifact_id,
            cycle_id,
            file_name,
            xml_content,
            generated_at: closed_at,
        };
        inner.artifacts.insert(cycle_id, artifact.clone());

        let cycle = inner
            .cycles
            .get_mut(&cycle_id)
            .ok_or(ClearingError::CycleNotFound(cycle_id))?;
        cycle.status = CycleStatus::Closed;
        cycle.closed_at = Some(closed_at);

        Ok(artifact)
    }
}

fn entry_position<'a>(inner: &'a mut StoreInner, cycle_id: CycleId, bic: &Bic) -> &'a mut Position {
    inner
        .positions
        .entry(cycle_id)
        .or_default()
        .entry(bic.clone())
        .or_insert_with(|| Position::new(cycle_id, bic.clone()))
}
