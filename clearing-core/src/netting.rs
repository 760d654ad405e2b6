//! Netting recompute
//!
//! Recomputes every position of a cycle from the full instruction log.
//!
//! # Design
//!
//! This is a full replay, not an incremental diff. The per-instruction
//! accumulation applied while the cycle is open is a convenience view for
//! dashboards; at closure the replay is the single source of truth and
//! discards any drift the interactive path may have accumulated.
//!
//! # Example
//!
//! ```text
//! PAYMENT  BANKA → BANKB  100.00   (debit BANKA, credit BANKB)
//! REVERSAL BANKA → BANKB   20.00   (credit BANKA, debit BANKB)
//!
//! BANKA: debits 100.00, credits 20.00, net -80.00
//! BANKB: debits 20.00, credits 100.00, net +80.00
//! sum(net) = 0.00
//! ```

use crate::error::{ClearingError, Result};
use crate::types::{Bic, CycleId, Instruction, Position};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Netting engine: deterministic full recompute plus the zero-sum check
pub struct NettingEngine {
    /// Tolerance for the zero-sum invariant, absorbs rounding
    tolerance: Decimal,
}

impl NettingEngine {
    /// Create new netting engine
    pub fn new(tolerance: Decimal) -> Self {
        Self { tolerance }
    }

    /// Recompute all positions of a cycle from its instruction log.
    ///
    /// Every known participant starts from a zeroed position, then each
    /// included instruction is replayed in insertion order. Excluded and
    /// pending instructions contribute nothing. Deterministic and
    /// idempotent: the same log always yields the same positions.
    pub fn recompute(
        &self,
        cycle_id: CycleId,
        known_bics: &[Bic],
        instructions: &[Instruction],
    ) -> Vec<Position> {
        let mut positions: BTreeMap<Bic, Position> = known_bics
            .iter()
            .map(|bic| (bic.clone(), Position::new(cycle_id, bic.clone())))
            .collect();

        for instruction in instructions {
            if !instruction.inclusion.is_included() {
                continue;
            }

            let (debit_party, credit_party) = instruction
                .kind
                .debit_credit(&instruction.sender_bic, &instruction.receiver_bic);

            positions
                .entry(debit_party.clone())
                .or_insert_with(|| Position::new(cycle_id, debit_party.clone()))
                .apply_debit(instruction.amount);

            positions
                .entry(credit_party.clone())
                .or_insert_with(|| Position::new(cycle_id, credit_party.clone()))
                .apply_credit(instruction.amount);
        }

        positions.into_values().collect()
    }

    /// Zero-sum invariant: |sum(net)| must stay within tolerance.
    /// Violation is fatal for the closure attempt and signals a
    /// bookkeeping bug upstream.
    pub fn check_balance(&self, cycle_id: CycleId, positions: &[Position]) -> Result<Decimal> {
        let sum: Decimal = positions.iter().map(|p| p.net).sum();

        if sum.abs() > self.tolerance {
            return Err(ClearingError::UnbalancedCycle { cycle_id, sum });
        }

        Ok(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InclusionStatus, OperationKind};
    use chrono::Utc;
    use uuid::Uuid;

    fn instruction(
        kind: OperationKind,
        sender: &str,
        receiver: &str,
        cents: i64,
        inclusion: InclusionStatus,
    ) -> Instruction {
        Instruction {
            instruction_id: Uuid::new_v4(),
            original_instruction_id: None,
            cycle_id: 1,
            kind,
            sender_bic: Bic::new(sender),
            receiver_bic: Bic::new(receiver),
            amount: Decimal::new(cents, 2),
            inclusion,
            reference_code: None,
            received_at: Utc::now(),
        }
    }

    fn engine() -> NettingEngine {
        NettingEngine::new(Decimal::new(1, 2))
    }

    #[test]
    fn test_payment_and_reversal_scenario() {
        let log = vec![
            instruction(
                OperationKind::Payment,
                "BANKA",
                "BANKB",
                10000,
                InclusionStatus::Included,
            ),
            instruction(
                OperationKind::Reversal,
                "BANKA",
                "BANKB",
                2000,
                InclusionStatus::Included,
            ),
        ];

        let positions = engine().recompute(1, &[], &log);
        assert_eq!(positions.len(), 2);

        let banka = &positions[0];
        assert_eq!(banka.bic, Bic::new("BANKA"));
        assert_eq!(banka.total_debits, Decimal::new(10000, 2));
        assert_eq!(banka.total_credits, Decimal::new(2000, 2));
        assert_eq!(banka.net, Decimal::new(-8000, 2));

        let bankb = &positions[1];
        assert_eq!(bankb.bic, Bic::new("BANKB"));
        assert_eq!(bankb.total_debits, Decimal::new(2000, 2));
        assert_eq!(bankb.total_credits, Decimal::new(10000, 2));
        assert_eq!(bankb.net, Decimal::new(8000, 2));

        let sum = engine().check_balance(1, &positions).unwrap();
        assert_eq!(sum, Decimal::ZERO);
    }

    #[test]
    fn test_excluded_and_pending_contribute_nothing() {
        let log = vec![
            instruction(
                OperationKind::Payment,
                "BANKA",
                "BANKB",
                10000,
                InclusionStatus::Included,
            ),
            instruction(
                OperationKind::Payment,
                "BANKA",
                "BANKB",
                5000,
                InclusionStatus::Excluded,
            ),
            instruction(
                OperationKind::Payment,
                "BANKB",
                "BANKA",
                3000,
                InclusionStatus::Pending,
            ),
        ];

        let positions = engine().recompute(1, &[], &log);
        let banka = &positions[0];
        assert_eq!(banka.total_debits, Decimal::new(10000, 2));
        assert_eq!(banka.total_credits, Decimal::ZERO);
    }

    #[test]
    fn test_flipping_inclusion_changes_result_deterministically() {
        let mut log = vec![
            instruction(
                OperationKind::Payment,
                "BANKA",
                "BANKB",
                10000,
                InclusionStatus::Included,
            ),
            instruction(
                OperationKind::Payment,
                "BANKA",
                "BANKB",
                5000,
                InclusionStatus::Excluded,
            ),
        ];

        let before = engine().recompute(1, &[], &log);
        assert_eq!(before[0].total_debits, Decimal::new(10000, 2));

        log[1].inclusion = InclusionStatus::Included;
        let after = engine().recompute(1, &[], &log);
        assert_eq!(after[0].total_debits, Decimal::new(15000, 2));
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let log = vec![
            instruction(
                OperationKind::Payment,
                "BANKA",
                "BANKB",
                12345,
                InclusionStatus::Included,
            ),
            instruction(
                OperationKind::Reversal,
                "BANKA",
                "BANKB",
                45,
                InclusionStatus::Included,
            ),
            instruction(
                OperationKind::Payment,
                "BANKB",
                "BANKC",
                9900,
                InclusionStatus::Included,
            ),
        ];

        let first = engine().recompute(1, &[], &log);
        let second = engine().recompute(1, &[], &log);
        assert_eq!(first, second);
    }

    #[test]
    fn test_known_bics_start_zeroed() {
        let positions = engine().recompute(1, &[Bic::new("BANKZ")], &[]);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].net, Decimal::ZERO);
    }

    #[test]
    fn test_unbalanced_positions_fail_check() {
        let mut lonely = Position::new(1, Bic::new("BANKA"));
        lonely.apply_debit(Decimal::new(10000, 2));

        let result = engine().check_balance(1, &[lonely]);
        assert!(matches!(
            result,
            Err(ClearingError::UnbalancedCycle { sum, .. }) if sum == Decimal::new(-10000, 2)
        ));
    }

    #[test]
    fn test_rounding_within_tolerance_passes() {
        let mut a = Position::new(1, Bic::new("BANKA"));
        a.apply_credit(Decimal::new(1, 2)); // +0.01 residue

        let sum = engine().check_balance(1, &[a]).unwrap();
        assert_eq!(sum, Decimal::new(1, 2));
    }
}
