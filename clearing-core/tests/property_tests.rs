//! Property-based tests for the netting recompute

use chrono::Utc;
use clearing_core::netting::NettingEngine;
use clearing_core::{Bic, InclusionStatus, Instruction, OperationKind};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

const BANKS: [&str; 4] = ["BANKA", "BANKB", "BANKC", "BANKD"];

fn arb_instruction() -> impl Strategy<Value = Instruction> {
    (
        prop_oneof![Just(OperationKind::Payment), Just(OperationKind::Reversal)],
        0usize..BANKS.len(),
        0usize..BANKS.len(),
        1i64..10_000_000,
        prop_oneof![
            Just(InclusionStatus::Included),
            Just(InclusionStatus::Excluded),
            Just(InclusionStatus::Pending),
        ],
    )
        .prop_filter_map(
            "sender and receiver must differ",
            |(kind, s, r, cents, inclusion)| {
                if s == r {
                    return None;
                }
                Some(Instruction {
                    instruction_id: Uuid::new_v4(),
                    original_instruction_id: None,
                    cycle_id: 1,
                    kind,
                    sender_bic: Bic::new(BANKS[s]),
                    receiver_bic: Bic::new(BANKS[r]),
                    amount: Decimal::new(cents, 2),
                    inclusion,
                    reference_code: None,
                    received_at: Utc::now(),
                })
            },
        )
}

fn engine() -> NettingEngine {
    NettingEngine::new(Decimal::new(1, 2))
}

proptest! {
    /// Every instruction debits one party exactly what it credits the
    /// other, so the nets of any log sum to zero.
    #[test]
    fn recomputed_positions_always_sum_to_zero(
        log in proptest::collection::vec(arb_instruction(), 0..64)
    ) {
        let positions = engine().recompute(1, &[], &log);
        let sum = engine().check_balance(1, &positions).unwrap();
        prop_assert_eq!(sum, Decimal::ZERO);
    }

    /// The recompute is a pure function of the log.
    #[test]
    fn recompute_is_deterministic(
        log in proptest::collection::vec(arb_instruction(), 0..64)
    ) {
        let first = engine().recompute(1, &[], &log);
        let second = engine().recompute(1, &[], &log);
        prop_assert_eq!(first, second);
    }

    /// Non-included instructions contribute nothing: dropping them from
    /// the log does not change the included participants' totals.
    #[test]
    fn excluded_instructions_are_inert(
        log in proptest::collection::vec(arb_instruction(), 0..64)
    ) {
        let included_only: Vec<Instruction> = log
            .iter()
            .filter(|i| i.inclusion == InclusionStatus::Included)
            .cloned()
            .collect();

        let full = engine().recompute(1, &[], &log);
        let filtered = engine().recompute(1, &[], &included_only);
        prop_assert_eq!(full, filtered);
    }

    /// Debit and credit totals across all participants match: the total
    /// moved out equals the total moved in.
    #[test]
    fn aggregate_debits_equal_aggregate_credits(
        log in proptest::collection::vec(arb_instruction(), 0..64)
    ) {
        let positions = engine().recompute(1, &[], &log);
        let debits: Decimal = positions.iter().map(|p| p.total_debits).sum();
        let credits: Decimal = positions.iter().map(|p| p.total_credits).sum();
        prop_assert_eq!(debits, credits);
    }
}
