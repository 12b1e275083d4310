//! Property-based tests for the recalculation guard and topic ordering.

use proptest::prelude::*;

use calwatch_core::calibrations::guard::{is_ready_transition, should_recalculate};
use calwatch_core::events::{CalculationState, EditType, ObservationChange};
use calwatch_core::topic::{RecvError, Topic};

// =============================================================================
// Generators
// =============================================================================

fn arb_edit_type() -> impl Strategy<Value = EditType> {
    prop_oneof![
        Just(EditType::Created),
        Just(EditType::Updated),
        Just(EditType::Deleted),
    ]
}

fn arb_state() -> impl Strategy<Value = Option<CalculationState>> {
    proptest::option::of(prop_oneof![
        Just(CalculationState::Pending),
        Just(CalculationState::Calculating),
        Just(CalculationState::Retry),
        Just(CalculationState::Ready),
    ])
}

fn arb_change() -> impl Strategy<Value = ObservationChange> {
    (
        "o-[a-z0-9]{1,8}",
        "p-[a-z0-9]{1,8}",
        arb_edit_type(),
        arb_state(),
        arb_state(),
    )
        .prop_map(|(observation, program, edit, old, new)| {
            ObservationChange::new(observation.as_str(), program.as_str(), edit, old, new)
        })
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Calibration observations never trigger a recalculation.
    #[test]
    fn prop_calibrations_never_trigger(change in arb_change()) {
        prop_assert!(!should_recalculate(&change, true));
    }

    /// For science observations the guard is exactly the ready transition.
    #[test]
    fn prop_science_guard_is_ready_transition(change in arb_change()) {
        prop_assert_eq!(should_recalculate(&change, false), is_ready_transition(&change));
    }

    /// A trigger always lands in Ready from some other state, on a create or update.
    #[test]
    fn prop_trigger_implies_transition_into_ready(change in arb_change()) {
        if should_recalculate(&change, false) {
            prop_assert_eq!(change.new_state, Some(CalculationState::Ready));
            prop_assert_ne!(change.old_state, change.new_state);
            prop_assert_ne!(change.edit_type, EditType::Deleted);
        }
    }

    /// Deletions never trigger, whatever the states.
    #[test]
    fn prop_deletes_never_trigger(
        old in arb_state(),
        new in arb_state(),
    ) {
        let change = ObservationChange::new("o-1", "p-1", EditType::Deleted, old, new);
        prop_assert!(!should_recalculate(&change, false));
    }

    /// A subscriber with room for everything sees every element in publish order.
    #[test]
    fn prop_topic_preserves_order(values in proptest::collection::vec(any::<u32>(), 0..64)) {
        let topic = Topic::new("prop");
        let mut sub = topic.subscribe(64).unwrap();
        for v in &values {
            topic.publish(*v);
        }
        let mut seen = Vec::new();
        while let Some(Ok(v)) = sub.try_recv() {
            seen.push(v);
        }
        prop_assert_eq!(seen, values);
    }

    /// An overflowing subscriber keeps the newest elements, still in order.
    #[test]
    fn prop_topic_overflow_keeps_newest(count in 9usize..64) {
        let topic = Topic::new("prop");
        let mut sub = topic.subscribe(8).unwrap();
        for v in 0..count {
            topic.publish(v);
        }
        let mut lagged = 0;
        let mut seen = Vec::new();
        while let Some(next) = sub.try_recv() {
            match next {
                Ok(v) => seen.push(v),
                Err(RecvError::Lagged(n)) => lagged += n,
                Err(RecvError::Closed) => break,
            }
        }
        prop_assert_eq!(lagged as usize, count - 8);
        prop_assert_eq!(seen, ((count - 8)..count).collect::<Vec<_>>());
    }
}
