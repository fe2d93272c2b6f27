use hsa_cts::soft::{SoftConfig, SoftRuntime};
use hsa_cts::wait::{Condition, LoadOrder, MemoryOrder, SignalOp, WaitState};
use hsa_cts::{SharedRuntime, Signal};
use proptest::prelude::*;

fn runtime() -> SharedRuntime {
    let rt = SoftRuntime::shared(SoftConfig::default());
    rt.init().unwrap();
    rt
}

fn op() -> impl Strategy<Value = SignalOp> {
    prop::sample::select(SignalOp::ALL.to_vec())
}

fn order() -> impl Strategy<Value = MemoryOrder> {
    prop::sample::select(MemoryOrder::ALL.to_vec())
}

proptest! {
    #[test]
    fn created_signal_holds_its_initial_value(initial in any::<i64>()) {
        let rt = runtime();
        let signal = Signal::create(&rt, initial).unwrap();
        prop_assert_eq!(signal.load().unwrap(), initial);
        prop_assert_eq!(signal.load_relaxed().unwrap(), initial);
    }

    #[test]
    fn rmw_sequences_compose_like_wrapping_arithmetic(
        initial in any::<i64>(),
        steps in prop::collection::vec((op(), any::<i64>(), order()), 1..24),
    ) {
        let rt = runtime();
        let signal = Signal::create(&rt, initial).unwrap();
        let mut expected = initial;
        for (op, operand, order) in steps {
            let previous = signal.rmw(op, operand, order).unwrap();
            prop_assert_eq!(previous, expected, "{:?} saw a stale value", op);
            expected = op.apply(expected, operand);
        }
        prop_assert_eq!(signal.load().unwrap(), expected);
    }

    #[test]
    fn cas_swaps_only_on_match(initial in any::<i64>(), expected in any::<i64>(), value in any::<i64>()) {
        let rt = runtime();
        let signal = Signal::create(&rt, initial).unwrap();
        prop_assert_eq!(signal.compare_and_swap(expected, value).unwrap(), initial);
        let now = if initial == expected { value } else { initial };
        prop_assert_eq!(signal.load().unwrap(), now);
    }

    #[test]
    fn satisfied_conditions_return_the_current_value(value in any::<i64>(), compare in any::<i64>()) {
        let rt = runtime();
        let signal = Signal::create(&rt, value).unwrap();
        for condition in Condition::ALL {
            if condition.holds(value, compare) {
                // Zero timeout: a satisfied condition never needs to block.
                let observed = signal
                    .wait(condition, compare, 0, WaitState::Blocked, LoadOrder::Acquire)
                    .unwrap();
                prop_assert_eq!(observed, value);
            }
        }
    }
}
