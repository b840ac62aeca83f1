/*!
 * Semaphore Property Tests
 * Random batches never drive a counter negative or apply partially
 */

use proptest::prelude::*;
use semset::{SemError, SemOpFlags, SemOps, SemaphoreSet, SystemClock, WaitMode, SEMVMX};

const COUNTERS: u16 = 3;

#[derive(Debug, Clone)]
enum Op {
    Inc(u16, i16),
    Dec(u16, i16),
    Zero(u16),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..COUNTERS, 1i16..5).prop_map(|(n, by)| Op::Inc(n, by)),
        (0..COUNTERS, 1i16..5).prop_map(|(n, by)| Op::Dec(n, by)),
        (0..COUNTERS).prop_map(Op::Zero),
    ]
}

fn build(batch: &[Op]) -> SemOps {
    let mut ops = SemOps::new();
    for op in batch {
        match *op {
            Op::Inc(n, by) => ops.increment(n, by, SemOpFlags::NONE),
            Op::Dec(n, by) => ops.decrement(n, by, SemOpFlags::NONE),
            Op::Zero(n) => ops.wait_zero(n, SemOpFlags::NONE),
        }
        .unwrap();
    }
    ops
}

/// Expected values if the batch applies as a whole, `None` if it cannot
fn model(values: &[u16], batch: &[Op]) -> Option<Vec<u16>> {
    let mut next: Vec<i64> = values.iter().map(|v| *v as i64).collect();
    let mut dec = vec![0i64; values.len()];

    for op in batch {
        match *op {
            Op::Inc(n, by) => next[n as usize] += by as i64,
            Op::Dec(n, by) => {
                next[n as usize] -= by as i64;
                dec[n as usize] += by as i64;
            }
            Op::Zero(n) => {
                if values[n as usize] != 0 {
                    return None;
                }
            }
        }
    }
    for (i, d) in dec.iter().enumerate() {
        if (values[i] as i64) < *d {
            return None;
        }
    }
    Some(next.into_iter().map(|v| v as u16).collect())
}

proptest! {
    #[test]
    fn prop_batches_apply_whole_or_not_at_all(
        batches in prop::collection::vec(prop::collection::vec(op_strategy(), 1..6), 1..30)
    ) {
        let set = SemaphoreSet::new(1, "prop", COUNTERS as usize, 1, SystemClock::shared());

        for batch in batches {
            let before = set.values().unwrap();
            let expected = model(&before, &batch);
            let result = set.run(1, &build(&batch), WaitMode::NonBlocking);
            let after = set.values().unwrap();

            match (result, expected) {
                (Ok(()), Some(expected)) => prop_assert_eq!(after, expected),
                (Err(SemError::WouldBlock(_)), None) => prop_assert_eq!(after, before),
                (other, expected) => {
                    prop_assert!(false, "result {:?} but model expected {:?}", other, expected)
                }
            }
            prop_assert!(set.values().unwrap().iter().all(|v| *v <= SEMVMX));
            prop_assert_eq!(set.waiter_count(), 0);
        }
    }
}
