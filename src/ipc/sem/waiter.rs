/*!
 * Wait Registry
 *
 * Bookkeeping for batches parked on a set.
 *
 * Each parked batch gets a waiter entry holding its frozen operations, its
 * deadline and a condvar of its own. The entry id is queued on every counter
 * the batch references; ids are handed out in arrival order so each
 * per-counter queue is FIFO.
 *
 * Resolving a waiter (applied, timed out, removed, failed) always goes
 * through `resolve`, which takes it out of every queue, drops its tally from
 * the bank and stores the outcome for the parked thread to pick up. A waiter
 * is therefore never registered after its call has returned.
 */

use super::super::core::types::{SemId, SemNum};
use super::bank::{CounterBank, Feasibility};
use super::ops::SemOp;
use super::types::{SemError, SemResult};
use crate::core::types::Pid;
use ahash::{AHashMap, AHashSet};
use parking_lot::Condvar;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Arrival-ordered waiter identifier
pub(crate) type WaiterId = u64;

/// A parked batch
#[derive(Debug)]
pub(crate) struct Waiter {
    pub pid: Pid,
    pub ops: Arc<[SemOp]>,
    /// When the batch was submitted, on the set's clock
    pub started: Duration,
    /// Absolute deadline on the set's clock, `None` waits forever
    pub deadline: Option<Duration>,
    pub condvar: Arc<Condvar>,
    /// Distinct counters the batch references
    indices: Vec<SemNum>,
}

/// Counts of waiters resolved by one wake pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WakeReport {
    pub applied: u64,
    /// Resolved with `WouldBlock` because a no-wait operation became the blocker
    pub would_block: u64,
    /// Resolved with an error such as `Overflow`
    pub failed: u64,
}

#[derive(Debug)]
pub(crate) struct WaitRegistry {
    next_id: WaiterId,
    waiters: AHashMap<WaiterId, Waiter>,
    /// Per-counter FIFO of parked waiter ids
    queues: Vec<VecDeque<WaiterId>>,
    /// Outcomes not yet collected by their parked thread
    outcomes: AHashMap<WaiterId, SemResult<()>>,
}

impl WaitRegistry {
    pub fn new(count: usize) -> Self {
        Self {
            next_id: 1,
            waiters: AHashMap::new(),
            queues: vec![VecDeque::new(); count],
            outcomes: AHashMap::new(),
        }
    }

    /// Number of batches currently parked
    #[inline]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Register a batch as parked on every counter it references
    pub fn park(
        &mut self,
        bank: &mut CounterBank,
        pid: Pid,
        ops: Arc<[SemOp]>,
        started: Duration,
        deadline: Option<Duration>,
    ) -> (WaiterId, Arc<Condvar>) {
        let id = self.next_id;
        self.next_id += 1;

        let mut indices: Vec<SemNum> = Vec::with_capacity(ops.len());
        for op in ops.iter() {
            if !indices.contains(&op.num) {
                indices.push(op.num);
                self.queues[op.num as usize].push_back(id);
            }
        }
        bank.register(&ops);

        let condvar = Arc::new(Condvar::new());
        self.waiters.insert(
            id,
            Waiter {
                pid,
                ops,
                started,
                deadline,
                condvar: Arc::clone(&condvar),
                indices,
            },
        );

        (id, condvar)
    }

    /// Collect the outcome of a resolved waiter
    #[inline]
    pub fn take_outcome(&mut self, id: WaiterId) -> Option<SemResult<()>> {
        self.outcomes.remove(&id)
    }

    /// Deadline of a still-parked waiter
    pub fn deadline(&self, id: WaiterId) -> Option<Duration> {
        self.waiters.get(&id).and_then(|w| w.deadline)
    }

    /// Unregister a waiter, store its outcome and wake its thread
    pub fn resolve(&mut self, bank: &mut CounterBank, id: WaiterId, outcome: SemResult<()>) {
        let Some(waiter) = self.waiters.remove(&id) else {
            return;
        };

        for num in &waiter.indices {
            let queue = &mut self.queues[*num as usize];
            if let Some(pos) = queue.iter().position(|w| *w == id) {
                queue.remove(pos);
            }
        }
        bank.unregister(&waiter.ops);

        self.outcomes.insert(id, outcome);
        waiter.condvar.notify_one();
    }

    /// Re-evaluate waiters parked on `changed` counters
    ///
    /// Every waiter queued on a changed counter is tried in global arrival
    /// order, so an older batch wins over a younger one whenever both could
    /// apply. Applying a waiter changes counters of its own, which restarts
    /// the pass with those counters added.
    pub fn wake_changed(&mut self, bank: &mut CounterBank, changed: Vec<SemNum>) -> WakeReport {
        let mut report = WakeReport::default();
        let mut dirty: AHashSet<SemNum> = changed.into_iter().collect();

        'pass: loop {
            let mut candidates: Vec<WaiterId> = dirty
                .iter()
                .flat_map(|num| self.queues[*num as usize].iter().copied())
                .collect();
            candidates.sort_unstable();
            candidates.dedup();

            for id in candidates {
                let Some(waiter) = self.waiters.get(&id) else {
                    continue;
                };
                let ops = Arc::clone(&waiter.ops);
                let pid = waiter.pid;

                match bank.evaluate(&ops) {
                    Ok(Feasibility::Ready) => {
                        let touched = bank.apply(&ops, pid);
                        self.resolve(bank, id, Ok(()));
                        report.applied += 1;
                        debug!(waiter = id, pid, "parked transaction applied");

                        // Earlier waiters may have become feasible
                        if !touched.is_empty() {
                            dirty.extend(touched);
                            continue 'pass;
                        }
                    }
                    // Still blocked, but the operation now blocking it refuses to wait
                    Ok(Feasibility::Blocked {
                        num: blocked,
                        dont_wait: true,
                    }) => {
                        self.resolve(bank, id, Err(SemError::WouldBlock(blocked)));
                        report.would_block += 1;
                    }
                    Ok(Feasibility::Blocked { .. }) => {}
                    Err(e) => {
                        debug!(waiter = id, pid, error = %e, "parked transaction failed on re-evaluation");
                        self.resolve(bank, id, Err(e));
                        report.failed += 1;
                    }
                }
            }

            return report;
        }
    }

    /// Resolve a still-parked waiter with `Interrupted`
    ///
    /// Returns false when the waiter already has an outcome.
    pub fn cancel(&mut self, bank: &mut CounterBank, id: WaiterId, reason: &str) -> bool {
        if !self.waiters.contains_key(&id) {
            return false;
        }
        self.resolve(bank, id, Err(SemError::Interrupted(reason.to_string())));
        true
    }

    /// Time out every waiter whose deadline is at or before `now`
    pub fn expire(&mut self, bank: &mut CounterBank, now: Duration) -> u64 {
        let due: Vec<(WaiterId, Duration, Duration)> = self
            .waiters
            .iter()
            .filter_map(|(id, w)| match w.deadline {
                Some(deadline) if deadline <= now => Some((*id, w.started, deadline)),
                _ => None,
            })
            .collect();

        let count = due.len() as u64;
        for (id, started, deadline) in due {
            self.resolve(bank, id, Err(timeout_error(started, deadline, now)));
            debug!(waiter = id, "parked transaction timed out");
        }
        count
    }

    /// Cancel every waiter parked by `pid`
    pub fn cancel_pid(&mut self, bank: &mut CounterBank, pid: Pid) -> usize {
        let mut ids: Vec<WaiterId> = self
            .waiters
            .iter()
            .filter(|(_, w)| w.pid == pid)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        let count = ids.len();
        for id in ids {
            self.resolve(
                bank,
                id,
                Err(SemError::Interrupted(format!("process {} cancelled", pid))),
            );
        }
        count
    }

    /// Fail every waiter because the set is gone
    pub fn remove_all(&mut self, bank: &mut CounterBank, set_id: SemId) -> usize {
        let mut ids: Vec<WaiterId> = self.waiters.keys().copied().collect();
        ids.sort_unstable();
        let count = ids.len();
        for id in ids {
            self.resolve(bank, id, Err(SemError::Removed(set_id)));
        }
        count
    }
}

/// Timeout error for a waiter started at `started` with absolute `deadline`
pub(crate) fn timeout_error(started: Duration, deadline: Duration, now: Duration) -> SemError {
    SemError::Timeout {
        elapsed_ms: now.saturating_sub(started).as_millis() as u64,
        timeout_ms: deadline.saturating_sub(started).as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::sem::ops::{SemOpFlags, SemOps};
    use crate::ipc::sem::types::SEMVMX;

    fn decrement(num: SemNum, by: i16) -> Arc<[SemOp]> {
        let mut ops = SemOps::new();
        ops.decrement(num, by, SemOpFlags::NONE).unwrap();
        ops.freeze()
    }

    #[test]
    fn test_fifo_wake_on_single_counter() {
        let mut bank = CounterBank::new(1);
        let mut registry = WaitRegistry::new(1);

        let (first, _) = registry.park(&mut bank, 1, decrement(0, 1), Duration::ZERO, None);
        let (second, _) = registry.park(&mut bank, 2, decrement(0, 1), Duration::ZERO, None);
        assert_eq!(bank.ncnt(0).unwrap(), 2);

        let changed = vec![0];
        bank.set_value(0, 1, 99).unwrap();
        let report = registry.wake_changed(&mut bank, changed);

        assert_eq!(report.applied, 1);
        assert_eq!(registry.take_outcome(first), Some(Ok(())));
        assert_eq!(registry.take_outcome(second), None);
        assert_eq!(bank.value(0).unwrap(), 0);
        assert_eq!(bank.last_pid(0).unwrap(), 1);
        assert_eq!(bank.ncnt(0).unwrap(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_later_waiter_applies_when_earlier_still_blocked() {
        let mut bank = CounterBank::new(1);
        let mut registry = WaitRegistry::new(1);

        let (big, _) = registry.park(&mut bank, 1, decrement(0, 5), Duration::ZERO, None);
        let (small, _) = registry.park(&mut bank, 2, decrement(0, 1), Duration::ZERO, None);

        bank.set_value(0, 2, 99).unwrap();
        registry.wake_changed(&mut bank, vec![0]);

        assert_eq!(registry.take_outcome(big), None);
        assert_eq!(registry.take_outcome(small), Some(Ok(())));
        assert_eq!(bank.value(0).unwrap(), 1);
    }

    #[test]
    fn test_wake_cascades_across_counters() {
        let mut bank = CounterBank::new(2);
        let mut registry = WaitRegistry::new(2);

        // Waiter A moves a token from counter 0 to counter 1
        let mut move_ops = SemOps::new();
        move_ops.decrement(0, 1, SemOpFlags::NONE).unwrap();
        move_ops.increment(1, 1, SemOpFlags::NONE).unwrap();
        let (a, _) = registry.park(&mut bank, 1, move_ops.freeze(), Duration::ZERO, None);
        // Waiter B consumes from counter 1
        let (b, _) = registry.park(&mut bank, 2, decrement(1, 1), Duration::ZERO, None);

        bank.set_value(0, 1, 99).unwrap();
        let report = registry.wake_changed(&mut bank, vec![0]);

        assert_eq!(report.applied, 2);
        assert_eq!(registry.take_outcome(a), Some(Ok(())));
        assert_eq!(registry.take_outcome(b), Some(Ok(())));
        assert_eq!(bank.values(), &[0, 0]);
    }

    #[test]
    fn test_wake_order_is_global_across_counters() {
        let mut bank = CounterBank::new(3);
        let mut registry = WaitRegistry::new(3);
        bank.set_value(0, 1, 99).unwrap();

        // Both need the single unit on counter 0
        let mut older_ops = SemOps::new();
        older_ops.decrement(0, 1, SemOpFlags::NONE).unwrap();
        older_ops.decrement(2, 1, SemOpFlags::NONE).unwrap();
        let (older, _) = registry.park(&mut bank, 1, older_ops.freeze(), Duration::ZERO, None);

        let mut younger_ops = SemOps::new();
        younger_ops.decrement(0, 1, SemOpFlags::NONE).unwrap();
        younger_ops.decrement(1, 1, SemOpFlags::NONE).unwrap();
        let (younger, _) = registry.park(&mut bank, 2, younger_ops.freeze(), Duration::ZERO, None);

        // One batch raises counter 1 before counter 2
        let mut raise = SemOps::new();
        raise.increment(1, 1, SemOpFlags::NONE).unwrap();
        raise.increment(2, 1, SemOpFlags::NONE).unwrap();
        let changed = bank.apply(raise.as_slice(), 3);
        let report = registry.wake_changed(&mut bank, changed);

        assert_eq!(report.applied, 1);
        assert_eq!(registry.take_outcome(older), Some(Ok(())));
        assert_eq!(registry.take_outcome(younger), None);
        assert_eq!(bank.values(), &[0, 1, 0]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_no_wait_operation_becoming_the_blocker() {
        let mut bank = CounterBank::new(2);
        let mut registry = WaitRegistry::new(2);
        bank.set_value(1, 1, 99).unwrap();

        // Blocks on counter 0; the no-wait decrement on counter 1 is satisfiable for now
        let mut ops = SemOps::new();
        ops.decrement(0, 1, SemOpFlags::NONE).unwrap();
        ops.decrement(1, 1, SemOpFlags::NOWAIT).unwrap();
        let (id, _) = registry.park(&mut bank, 1, ops.freeze(), Duration::ZERO, None);

        bank.set_value(1, 0, 99).unwrap();
        let report = registry.wake_changed(&mut bank, vec![1]);

        assert_eq!(report.would_block, 1);
        assert_eq!(registry.take_outcome(id), Some(Err(SemError::WouldBlock(0))));
        assert_eq!(registry.len(), 0);
        assert_eq!(bank.ncnt(0).unwrap(), 0);
        assert_eq!(bank.ncnt(1).unwrap(), 0);
    }

    #[test]
    fn test_parked_batch_overflows_once_unblocked() {
        let mut bank = CounterBank::new(2);
        let mut registry = WaitRegistry::new(2);
        bank.set_value(0, 1, 99).unwrap();
        bank.set_value(1, SEMVMX - 5, 99).unwrap();

        let mut ops = SemOps::new();
        ops.wait_zero(0, SemOpFlags::NONE).unwrap();
        ops.increment(1, 10, SemOpFlags::NONE).unwrap();
        let (id, _) = registry.park(&mut bank, 1, ops.freeze(), Duration::ZERO, None);

        bank.set_value(0, 0, 99).unwrap();
        let report = registry.wake_changed(&mut bank, vec![0]);

        assert_eq!(report.failed, 1);
        assert!(matches!(
            registry.take_outcome(id),
            Some(Err(SemError::Overflow { index: 1, .. }))
        ));
        assert_eq!(bank.value(1).unwrap(), SEMVMX - 5);
        assert_eq!(bank.zcnt(0).unwrap(), 0);
    }

    #[test]
    fn test_expire_only_due_waiters() {
        let mut bank = CounterBank::new(1);
        let mut registry = WaitRegistry::new(1);

        let (short, _) = registry.park(
            &mut bank,
            1,
            decrement(0, 1),
            Duration::ZERO,
            Some(Duration::from_millis(5)),
        );
        let (long, _) = registry.park(
            &mut bank,
            2,
            decrement(0, 1),
            Duration::ZERO,
            Some(Duration::from_millis(50)),
        );

        assert_eq!(registry.expire(&mut bank, Duration::from_millis(5)), 1);
        assert_eq!(
            registry.take_outcome(short),
            Some(Err(SemError::Timeout {
                elapsed_ms: 5,
                timeout_ms: 5
            }))
        );
        assert_eq!(registry.take_outcome(long), None);
        assert_eq!(bank.ncnt(0).unwrap(), 1);
    }

    #[test]
    fn test_remove_all() {
        let mut bank = CounterBank::new(2);
        let mut registry = WaitRegistry::new(2);

        let (a, _) = registry.park(&mut bank, 1, decrement(0, 1), Duration::ZERO, None);
        let (b, _) = registry.park(&mut bank, 2, decrement(1, 1), Duration::ZERO, None);

        assert_eq!(registry.remove_all(&mut bank, 7), 2);
        assert_eq!(registry.take_outcome(a), Some(Err(SemError::Removed(7))));
        assert_eq!(registry.take_outcome(b), Some(Err(SemError::Removed(7))));
        assert_eq!(registry.len(), 0);
        assert_eq!(bank.ncnt(0).unwrap(), 0);
        assert_eq!(bank.ncnt(1).unwrap(), 0);
    }

    #[test]
    fn test_cancel_single_waiter() {
        let mut bank = CounterBank::new(1);
        let mut registry = WaitRegistry::new(1);

        let (id, _) = registry.park(&mut bank, 4, decrement(0, 1), Duration::ZERO, None);
        assert!(registry.cancel(&mut bank, id, "caller dropped"));
        assert!(!registry.cancel(&mut bank, id, "caller dropped"));

        assert_eq!(
            registry.take_outcome(id),
            Some(Err(SemError::Interrupted("caller dropped".to_string())))
        );
        assert_eq!(bank.ncnt(0).unwrap(), 0);
    }

    #[test]
    fn test_cancel_pid_leaves_others_parked() {
        let mut bank = CounterBank::new(1);
        let mut registry = WaitRegistry::new(1);

        let (mine, _) = registry.park(&mut bank, 4, decrement(0, 1), Duration::ZERO, None);
        let (other, _) = registry.park(&mut bank, 5, decrement(0, 1), Duration::ZERO, None);

        assert_eq!(registry.cancel_pid(&mut bank, 4), 1);
        assert!(matches!(
            registry.take_outcome(mine),
            Some(Err(SemError::Interrupted(_)))
        ));
        assert_eq!(registry.take_outcome(other), None);
        assert_eq!(bank.ncnt(0).unwrap(), 1);
    }
}
