/*!
 * Semaphore Set
 *
 * A counter bank with its wait registry behind one lock.
 *
 * # Concurrency
 *
 * Every feasibility check and mutation of a set runs under a single mutex,
 * never one per counter: batches span counters and must be judged as a
 * whole. A blocked caller parks on its own condvar, which releases the mutex
 * while it sleeps. Wakers apply the parked batch on the sleeper's behalf
 * before notifying it, so a woken caller only collects an outcome and never
 * re-runs evaluation itself.
 */

use super::super::core::types::{SemId, SemNum};
use super::bank::{CounterBank, Feasibility};
use super::ops::SemOps;
use super::types::{SemError, SemResult, SemSetInfo, SemStats, WaitMode};
use super::waiter::{timeout_error, WaitRegistry};
use crate::core::clock::{Clock, ClockListener};
use crate::core::types::{Pid, Size};
use crate::monitoring::{span_operation, OperationSpan};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Counters {
    applied: u64,
    parked: u64,
    would_block: u64,
    timed_out: u64,
}

#[derive(Debug)]
struct SetState {
    bank: CounterBank,
    waiters: WaitRegistry,
    removed: bool,
    last_op: Option<SystemTime>,
    last_change: SystemTime,
    counters: Counters,
}

impl SetState {
    /// Wake waiters after `changed` counters moved
    fn notify_changed(&mut self, changed: Vec<SemNum>) {
        if changed.is_empty() || self.waiters.len() == 0 {
            return;
        }
        let report = self.waiters.wake_changed(&mut self.bank, changed);
        if report.applied > 0 {
            self.counters.applied += report.applied;
            self.last_op = Some(SystemTime::now());
        }
        self.counters.would_block += report.would_block;
        if report.failed > 0 {
            debug!(failed = report.failed, "parked transactions failed on wake");
        }
    }
}

const ABANDONED: &str = "async caller dropped";

/// Links an async call to the waiter its blocking task parks
///
/// Both fields are only touched under the set lock.
#[derive(Debug, Default)]
struct AsyncTicket {
    abandoned: AtomicBool,
    /// Zero until the transaction parks
    waiter: AtomicU64,
}

impl AsyncTicket {
    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }
}

/// Cancels the parked transaction when an async call is dropped unfinished
struct AbandonGuard {
    set: Arc<SemaphoreSet>,
    ticket: Arc<AsyncTicket>,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.set.abandon(&self.ticket);
        }
    }
}

/// A fixed-size bank of counters with atomic multi-counter transactions
pub struct SemaphoreSet {
    id: SemId,
    name: String,
    creator_pid: Pid,
    count: Size,
    clock: Arc<dyn Clock>,
    state: Mutex<SetState>,
}

impl std::fmt::Debug for SemaphoreSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SemaphoreSet")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("creator_pid", &self.creator_pid)
            .field("values", &state.bank.values())
            .field("waiters", &state.waiters.len())
            .field("removed", &state.removed)
            .field("clock", &self.clock.name())
            .finish()
    }
}

impl SemaphoreSet {
    /// Create a set of `count` zeroed counters
    ///
    /// The set subscribes to `clock` so virtual clocks can expire its waiters.
    pub fn new(
        id: SemId,
        name: impl Into<String>,
        count: Size,
        creator_pid: Pid,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let set = Arc::new(Self {
            id,
            name: name.into(),
            creator_pid,
            count,
            clock: Arc::clone(&clock),
            state: Mutex::new(SetState {
                bank: CounterBank::new(count),
                waiters: WaitRegistry::new(count),
                removed: false,
                last_op: None,
                last_change: SystemTime::now(),
                counters: Counters::default(),
            }),
        });

        let listener: Weak<dyn ClockListener> = Arc::downgrade(&set) as Weak<dyn ClockListener>;
        clock.subscribe(listener);
        set
    }

    #[inline]
    pub fn id(&self) -> SemId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn count(&self) -> Size {
        self.count
    }

    #[inline]
    pub fn creator_pid(&self) -> Pid {
        self.creator_pid
    }

    /// Apply `ops` atomically on behalf of `pid`
    ///
    /// Either every operation applies or none does. When the batch cannot
    /// apply now, `mode` decides between failing with `WouldBlock` and
    /// parking until it applies, times out, or the set is removed.
    pub fn run(&self, pid: Pid, ops: &SemOps, mode: WaitMode) -> SemResult<()> {
        self.run_with(pid, ops, mode, None)
    }

    fn run_with(
        &self,
        pid: Pid,
        ops: &SemOps,
        mode: WaitMode,
        ticket: Option<&AsyncTicket>,
    ) -> SemResult<()> {
        let mut span = span_operation("sem_run");
        span.record_debug("set", self.id);
        span.record_debug("pid", pid);
        span.record_items_processed(ops.len());

        let result = self.transact(pid, ops, mode, ticket, &mut span);
        match &result {
            Ok(()) => span.record_result(true),
            Err(e) => span.record_error(&e.to_string()),
        }
        result
    }

    fn transact(
        &self,
        pid: Pid,
        ops: &SemOps,
        mode: WaitMode,
        ticket: Option<&AsyncTicket>,
        span: &mut OperationSpan,
    ) -> SemResult<()> {
        let started = self.clock.now();
        let mut state = self.state.lock();

        if state.removed {
            return Err(SemError::Removed(self.id));
        }
        // The async caller went away before the blocking task got here
        if ticket.is_some_and(AsyncTicket::is_abandoned) {
            return Err(SemError::Interrupted(ABANDONED.to_string()));
        }
        state.bank.check_indices(ops.as_slice())?;

        let blocked_on = match state.bank.evaluate(ops.as_slice())? {
            Feasibility::Ready => {
                let changed = state.bank.apply(ops.as_slice(), pid);
                state.counters.applied += 1;
                state.last_op = Some(SystemTime::now());
                state.notify_changed(changed);
                return Ok(());
            }
            Feasibility::Blocked { num, dont_wait } => {
                if dont_wait || mode.never_parks() {
                    state.counters.would_block += 1;
                    return Err(SemError::WouldBlock(num));
                }
                num
            }
        };

        let deadline = mode.duration().map(|timeout| started.saturating_add(timeout));
        let (waiter, condvar) = {
            let SetState { bank, waiters, .. } = &mut *state;
            waiters.park(bank, pid, ops.freeze(), started, deadline)
        };
        if let Some(ticket) = ticket {
            ticket.waiter.store(waiter, Ordering::Release);
        }
        state.counters.parked += 1;
        span.begin_wait();
        debug!(
            set = self.id,
            pid,
            waiter,
            counter = blocked_on,
            ?deadline,
            "transaction parked"
        );

        loop {
            if let Some(outcome) = state.waiters.take_outcome(waiter) {
                if let Err(SemError::Timeout { .. }) = outcome {
                    state.counters.timed_out += 1;
                }
                return outcome;
            }

            if let Some(deadline) = state.waiters.deadline(waiter) {
                let now = self.clock.now();
                if now >= deadline {
                    let SetState { bank, waiters, .. } = &mut *state;
                    waiters.resolve(bank, waiter, Err(timeout_error(started, deadline, now)));
                    continue;
                }
                match self.clock.park_deadline(deadline) {
                    Some(at) => {
                        condvar.wait_until(&mut state, at);
                    }
                    None => condvar.wait(&mut state),
                }
            } else {
                condvar.wait(&mut state);
            }
        }
    }

    /// Apply `ops` from async code
    ///
    /// The wait happens on tokio's blocking pool so parked transactions never
    /// stall the runtime's worker threads. Dropping the returned future before
    /// it completes cancels the transaction if it is still parked.
    pub async fn run_async(self: Arc<Self>, pid: Pid, ops: SemOps, mode: WaitMode) -> SemResult<()> {
        let ticket = Arc::new(AsyncTicket::default());
        let mut guard = AbandonGuard {
            set: Arc::clone(&self),
            ticket: Arc::clone(&ticket),
            armed: true,
        };

        let joined =
            tokio::task::spawn_blocking(move || self.run_with(pid, &ops, mode, Some(&*ticket))).await;
        guard.armed = false;
        joined.map_err(|e| SemError::Interrupted(e.to_string()))?
    }

    /// Cancel the transaction behind an abandoned async call
    fn abandon(&self, ticket: &AsyncTicket) {
        let mut state = self.state.lock();
        ticket.abandoned.store(true, Ordering::Release);

        let waiter = ticket.waiter.load(Ordering::Acquire);
        if waiter == 0 {
            return;
        }
        let SetState { bank, waiters, .. } = &mut *state;
        if waiters.cancel(bank, waiter, ABANDONED) {
            debug!(set = self.id, waiter, "cancelled transaction of dropped async caller");
        }
    }

    /// Destroy the set, failing every parked transaction with `Removed`
    ///
    /// Returns the number of waiters woken. Later calls fail with `Removed`.
    pub fn remove(&self) -> usize {
        let mut state = self.state.lock();
        if state.removed {
            return 0;
        }
        state.removed = true;
        let SetState { bank, waiters, .. } = &mut *state;
        let woken = waiters.remove_all(bank, self.id);
        info!(set = self.id, name = %self.name, woken, "semaphore set removed");
        woken
    }

    /// Fail every transaction `pid` has parked on this set with `Interrupted`
    pub fn cancel(&self, pid: Pid) -> usize {
        let mut state = self.state.lock();
        let SetState { bank, waiters, .. } = &mut *state;
        let cancelled = waiters.cancel_pid(bank, pid);
        if cancelled > 0 {
            debug!(set = self.id, pid, cancelled, "cancelled parked transactions");
        }
        cancelled
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    /// Current value of one counter
    pub fn value(&self, num: SemNum) -> SemResult<u16> {
        self.read(|state| state.bank.value(num))
    }

    /// Current values of every counter
    pub fn values(&self) -> SemResult<Vec<u16>> {
        self.read(|state| Ok(state.bank.values().to_vec()))
    }

    /// Last process whose transaction or direct write mutated the counter
    ///
    /// Zero before any mutation.
    pub fn last_pid(&self, num: SemNum) -> SemResult<Pid> {
        self.read(|state| state.bank.last_pid(num))
    }

    /// Parked transactions with a decrement on this counter
    pub fn ncnt(&self, num: SemNum) -> SemResult<u32> {
        self.read(|state| state.bank.ncnt(num))
    }

    /// Parked transactions with a wait-for-zero on this counter
    pub fn zcnt(&self, num: SemNum) -> SemResult<u32> {
        self.read(|state| state.bank.zcnt(num))
    }

    /// Total parked transactions
    pub fn waiter_count(&self) -> Size {
        self.state.lock().waiters.len()
    }

    /// Overwrite one counter and re-evaluate parked transactions
    pub fn set_value(&self, num: SemNum, value: u16, pid: Pid) -> SemResult<()> {
        let mut state = self.state.lock();
        if state.removed {
            return Err(SemError::Removed(self.id));
        }
        let changed = state.bank.set_value(num, value, pid)?;
        state.last_change = SystemTime::now();
        if changed {
            state.notify_changed(vec![num]);
        }
        Ok(())
    }

    /// Overwrite every counter and re-evaluate parked transactions
    pub fn set_all(&self, values: &[u16], pid: Pid) -> SemResult<()> {
        let mut state = self.state.lock();
        if state.removed {
            return Err(SemError::Removed(self.id));
        }
        let changed = state.bank.set_all(values, pid)?;
        state.last_change = SystemTime::now();
        state.notify_changed(changed);
        Ok(())
    }

    /// Meta information about the set
    pub fn stat(&self) -> SemResult<SemSetInfo> {
        self.read(|state| {
            Ok(SemSetInfo {
                id: self.id,
                name: self.name.clone(),
                count: self.count,
                creator_pid: self.creator_pid,
                last_op: state.last_op,
                last_change: state.last_change,
            })
        })
    }

    /// Snapshot of values and transaction counters
    ///
    /// Works on removed sets too, so final numbers stay observable.
    pub fn stats(&self) -> SemStats {
        let state = self.state.lock();
        SemStats {
            id: self.id,
            name: self.name.clone(),
            count: self.count,
            values: state.bank.values().to_vec(),
            waiters: state.waiters.len(),
            applied: state.counters.applied,
            parked: state.counters.parked,
            would_block: state.counters.would_block,
            timed_out: state.counters.timed_out,
            removed: state.removed,
        }
    }

    fn read<T>(&self, f: impl FnOnce(&SetState) -> SemResult<T>) -> SemResult<T> {
        let state = self.state.lock();
        if state.removed {
            return Err(SemError::Removed(self.id));
        }
        f(&state)
    }
}

impl ClockListener for SemaphoreSet {
    fn on_tick(&self, now: Duration) {
        let mut state = self.state.lock();
        if state.removed || state.waiters.len() == 0 {
            return;
        }
        let SetState { bank, waiters, .. } = &mut *state;
        let expired = waiters.expire(bank, now);
        if expired > 0 {
            debug!(set = self.id, expired, "expired parked transactions on clock tick");
        }
    }
}
