/*!
 * Counter Bank
 *
 * Fixed-size counter storage plus the feasibility check that decides whether
 * a batch can apply as a whole.
 *
 * # Evaluation
 *
 * A batch is judged against the counter values as they are *now*, not as
 * they would be after applying earlier operations of the same batch:
 *
 * - every decrement on a counter is summed, and the sum must be covered by
 *   the current value (increments in the same batch do not fund it)
 * - a wait-for-zero needs the current value to be exactly zero
 * - the net result of a counter must stay within `SEMVMX`
 *
 * Operations are walked in batch order and the first failing one decides the
 * outcome: a shortfall or nonzero counter blocks, an overflow is an error.
 * The bank is only ever touched under the owning set's lock, so nothing here
 * synchronizes.
 */

use super::super::core::types::SemNum;
use super::ops::{SemOp, SemOpKind};
use super::types::{SemError, SemResult, SEMVMX};
use crate::core::types::Pid;
use ahash::AHashMap;

/// Result of evaluating a batch against the current values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Feasibility {
    /// Every operation can apply together
    Ready,
    /// At least one operation cannot proceed yet
    Blocked {
        /// First blocking counter in batch order
        num: SemNum,
        /// Some blocking operation asked not to wait
        dont_wait: bool,
    },
}

/// Aggregated effect of a batch on one counter
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    inc: u32,
    dec: u32,
}

/// Counter values and per-counter metadata
#[derive(Debug)]
pub(crate) struct CounterBank {
    values: Vec<u16>,
    last_pid: Vec<Pid>,
    /// Parked batches with a decrement on this counter
    ncnt: Vec<u32>,
    /// Parked batches with a wait-for-zero on this counter
    zcnt: Vec<u32>,
}

impl CounterBank {
    pub fn new(count: usize) -> Self {
        Self {
            values: vec![0; count],
            last_pid: vec![0; count],
            ncnt: vec![0; count],
            zcnt: vec![0; count],
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn values(&self) -> &[u16] {
        &self.values
    }

    pub fn value(&self, num: SemNum) -> SemResult<u16> {
        self.check_index(num)?;
        Ok(self.values[num as usize])
    }

    pub fn last_pid(&self, num: SemNum) -> SemResult<Pid> {
        self.check_index(num)?;
        Ok(self.last_pid[num as usize])
    }

    pub fn ncnt(&self, num: SemNum) -> SemResult<u32> {
        self.check_index(num)?;
        Ok(self.ncnt[num as usize])
    }

    pub fn zcnt(&self, num: SemNum) -> SemResult<u32> {
        self.check_index(num)?;
        Ok(self.zcnt[num as usize])
    }

    #[inline]
    pub fn check_index(&self, num: SemNum) -> SemResult<()> {
        if num as usize >= self.values.len() {
            return Err(SemError::IndexOutOfRange {
                index: num,
                limit: self.values.len(),
            });
        }
        Ok(())
    }

    /// Reject a batch that references a counter past the end of the set
    ///
    /// Runs before feasibility so a malformed batch never starts.
    pub fn check_indices(&self, ops: &[SemOp]) -> SemResult<()> {
        ops.iter().try_for_each(|op| self.check_index(op.num))
    }

    fn tally(ops: &[SemOp]) -> AHashMap<SemNum, Tally> {
        let mut tallies: AHashMap<SemNum, Tally> = AHashMap::with_capacity(ops.len());
        for op in ops {
            let tally = tallies.entry(op.num).or_default();
            match op.kind {
                SemOpKind::Increment(by) => tally.inc += by as u32,
                SemOpKind::Decrement(by) => tally.dec += by as u32,
                SemOpKind::WaitZero => {}
            }
        }
        tallies
    }

    /// Decide whether `ops` can apply as one unit right now
    ///
    /// Indices must already be validated with `check_indices`.
    pub fn evaluate(&self, ops: &[SemOp]) -> SemResult<Feasibility> {
        let tallies = Self::tally(ops);
        let mut first_blocked: Option<SemNum> = None;
        let mut dont_wait = false;

        for op in ops {
            let value = self.values[op.num as usize];
            let tally = tallies[&op.num];

            let blocked = match op.kind {
                SemOpKind::Decrement(_) => (value as u32) < tally.dec,
                SemOpKind::WaitZero => value != 0,
                SemOpKind::Increment(_) => {
                    let net = value as i64 - tally.dec as i64 + tally.inc as i64;
                    if net > SEMVMX as i64 && (value as u32) >= tally.dec && first_blocked.is_none() {
                        return Err(SemError::Overflow {
                            index: op.num,
                            value,
                            delta: (tally.inc as i64 - tally.dec as i64) as i32,
                            max: SEMVMX,
                        });
                    }
                    false
                }
            };

            if blocked {
                first_blocked.get_or_insert(op.num);
                dont_wait |= op.flags.dont_wait;
            }
        }

        Ok(match first_blocked {
            Some(num) => Feasibility::Blocked { num, dont_wait },
            None => Feasibility::Ready,
        })
    }

    /// Apply a batch that `evaluate` reported as `Ready`
    ///
    /// Returns the counters whose value actually changed.
    pub fn apply(&mut self, ops: &[SemOp], pid: Pid) -> Vec<SemNum> {
        let tallies = Self::tally(ops);
        let mut changed = Vec::with_capacity(tallies.len());

        for op in ops {
            if !matches!(op.kind, SemOpKind::Increment(_) | SemOpKind::Decrement(_)) {
                continue;
            }
            let idx = op.num as usize;
            self.last_pid[idx] = pid;

            // Each counter gets its net change exactly once
            if let Some(tally) = tallies.get(&op.num) {
                if changed.contains(&op.num) {
                    continue;
                }
                let next = self.values[idx] as u32 + tally.inc - tally.dec;
                debug_assert!(next <= SEMVMX as u32);
                if next as u16 != self.values[idx] {
                    self.values[idx] = next as u16;
                    changed.push(op.num);
                }
            }
        }

        changed
    }

    /// Overwrite one counter, bypassing feasibility
    pub fn set_value(&mut self, num: SemNum, value: u16, pid: Pid) -> SemResult<bool> {
        self.check_index(num)?;
        check_value(value)?;
        let idx = num as usize;
        self.last_pid[idx] = pid;
        let changed = self.values[idx] != value;
        self.values[idx] = value;
        Ok(changed)
    }

    /// Overwrite every counter, returning the ones that changed
    pub fn set_all(&mut self, values: &[u16], pid: Pid) -> SemResult<Vec<SemNum>> {
        if values.len() != self.values.len() {
            return Err(SemError::InvalidArgument(format!(
                "wrong number of values: got {}, set has {}",
                values.len(),
                self.values.len()
            )));
        }
        values.iter().try_for_each(|v| check_value(*v))?;

        let mut changed = Vec::new();
        for (idx, value) in values.iter().enumerate() {
            self.last_pid[idx] = pid;
            if self.values[idx] != *value {
                self.values[idx] = *value;
                changed.push(idx as SemNum);
            }
        }
        Ok(changed)
    }

    /// Count a parked batch toward the waiter tallies
    ///
    /// A counter is counted once per kind, however many operations of that
    /// kind the batch has on it.
    pub fn register(&mut self, ops: &[SemOp]) {
        self.adjust(ops, true);
    }

    /// Undo `register` for a batch leaving the wait registry
    pub fn unregister(&mut self, ops: &[SemOp]) {
        self.adjust(ops, false);
    }

    fn adjust(&mut self, ops: &[SemOp], add: bool) {
        let mut seen_dec: Vec<SemNum> = Vec::new();
        let mut seen_zero: Vec<SemNum> = Vec::new();

        for op in ops {
            let (seen, counts) = match op.kind {
                SemOpKind::Decrement(_) => (&mut seen_dec, &mut self.ncnt),
                SemOpKind::WaitZero => (&mut seen_zero, &mut self.zcnt),
                SemOpKind::Increment(_) => continue,
            };
            if seen.contains(&op.num) {
                continue;
            }
            seen.push(op.num);

            let slot = &mut counts[op.num as usize];
            *slot = if add {
                slot.saturating_add(1)
            } else {
                slot.saturating_sub(1)
            };
        }
    }
}

fn check_value(value: u16) -> SemResult<()> {
    if value > SEMVMX {
        return Err(SemError::InvalidArgument(format!(
            "value {} exceeds maximum {}",
            value, SEMVMX
        )));
    }
    Ok(())
}
