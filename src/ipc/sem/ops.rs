/*!
 * Semaphore Operations
 * Batch construction for atomic transactions
 */

use super::super::core::types::SemNum;
use super::types::{SemError, SemResult, SEMMSL, SEMOPM, SEMVMX};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a single operation does to its counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "by")]
pub enum SemOpKind {
    /// Add `by` to the counter
    Increment(u16),
    /// Subtract `by`, blocking while the counter is smaller
    Decrement(u16),
    /// Block until the counter reads zero, without changing it
    WaitZero,
}

/// Per-operation options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemOpFlags {
    /// Fail with WouldBlock instead of parking when this operation is the one
    /// that cannot proceed
    pub dont_wait: bool,
}

impl SemOpFlags {
    pub const NONE: Self = Self { dont_wait: false };
    pub const NOWAIT: Self = Self { dont_wait: true };
}

/// A single operation against one counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemOp {
    pub num: SemNum,
    pub kind: SemOpKind,
    pub flags: SemOpFlags,
}

/// Ordered batch of operations applied atomically by `SemaphoreSet::run`
///
/// Builders validate eagerly: a rejected operation leaves the batch untouched.
/// Deserialized batches go through the same builders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSemOps")]
pub struct SemOps {
    ops: Vec<SemOp>,
}

/// Wire form of a batch before validation
#[derive(Deserialize)]
struct RawSemOps {
    ops: Vec<SemOp>,
}

impl TryFrom<RawSemOps> for SemOps {
    type Error = SemError;

    fn try_from(raw: RawSemOps) -> SemResult<Self> {
        let mut batch = SemOps::new();
        for op in raw.ops {
            match op.kind {
                SemOpKind::Increment(by) => batch.increment(op.num, amount(by)?, op.flags)?,
                SemOpKind::Decrement(by) => batch.decrement(op.num, amount(by)?, op.flags)?,
                SemOpKind::WaitZero => batch.wait_zero(op.num, op.flags)?,
            }
        }
        Ok(batch)
    }
}

fn amount(by: u16) -> SemResult<i16> {
    i16::try_from(by).map_err(|_| {
        SemError::InvalidArgument(format!("amount {} exceeds {}", by, SEMVMX))
    })
}

impl SemOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation that increases a counter by `by`
    pub fn increment(&mut self, num: SemNum, by: i16, flags: SemOpFlags) -> SemResult<()> {
        if by < 0 {
            return Err(SemError::InvalidAmount {
                op: "increment",
                by,
                hint: "must be >0, use decrement",
            });
        } else if by == 0 {
            return Err(SemError::InvalidAmount {
                op: "increment",
                by,
                hint: "must be >0, use wait_zero",
            });
        }
        self.push(num, SemOpKind::Increment(by as u16), flags)
    }

    /// Add an operation that decreases a counter by `by`
    pub fn decrement(&mut self, num: SemNum, by: i16, flags: SemOpFlags) -> SemResult<()> {
        if by <= 0 {
            return Err(SemError::InvalidAmount {
                op: "decrement",
                by,
                hint: "must be >0, use wait_zero or increment",
            });
        }
        self.push(num, SemOpKind::Decrement(by as u16), flags)
    }

    /// Add an operation that blocks until a counter is zero
    pub fn wait_zero(&mut self, num: SemNum, flags: SemOpFlags) -> SemResult<()> {
        self.push(num, SemOpKind::WaitZero, flags)
    }

    fn push(&mut self, num: SemNum, kind: SemOpKind, flags: SemOpFlags) -> SemResult<()> {
        if num as usize >= SEMMSL {
            return Err(SemError::IndexOutOfRange {
                index: num,
                limit: SEMMSL,
            });
        }
        if self.ops.len() >= SEMOPM {
            return Err(SemError::TooManyOps {
                count: self.ops.len() + 1,
                max: SEMOPM,
            });
        }
        self.ops.push(SemOp { num, kind, flags });
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[SemOp] {
        &self.ops
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SemOp> {
        self.ops.iter()
    }

    /// Remove every operation so the batch can be reused
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Frozen copy handed to the wait registry when a batch parks
    pub(crate) fn freeze(&self) -> Arc<[SemOp]> {
        Arc::from(self.ops.as_slice())
    }
}

impl<'a> IntoIterator for &'a SemOps {
    type Item = &'a SemOp;
    type IntoIter = std::slice::Iter<'a, SemOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}
