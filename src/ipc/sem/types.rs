/*!
 * Semaphore Types
 * Common types, constants, and errors for semaphore sets
 */

use super::super::core::types::{IpcError, SemId, SemNum};
use crate::core::serde::{is_none, optional_system_time_micros, system_time_micros};
use crate::core::types::{Pid, Size};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use thiserror::Error;

// Semaphore limits - centralized in core::limits
pub use crate::core::limits::{SEMMNI, SEMMSL, SEMOPM, SEMVMX};

/// Semaphore operation result
pub type SemResult<T> = Result<T, SemError>;

/// Semaphore error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemError {
    #[error("Invalid amount {by} for {op}: {hint}")]
    InvalidAmount {
        op: &'static str,
        by: i16,
        hint: &'static str,
    },

    #[error("Counter index {index} out of range (limit {limit})")]
    IndexOutOfRange { index: SemNum, limit: usize },

    #[error("Too many operations in batch: {count} (max {max})")]
    TooManyOps { count: usize, max: usize },

    #[error("Counter {index} would overflow: value {value} + {delta} exceeds {max}")]
    Overflow {
        index: SemNum,
        value: u16,
        delta: i32,
        max: u16,
    },

    #[error("Would block on counter {0}")]
    WouldBlock(SemNum),

    #[error("Transaction timed out after {elapsed_ms}ms (timeout: {timeout_ms}ms)")]
    Timeout { elapsed_ms: u64, timeout_ms: u64 },

    #[error("Semaphore set {0} removed")]
    Removed(SemId),

    #[error("Semaphore set not found: {0}")]
    NotFound(String),

    #[error("Semaphore set already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Semaphore set limit exceeded: {0}/{1}")]
    LimitExceeded(usize, usize),

    #[error("Transaction interrupted: {0}")]
    Interrupted(String),
}

impl SemError {
    /// True for failures detected while building a batch
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            SemError::InvalidAmount { .. } | SemError::TooManyOps { .. }
        )
    }

    /// True for the range class: bad index or overflow
    pub fn is_range_error(&self) -> bool {
        matches!(
            self,
            SemError::IndexOutOfRange { .. } | SemError::Overflow { .. }
        )
    }
}

// Convert SemError to IpcError
impl From<SemError> for IpcError {
    fn from(err: SemError) -> Self {
        match err {
            SemError::InvalidAmount { .. } | SemError::TooManyOps { .. } => {
                IpcError::InvalidOperation(err.to_string())
            }
            SemError::InvalidArgument(msg) => IpcError::InvalidOperation(msg),
            SemError::IndexOutOfRange { .. } | SemError::Overflow { .. } => {
                IpcError::OutOfRange(err.to_string())
            }
            SemError::WouldBlock(_) => IpcError::WouldBlock(err.to_string()),
            SemError::Timeout {
                elapsed_ms,
                timeout_ms,
            } => IpcError::Timeout {
                elapsed_ms,
                timeout_ms: Some(timeout_ms),
            },
            SemError::Removed(id) => IpcError::Removed(format!("Semaphore set {}", id)),
            SemError::NotFound(name) => IpcError::NotFound(format!("Semaphore set {}", name)),
            SemError::AlreadyExists(name) => {
                IpcError::AlreadyExists(format!("Semaphore set {}", name))
            }
            SemError::PermissionDenied(msg) => IpcError::PermissionDenied(msg),
            SemError::LimitExceeded(current, max) => {
                IpcError::LimitExceeded(format!("Semaphore set limit exceeded: {}/{}", current, max))
            }
            SemError::Interrupted(msg) => IpcError::InvalidOperation(msg),
        }
    }
}

/// How `open` treats an existing or missing set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMode {
    /// Fail with NotFound if the set does not exist
    MustExist,
    /// Create the set if missing, otherwise open it
    CreateIfAbsent,
    /// Fail with AlreadyExists if the set exists
    CreateExclusive,
}

/// How long a transaction may block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Park until the batch applies or the set is removed
    #[default]
    Forever,
    /// Park at most this long; zero behaves like `NonBlocking`
    Timeout(Duration),
    /// Fail with WouldBlock instead of parking
    NonBlocking,
}

impl WaitMode {
    /// Get the timeout for this mode, if bounded
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Timeout(d) => Some(*d),
            Self::Forever | Self::NonBlocking => None,
        }
    }

    /// True if a blocked batch must fail instead of parking
    pub fn never_parks(&self) -> bool {
        match self {
            Self::NonBlocking => true,
            Self::Timeout(d) => d.is_zero(),
            Self::Forever => false,
        }
    }
}

impl From<Option<Duration>> for WaitMode {
    fn from(timeout: Option<Duration>) -> Self {
        match timeout {
            Some(d) => WaitMode::Timeout(d),
            None => WaitMode::Forever,
        }
    }
}

/// Meta information about a semaphore set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SemSetInfo {
    pub id: SemId,
    pub name: String,
    pub count: Size,
    pub creator_pid: Pid,
    /// Time of the last applied transaction
    #[serde(
        with = "optional_system_time_micros",
        skip_serializing_if = "is_none",
        default
    )]
    pub last_op: Option<SystemTime>,
    /// Creation time, or the last direct value change
    #[serde(with = "system_time_micros")]
    pub last_change: SystemTime,
}

/// Semaphore set statistics
///
/// Every field is always encoded so the bincode form stays decodable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SemStats {
    pub id: SemId,
    pub name: String,
    pub count: Size,
    pub values: Vec<u16>,
    pub waiters: Size,
    pub applied: u64,
    pub parked: u64,
    pub would_block: u64,
    pub timed_out: u64,
    pub removed: bool,
}

impl SemStats {
    /// Serialize using bincode for compact snapshots
    pub fn to_bincode_bytes(&self) -> Result<Vec<u8>, String> {
        crate::core::bincode::to_vec(self)
            .map_err(|e| format!("Failed to serialize sem stats with bincode: {}", e))
    }

    /// Deserialize from bincode format
    pub fn from_bincode_bytes(bytes: &[u8]) -> Result<Self, String> {
        crate::core::bincode::from_slice(bytes)
            .map_err(|e| format!("Failed to deserialize sem stats with bincode: {}", e))
    }
}
