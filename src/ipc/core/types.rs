/*!
 * IPC Types
 * Common types for inter-process synchronization
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// IPC operation result
///
/// # Must Use
/// IPC operations can fail and must be handled to prevent lost wakeups
pub type IpcResult<T> = Result<T, IpcError>;

/// Unified IPC error type with miette diagnostics
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum IpcError {
    /// Resource not found
    #[error("IPC resource not found: {0}")]
    #[diagnostic(
        code(ipc::not_found),
        help("The requested semaphore set does not exist. Open it with a create mode or verify the set ID.")
    )]
    NotFound(String),

    /// Resource already exists
    #[error("IPC resource already exists: {0}")]
    #[diagnostic(
        code(ipc::already_exists),
        help("Exclusive creation was requested for a name that is already in use. Open without exclusivity to share it.")
    )]
    AlreadyExists(String),

    /// Permission denied
    #[error("IPC permission denied: {0}")]
    #[diagnostic(
        code(ipc::permission_denied),
        help("Only the creating process (or the privileged process) may perform this operation.")
    )]
    PermissionDenied(String),

    /// Resource limit exceeded
    #[error("IPC resource limit exceeded: {0}")]
    #[diagnostic(
        code(ipc::limit_exceeded),
        help("IPC resource limit reached. Remove unused sets or raise the configured limits.")
    )]
    LimitExceeded(String),

    /// Operation would block
    #[error("IPC operation would block: {0}")]
    #[diagnostic(
        code(ipc::would_block),
        help("The transaction cannot complete without blocking. Retry later or submit it with a blocking wait mode.")
    )]
    WouldBlock(String),

    /// Index or value outside the representable range
    #[error("IPC value out of range: {0}")]
    #[diagnostic(
        code(ipc::out_of_range),
        help("A counter index is beyond the set size, or an increment would exceed the maximum counter value.")
    )]
    OutOfRange(String),

    /// Invalid operation or argument
    #[error("Invalid IPC operation: {0}")]
    #[diagnostic(
        code(ipc::invalid_operation),
        help("The requested operation is invalid for this IPC resource or in its current state.")
    )]
    InvalidOperation(String),

    /// Resource removed while in use
    #[error("IPC resource removed: {0}")]
    #[diagnostic(
        code(ipc::removed),
        help("The semaphore set was destroyed while the operation was pending. Reopen or recreate it.")
    )]
    Removed(String),

    /// Operation timed out
    #[error("IPC operation timed out after {elapsed_ms}ms (timeout: {}ms)", timeout_ms.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string()))]
    #[diagnostic(
        code(ipc::timeout),
        help("The transaction did not become feasible within the specified timeout. Try increasing the timeout or check for deadlocks.")
    )]
    Timeout {
        elapsed_ms: u64,
        timeout_ms: Option<u64>,
    },
}

/// Semaphore set identifier
pub type SemId = u32;

/// Index of a counter inside a set
pub type SemNum = u16;
