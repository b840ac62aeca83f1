/*!
 * IPC Traits
 * Inter-process communication abstractions
 */

use super::types::*;
use crate::core::types::{Pid, Size};
use crate::ipc::sem::{CreateMode, SemOps, SemSetInfo, SemStats, WaitMode};

/// Semaphore set interface
pub trait SemaphoreChannel: Send + Sync {
    /// Open or create a named set
    fn open(&self, name: &str, nsems: Size, mode: CreateMode, pid: Pid) -> IpcResult<SemId>;

    /// Apply a batch atomically, blocking according to `mode`
    fn apply(&self, id: SemId, pid: Pid, ops: &SemOps, mode: WaitMode) -> IpcResult<()>;

    /// Read one counter
    fn get_value(&self, id: SemId, num: SemNum) -> IpcResult<u16>;

    /// Overwrite one counter
    fn set_value(&self, id: SemId, num: SemNum, value: u16, pid: Pid) -> IpcResult<()>;

    /// Destroy a set
    fn destroy(&self, id: SemId, pid: Pid) -> IpcResult<()>;

    /// Get set meta information
    fn stat(&self, id: SemId) -> IpcResult<SemSetInfo>;

    /// Get set statistics
    fn stats(&self, id: SemId) -> IpcResult<SemStats>;
}

/// IPC cleanup interface
pub trait IpcCleanup: Send + Sync {
    /// Clean up all IPC resources for a process
    fn cleanup_process(&self, pid: Pid) -> Size;
}
