/*!
 * Semaphore Set Library
 * Atomic multi-counter transactions over shared semaphore sets
 */

pub mod core;
pub mod ipc;
pub mod monitoring;

// Re-exports
pub use crate::core::clock::{Clock, ClockListener, ManualClock, SystemClock};
pub use crate::core::types::{Pid, ROOT_PID};
pub use ipc::sem::{
    CreateMode, SemConfig, SemError, SemManager, SemOp, SemOpFlags, SemOpKind, SemOps,
    SemResult, SemSetInfo, SemStats, SemaphoreSet, WaitMode, SEMMNI, SEMMSL, SEMOPM, SEMVMX,
};
pub use ipc::{IPCManager, IpcCleanup, IpcError, IpcResult, SemId, SemNum, SemaphoreChannel};
pub use monitoring::{init_tracing, span_operation};
