/*!
 * IPC Module
 * Inter-process communication: semaphore sets
 */

pub mod core;
pub mod sem;

// Re-export for convenience
pub use self::core::*;
pub use sem::{
    CreateMode, SemConfig, SemError, SemManager, SemOpFlags, SemOps, SemResult, SemSetInfo,
    SemStats, SemaphoreSet, WaitMode,
};
