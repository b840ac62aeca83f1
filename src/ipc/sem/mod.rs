/*!
 * Semaphore Sets
 *
 * Banks of counters updated by all-or-nothing transactions.
 *
 * A batch of increments, decrements and wait-for-zero operations either
 * applies in full or not at all. A batch that cannot apply parks until
 * another transaction makes it feasible, its deadline passes, or the set is
 * destroyed. Parked batches are served in arrival order per counter.
 */

mod bank;
pub mod config;
pub mod manager;
pub mod ops;
pub mod set;
pub mod types;
mod waiter;

pub use config::SemConfig;
pub use manager::SemManager;
pub use ops::{SemOp, SemOpFlags, SemOpKind, SemOps};
pub use set::SemaphoreSet;
pub use types::{
    CreateMode, SemError, SemResult, SemSetInfo, SemStats, WaitMode, SEMMNI, SEMMSL, SEMOPM,
    SEMVMX,
};
