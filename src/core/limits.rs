/*!
 * System Limits and Constants
 *
 * Centralized location for semaphore-set limits and thresholds.
 *
 * ## Design Philosophy
 * - Values are grouped by domain (sets, transactions, timeouts)
 * - Performance-critical constants are marked with [PERF]
 * - Security-critical constants are marked with [SECURITY]
 * - Linux-compatible values are marked with [LINUX-COMPAT]
 */

use std::time::Duration;

// =============================================================================
// SEMAPHORE SET LIMITS
// =============================================================================

/// Maximum counters per set (32000)
/// [LINUX-COMPAT] Matches SEMMSL on current kernels
pub const SEMMSL: usize = 32_000;

/// Maximum number of live sets in one registry (32000)
/// [LINUX-COMPAT] Matches SEMMNI
/// [SECURITY] Bounds registry memory
pub const SEMMNI: usize = 32_000;

/// Maximum operations in a single batch (500)
/// [LINUX-COMPAT] Matches SEMOPM; longer batches fail with E2BIG there
pub const SEMOPM: usize = 500;

/// Maximum value a counter can hold (32767)
/// [LINUX-COMPAT] Matches SEMVMX; increments past it are range errors
pub const SEMVMX: u16 = 32_767;

// =============================================================================
// TIMEOUTS
// =============================================================================

/// Default wait for callers that want a bounded block (10 seconds)
pub const STANDARD_SEM_TIMEOUT: Duration = Duration::from_secs(10);

/// Operations slower than this are reported by the tracer (100ms)
/// [PERF] Covers evaluation and wake, not the time spent parked
pub const SLOW_TRANSACTION_THRESHOLD: Duration = Duration::from_millis(100);
