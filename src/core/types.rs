/*!
 * Core Types
 * Common types used across the crate
 */

/// Process ID type
///
/// Identifies the caller of a transaction. Recorded per counter as the
/// last actor and used for ownership checks on destroy.
pub type Pid = u32;

/// Privileged caller, allowed to destroy any set
pub const ROOT_PID: Pid = 0;

/// Size type for counts and lengths
pub type Size = usize;
