/*!
 * Core Module
 * Fundamental types, limits, clocks and serialization helpers
 */

pub mod bincode;
pub mod clock;
pub mod limits;
pub mod serde;
pub mod types;

// Re-export for convenience
pub use clock::{Clock, ClockListener, ManualClock, SystemClock};
pub use types::*;
