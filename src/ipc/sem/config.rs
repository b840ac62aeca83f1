/*!
 * Semaphore Configuration
 *
 * Runtime limits for a semaphore registry
 */

use super::types::{SEMMNI, SEMMSL, SEMOPM};
use crate::core::clock::{Clock, SystemClock};
use std::sync::Arc;
use tracing::warn;

/// Registry configuration
#[derive(Debug, Clone)]
pub struct SemConfig {
    /// Maximum live sets in the registry
    pub max_sets: usize,
    /// Maximum counters per set
    pub max_nsems: usize,
    /// Maximum operations per submitted batch
    pub max_ops: usize,
    /// Time source for deadlines
    pub clock: Arc<dyn Clock>,
}

impl Default for SemConfig {
    fn default() -> Self {
        Self {
            max_sets: SEMMNI,
            max_nsems: SEMMSL,
            max_ops: SEMOPM,
            clock: SystemClock::shared(),
        }
    }
}

impl SemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read limits from `SEMSET_MAX_SETS`, `SEMSET_MAX_NSEMS` and `SEMSET_MAX_OPS`
    ///
    /// Values are clamped to the compile-time limits; unparsable values are
    /// ignored with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_sets: env_limit("SEMSET_MAX_SETS", defaults.max_sets),
            max_nsems: env_limit("SEMSET_MAX_NSEMS", defaults.max_nsems),
            max_ops: env_limit("SEMSET_MAX_OPS", defaults.max_ops),
            clock: defaults.clock,
        }
    }

    pub fn with_max_sets(mut self, max_sets: usize) -> Self {
        self.max_sets = max_sets.min(SEMMNI);
        self
    }

    pub fn with_max_nsems(mut self, max_nsems: usize) -> Self {
        self.max_nsems = max_nsems.min(SEMMSL);
        self
    }

    pub fn with_max_ops(mut self, max_ops: usize) -> Self {
        self.max_ops = max_ops.min(SEMOPM);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

fn env_limit(var: &str, ceiling: usize) -> usize {
    match std::env::var(var) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(value) if value > 0 => value.min(ceiling),
            _ => {
                warn!(var, value = %raw, "ignoring invalid semaphore limit");
                ceiling
            }
        },
        Err(_) => ceiling,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    #[test]
    fn test_builder_clamps_to_limits() {
        let config = SemConfig::new()
            .with_max_sets(usize::MAX)
            .with_max_nsems(8)
            .with_max_ops(SEMOPM + 1);

        assert_eq!(config.max_sets, SEMMNI);
        assert_eq!(config.max_nsems, 8);
        assert_eq!(config.max_ops, SEMOPM);
    }

    #[test]
    fn test_with_clock() {
        let config = SemConfig::new().with_clock(Arc::new(ManualClock::new()));
        assert_eq!(config.clock.name(), "manual");
    }

    #[test]
    fn test_env_limit_fallbacks() {
        assert_eq!(env_limit("SEMSET_TEST_UNSET_VARIABLE", 42), 42);
    }
}
