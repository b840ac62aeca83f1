/*!
 * Semaphore Manager
 * Registry of named semaphore sets
 */

use super::super::core::types::SemId;
use super::config::SemConfig;
use super::ops::SemOps;
use super::set::SemaphoreSet;
use super::types::{CreateMode, SemError, SemResult, SemSetInfo, SemStats, WaitMode};
use crate::core::types::{Pid, Size, ROOT_PID};
use ahash::RandomState;
use crossbeam_queue::SegQueue;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Semaphore set registry
///
/// # Performance
/// - Sets are handed out as `Arc`s so blocking transactions never hold a map shard
/// - Lock-free queue for ID recycling
/// - next_id and the live count are shared across clones so IDs stay unique
pub struct SemManager {
    sets: Arc<DashMap<SemId, Arc<SemaphoreSet>, RandomState>>,
    names: Arc<DashMap<String, SemId, RandomState>>,
    next_id: Arc<AtomicU32>,
    live: Arc<AtomicUsize>,
    free_ids: Arc<SegQueue<SemId>>,
    config: SemConfig,
}

impl SemManager {
    pub fn new() -> Self {
        Self::with_config(SemConfig::default())
    }

    pub fn with_config(config: SemConfig) -> Self {
        info!(
            max_sets = config.max_sets,
            max_nsems = config.max_nsems,
            max_ops = config.max_ops,
            clock = config.clock.name(),
            "Semaphore manager initialized"
        );
        Self {
            sets: Arc::new(DashMap::with_hasher(RandomState::new())),
            names: Arc::new(DashMap::with_hasher(RandomState::new())),
            next_id: Arc::new(AtomicU32::new(1)),
            live: Arc::new(AtomicUsize::new(0)),
            free_ids: Arc::new(SegQueue::new()),
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &SemConfig {
        &self.config
    }

    /// Open the set called `name`, creating it according to `mode`
    ///
    /// `nsems` is the number of counters for a new set. For an existing set it
    /// is a lower bound: zero accepts any size.
    pub fn open(&self, name: &str, nsems: Size, mode: CreateMode, pid: Pid) -> SemResult<SemId> {
        match self.names.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                if mode == CreateMode::CreateExclusive {
                    return Err(SemError::AlreadyExists(name.to_string()));
                }
                let id = *entry.get();
                let set = self
                    .sets
                    .get(&id)
                    .map(|s| Arc::clone(s.value()))
                    .ok_or_else(|| SemError::NotFound(name.to_string()))?;
                if nsems > set.count() {
                    return Err(SemError::InvalidArgument(format!(
                        "set {} has {} counters, {} requested",
                        name,
                        set.count(),
                        nsems
                    )));
                }
                debug!(set = id, name, pid, "opened existing semaphore set");
                Ok(id)
            }
            Entry::Vacant(entry) => {
                if mode == CreateMode::MustExist {
                    return Err(SemError::NotFound(name.to_string()));
                }
                if nsems == 0 || nsems > self.config.max_nsems {
                    return Err(SemError::InvalidArgument(format!(
                        "set size must be 1..={}, got {}",
                        self.config.max_nsems, nsems
                    )));
                }

                let max = self.config.max_sets;
                if let Err(current) =
                    self.live
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                            (n < max).then_some(n + 1)
                        })
                {
                    return Err(SemError::LimitExceeded(current, max));
                }

                let id = match self.free_ids.pop() {
                    Some(recycled) => {
                        debug!(set = recycled, "recycled semaphore set ID");
                        recycled
                    }
                    None => self.next_id.fetch_add(1, Ordering::SeqCst),
                };

                let set = SemaphoreSet::new(id, name, nsems, pid, Arc::clone(&self.config.clock));
                self.sets.insert(id, set);
                entry.insert(id);

                info!(set = id, name, nsems, pid, "Created semaphore set");
                Ok(id)
            }
        }
    }

    /// Handle to a live set
    pub fn get(&self, id: SemId) -> SemResult<Arc<SemaphoreSet>> {
        self.sets
            .get(&id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| SemError::NotFound(id.to_string()))
    }

    /// ID of the set called `name`
    pub fn lookup(&self, name: &str) -> Option<SemId> {
        self.names.get(name).map(|id| *id.value())
    }

    /// Apply `ops` to set `id` on behalf of `pid`
    pub fn run(&self, id: SemId, pid: Pid, ops: &SemOps, mode: WaitMode) -> SemResult<()> {
        self.check_batch(ops)?;
        self.get(id)?.run(pid, ops, mode)
    }

    /// Apply `ops` to set `id` from async code
    pub async fn run_async(&self, id: SemId, pid: Pid, ops: SemOps, mode: WaitMode) -> SemResult<()> {
        self.check_batch(&ops)?;
        let set = self.get(id)?;
        set.run_async(pid, ops, mode).await
    }

    fn check_batch(&self, ops: &SemOps) -> SemResult<()> {
        if ops.len() > self.config.max_ops {
            return Err(SemError::TooManyOps {
                count: ops.len(),
                max: self.config.max_ops,
            });
        }
        Ok(())
    }

    /// Destroy set `id`
    ///
    /// Only the creating process or the privileged process may destroy a set.
    /// Parked transactions fail with `Removed`.
    pub fn destroy(&self, id: SemId, pid: Pid) -> SemResult<()> {
        let set = self.get(id)?;
        if pid != ROOT_PID && pid != set.creator_pid() {
            return Err(SemError::PermissionDenied(format!(
                "process {} cannot remove semaphore set {} owned by {}",
                pid,
                id,
                set.creator_pid()
            )));
        }

        // Name goes first: an open holding the name entry must still find the set
        self.names.remove_if(set.name(), |_, v| *v == id);
        // A concurrent destroy may have won the race
        let Some((_, set)) = self.sets.remove(&id) else {
            return Err(SemError::NotFound(id.to_string()));
        };

        let woken = set.remove();
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.free_ids.push(id);

        info!(set = id, pid, woken, "Destroyed semaphore set, ID added to recycling pool");
        Ok(())
    }

    /// Destroy every set created by `pid`
    ///
    /// Transactions `pid` still has parked on other sets are cancelled.
    /// Returns the number of sets destroyed.
    pub fn cleanup_process(&self, pid: Pid) -> Size {
        let (owned, others): (Vec<Arc<SemaphoreSet>>, Vec<Arc<SemaphoreSet>>) = self
            .sets
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .partition(|set| set.creator_pid() == pid);

        let cancelled: usize = others.iter().map(|set| set.cancel(pid)).sum();

        let mut count = 0;
        for set in owned {
            match self.destroy(set.id(), pid) {
                Ok(()) => count += 1,
                Err(e) => warn!(set = set.id(), pid, error = %e, "Failed to clean up semaphore set"),
            }
        }

        if count > 0 || cancelled > 0 {
            info!(pid, count, cancelled, "Cleaned up semaphore sets for process");
        }
        count
    }

    pub fn stat(&self, id: SemId) -> SemResult<SemSetInfo> {
        self.get(id)?.stat()
    }

    pub fn stats(&self, id: SemId) -> SemResult<SemStats> {
        Ok(self.get(id)?.stats())
    }

    /// Stats for every live set, ordered by ID
    pub fn all_stats(&self) -> Vec<SemStats> {
        let mut stats: Vec<SemStats> = self.sets.iter().map(|s| s.value().stats()).collect();
        stats.sort_by_key(|s| s.id);
        stats
    }

    /// Number of live sets
    pub fn count(&self) -> Size {
        self.live.load(Ordering::SeqCst)
    }
}

impl Default for SemManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SemManager {
    fn clone(&self) -> Self {
        Self {
            sets: Arc::clone(&self.sets),
            names: Arc::clone(&self.names),
            next_id: Arc::clone(&self.next_id),
            live: Arc::clone(&self.live),
            free_ids: Arc::clone(&self.free_ids),
            config: self.config.clone(),
        }
    }
}
