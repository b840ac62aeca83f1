/*!
 * Inter-Process Communication (IPC)
 * Unified entry point over the IPC subsystems
 */

use super::traits::{IpcCleanup, SemaphoreChannel};
use super::types::{IpcResult, SemId, SemNum};
use crate::core::types::{Pid, Size};
use crate::ipc::sem::{
    CreateMode, SemConfig, SemManager, SemOps, SemSetInfo, SemStats, WaitMode,
};
use tracing::info;

/// IPC Manager
#[derive(Clone, Default)]
pub struct IPCManager {
    sem_manager: SemManager,
}

impl IPCManager {
    pub fn new() -> Self {
        Self::with_config(SemConfig::default())
    }

    pub fn with_config(config: SemConfig) -> Self {
        info!("IPC manager initialized");
        Self {
            sem_manager: SemManager::with_config(config),
        }
    }

    /// Direct access to the semaphore registry
    pub fn sems(&self) -> &SemManager {
        &self.sem_manager
    }
}

impl SemaphoreChannel for SemManager {
    fn open(&self, name: &str, nsems: Size, mode: CreateMode, pid: Pid) -> IpcResult<SemId> {
        SemManager::open(self, name, nsems, mode, pid).map_err(Into::into)
    }

    fn apply(&self, id: SemId, pid: Pid, ops: &SemOps, mode: WaitMode) -> IpcResult<()> {
        self.run(id, pid, ops, mode).map_err(Into::into)
    }

    fn get_value(&self, id: SemId, num: SemNum) -> IpcResult<u16> {
        self.get(id)?.value(num).map_err(Into::into)
    }

    fn set_value(&self, id: SemId, num: SemNum, value: u16, pid: Pid) -> IpcResult<()> {
        self.get(id)?.set_value(num, value, pid).map_err(Into::into)
    }

    fn destroy(&self, id: SemId, pid: Pid) -> IpcResult<()> {
        SemManager::destroy(self, id, pid).map_err(Into::into)
    }

    fn stat(&self, id: SemId) -> IpcResult<SemSetInfo> {
        SemManager::stat(self, id).map_err(Into::into)
    }

    fn stats(&self, id: SemId) -> IpcResult<SemStats> {
        SemManager::stats(self, id).map_err(Into::into)
    }
}

impl IpcCleanup for SemManager {
    fn cleanup_process(&self, pid: Pid) -> Size {
        SemManager::cleanup_process(self, pid)
    }
}

impl IpcCleanup for IPCManager {
    fn cleanup_process(&self, pid: Pid) -> Size {
        let sems = self.sem_manager.cleanup_process(pid);
        if sems > 0 {
            info!(pid, sems, "Cleaned up IPC resources for process");
        }
        sems
    }
}
