/*!
 * Semaphore Set Demo
 *
 * Runs a bounded producer/consumer exchange over one set and releases a group
 * of workers through a wait-for-zero barrier, then prints the set's stats.
 */

use anyhow::{Context, Result};
use semset::core::limits::STANDARD_SEM_TIMEOUT;
use semset::{init_tracing, CreateMode, IPCManager, SemConfig, SemOpFlags, SemOps, WaitMode};
use std::thread;
use tracing::info;

const SLOTS: u16 = 0;
const ITEMS: u16 = 1;
const BARRIER: u16 = 2;

const CAPACITY: i16 = 4;
const MESSAGES: usize = 16;
const WORKERS: u32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    info!("semset demo starting");

    let ipc = IPCManager::with_config(SemConfig::from_env());
    let sems = ipc.sems().clone();
    let owner = 1;
    let id = sems
        .open("demo", 3, CreateMode::CreateExclusive, owner)
        .context("creating demo set")?;

    let mut setup = SemOps::new();
    setup.increment(SLOTS, CAPACITY, SemOpFlags::NONE)?;
    sems.run(id, owner, &setup, WaitMode::NonBlocking)?;

    let wait = WaitMode::Timeout(STANDARD_SEM_TIMEOUT);

    let producer = {
        let sems = sems.clone();
        thread::spawn(move || -> Result<()> {
            let mut ops = SemOps::new();
            ops.decrement(SLOTS, 1, SemOpFlags::NONE)?;
            ops.increment(ITEMS, 1, SemOpFlags::NONE)?;
            for _ in 0..MESSAGES {
                sems.run(id, 2, &ops, wait)?;
            }
            Ok(())
        })
    };

    let consumer = {
        let sems = sems.clone();
        thread::spawn(move || -> Result<()> {
            let mut ops = SemOps::new();
            ops.decrement(ITEMS, 1, SemOpFlags::NONE)?;
            ops.increment(SLOTS, 1, SemOpFlags::NONE)?;
            for _ in 0..MESSAGES {
                sems.run(id, 3, &ops, wait)?;
            }
            Ok(())
        })
    };

    producer.join().map_err(|_| anyhow::anyhow!("producer panicked"))??;
    consumer.join().map_err(|_| anyhow::anyhow!("consumer panicked"))??;
    info!(messages = MESSAGES, "producer/consumer exchange finished");

    // Close the barrier, park the workers on it, then open it
    let mut close = SemOps::new();
    close.increment(BARRIER, 1, SemOpFlags::NONE)?;
    sems.run(id, owner, &close, WaitMode::NonBlocking)?;

    let mut workers = Vec::new();
    for worker in 0..WORKERS {
        let mut ops = SemOps::new();
        ops.wait_zero(BARRIER, SemOpFlags::NONE)?;
        let sems = sems.clone();
        workers.push(tokio::spawn(async move {
            sems.run_async(id, 10 + worker, ops, wait).await
        }));
    }

    let set = sems.get(id)?;
    while set.zcnt(BARRIER)? < WORKERS {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }

    let mut open = SemOps::new();
    open.decrement(BARRIER, 1, SemOpFlags::NONE)?;
    sems.run(id, owner, &open, WaitMode::NonBlocking)?;

    for worker in workers {
        worker.await.context("barrier worker panicked")??;
    }
    info!(workers = WORKERS, "barrier released");

    let stats = sems.stats(id)?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    sems.destroy(id, owner)?;
    Ok(())
}
