// src/engine/workers.rs - Worker Pool and VWAP Scheduler
//! Fixed-size worker pool and the delay-queue scheduler for VWAP re-entry
//!
//! Workers drain one shared FIFO queue of [`EngineTask`]s, so matching passes
//! and VWAP steps never block a client session. The scheduler owns a min-heap
//! of future wake-ups and is the only task that waits on time: when an entry
//! comes due it dispatches a VWAP step onto the pool, so no worker ever holds
//! a slot sleeping between scheduler steps.

use std::{cmp::Reverse, collections::BinaryHeap, sync::Arc, time::Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

use crate::core::types::{OrderId, Symbol};
use crate::engine::MatchingEngine;

/// Unit of work executed on the pool
#[derive(Debug, Clone)]
pub enum EngineTask {
    /// Run a matching pass on one symbol's book
    MatchSymbol(Symbol),
    /// Run one VWAP scheduler step for a parent order
    VwapStep {
        /// Symbol the parent executes on
        symbol: Symbol,
        /// Parent order id
        order_id: OrderId,
    },
}

/// A future VWAP step awaiting its wake-up time
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScheduledStep {
    /// When the step becomes due
    pub wake_at: Instant,
    /// Parent order id
    pub order_id: OrderId,
    /// Symbol the parent executes on
    pub symbol: Symbol,
}

/// Spawn `worker_count` tasks draining the shared task queue
pub fn spawn_workers(
    engine: MatchingEngine,
    task_rx: mpsc::UnboundedReceiver<EngineTask>,
    worker_count: usize,
) {
    let task_rx = Arc::new(Mutex::new(task_rx));
    for worker_id in 0..worker_count {
        let engine = engine.clone();
        let task_rx = Arc::clone(&task_rx);
        tokio::spawn(async move {
            debug!(worker_id, "engine worker started");
            loop {
                let task = { task_rx.lock().await.recv().await };
                match task {
                    Some(task) => engine.run_task(task),
                    None => {
                        debug!(worker_id, "task queue closed; worker exiting");
                        break;
                    }
                }
            }
        });
    }
    info!(worker_count, "worker pool running");
}

/// Spawn the scheduler task: holds pending [`ScheduledStep`]s in a min-heap
/// and forwards each to the worker pool once due
pub fn spawn_scheduler(
    mut entry_rx: mpsc::UnboundedReceiver<ScheduledStep>,
    task_tx: mpsc::UnboundedSender<EngineTask>,
) {
    tokio::spawn(async move {
        let mut heap: BinaryHeap<Reverse<ScheduledStep>> = BinaryHeap::new();
        loop {
            let next_due = heap.peek().map(|Reverse(step)| step.wake_at);
            match next_due {
                Some(wake_at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake_at)) => {
                            if let Some(Reverse(step)) = heap.pop() {
                                debug!(order_id = step.order_id, symbol = %step.symbol, "vwap step due");
                                let task = EngineTask::VwapStep {
                                    symbol: step.symbol,
                                    order_id: step.order_id,
                                };
                                if task_tx.send(task).is_err() {
                                    error!("worker pool gone; scheduler exiting");
                                    return;
                                }
                            }
                        }
                        entry = entry_rx.recv() => {
                            match entry {
                                Some(step) => heap.push(Reverse(step)),
                                None => {
                                    debug!("scheduler channel closed; exiting");
                                    return;
                                }
                            }
                        }
                    }
                }
                None => match entry_rx.recv().await {
                    Some(step) => heap.push(Reverse(step)),
                    None => {
                        debug!("scheduler channel closed; exiting");
                        return;
                    }
                },
            }
        }
    });
    info!("vwap scheduler running");
}
