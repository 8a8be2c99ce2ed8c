//! Broadcast Dispatcher
//!
//! Queues change-of-value announcements for a single worker task. The
//! synchronizer enqueues (waiting for room when the queue is full) and moves
//! on; the worker awaits each announcement in order, logging and counting
//! failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::PointError;
use crate::stack::{CovNotification, ObjectHandle, ProtocolStack};
use crate::types::{ObjectIdentifier, PointValue};

enum DispatchCommand {
    Announce(CovNotification),
    Flush(oneshot::Sender<()>),
    Stop,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Accepted into the queue
    pub queued: u64,
    pub sent: u64,
    /// Attempted and rejected by the stack
    pub failed: u64,
    /// Refused because the dispatcher was stopped
    pub rejected: u64,
}

#[derive(Clone)]
pub struct BroadcastDispatcher {
    tx: mpsc::Sender<DispatchCommand>,
    device: ObjectIdentifier,
    counters: Arc<Counters>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BroadcastDispatcher {
    /// Start the worker. `capacity` bounds the number of queued announcements.
    pub fn spawn(stack: Arc<dyn ProtocolStack>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let device = stack.device_identifier();

        let worker = tokio::spawn(run_worker(stack, rx, counters.clone()));

        Self {
            tx,
            device,
            counters,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Queue a present-value announcement for `handle`.
    ///
    /// Waits for room when the queue is full, so every announcement reaches
    /// the worker. Fails only once the dispatcher has been stopped.
    pub async fn notify(&self, handle: &ObjectHandle, value: PointValue) -> Result<(), PointError> {
        let notification = CovNotification::present_value(self.device, handle, value);

        match self.tx.send(DispatchCommand::Announce(notification)).await {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(PointError::Notification {
                    object: handle.to_string(),
                    reason: "dispatcher is stopped".to_string(),
                })
            }
        }
    }

    /// Wait until every announcement queued before this call was attempted
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(DispatchCommand::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Drain the queue and stop the worker
    pub async fn shutdown(&self) {
        let _ = self.tx.send(DispatchCommand::Stop).await;

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Dispatcher worker panicked: {}", e);
            }
        }
    }
}

async fn run_worker(
    stack: Arc<dyn ProtocolStack>,
    mut rx: mpsc::Receiver<DispatchCommand>,
    counters: Arc<Counters>,
) {
    debug!("Broadcast dispatcher started");

    while let Some(command) = rx.recv().await {
        match command {
            DispatchCommand::Announce(notification) => match stack.announce(&notification).await {
                Ok(()) => {
                    counters.sent.fetch_add(1, Ordering::Relaxed);
                    info!(
                        object = %notification.monitored_object,
                        name = %notification.object_name,
                        "Broadcasted present value"
                    );
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        object = %notification.monitored_object,
                        name = %notification.object_name,
                        error = %e,
                        "Failed to broadcast present value"
                    );
                }
            },
            DispatchCommand::Flush(done) => {
                let _ = done.send(());
            }
            DispatchCommand::Stop => break,
        }
    }

    debug!("Broadcast dispatcher stopped");
}
