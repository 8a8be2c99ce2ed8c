//! Service Handle
//!
//! Cloneable reference to a running service's task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{mpsc, oneshot};

use super::{ServiceError, ServiceResult};

// ─────────────────────────────────────────────────────────────────────────────
// Service State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceState {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
    Failed = 4,
}

impl ServiceState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::Stopped,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Failed)
    }

    pub fn is_running(&self) -> bool {
        *self == ServiceState::Running
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Command
// ─────────────────────────────────────────────────────────────────────────────

/// Commands delivered to a running service task
pub enum ServiceCommand {
    /// Run `on_tick` now and report completion
    ForceTick(oneshot::Sender<()>),

    Shutdown,
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Handle
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ServiceHandle {
    pub service_id: String,

    command_tx: mpsc::Sender<ServiceCommand>,

    /// Shared with the service task for lock-free reads
    state: Arc<AtomicU8>,
}

impl ServiceHandle {
    pub(crate) fn new(
        service_id: String,
        command_tx: mpsc::Sender<ServiceCommand>,
        state: Arc<AtomicU8>,
    ) -> Self {
        Self {
            service_id,
            command_tx,
            state,
        }
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Run one tick out of schedule and wait for it to finish
    pub async fn force_tick(&self) -> ServiceResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(ServiceCommand::ForceTick(tx)).await?;
        rx.await.map_err(|_| ServiceError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> ServiceResult<()> {
        self.send(ServiceCommand::Shutdown).await
    }

    async fn send(&self, command: ServiceCommand) -> ServiceResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ServiceError::NotRunning(self.service_id.clone()))
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service_id", &self.service_id)
            .field("state", &self.state())
            .finish()
    }
}
