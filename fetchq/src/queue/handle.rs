//! Cloneable handle for talking to the queue actor.

use tokio::sync::{broadcast, mpsc, oneshot};

use super::messages::{QueueCommand, QueueStats, TransferEvent};
use crate::domain::{TransferSnapshot, TransferSpec};
use crate::{Error, Result};

/// Handle to the queue actor.
///
/// All methods are safe to call from any task; they enqueue a command and
/// await the actor's reply. The handle never observes queue internals — only
/// snapshots and events.
#[derive(Clone)]
pub struct QueueHandle {
    commands: mpsc::Sender<QueueCommand>,
    events: broadcast::Sender<TransferEvent>,
}

impl QueueHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<QueueCommand>,
        events: broadcast::Sender<TransferEvent>,
    ) -> Self {
        Self { commands, events }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> QueueCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::QueueUnavailable("queue actor has stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| Error::QueueUnavailable("queue actor dropped the reply".into()))
    }

    /// Add a transfer. Returns the new transfer's id.
    pub async fn add(&self, spec: TransferSpec) -> Result<String> {
        self.request(|reply| QueueCommand::Add { spec, reply })
            .await?
    }

    /// Pause a transfer. No-op if already paused, terminal or absent.
    pub async fn pause(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.request(|reply| QueueCommand::Pause { id, reply })
            .await?
    }

    /// Resume a paused transfer. No-op otherwise.
    pub async fn resume(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.request(|reply| QueueCommand::Resume { id, reply })
            .await?
    }

    /// Cancel a transfer, removing any partial file. No-op if terminal.
    pub async fn cancel(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.request(|reply| QueueCommand::Cancel { id, reply })
            .await?
    }

    /// Remove a transfer from the queue and the persisted store.
    pub async fn remove(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.request(|reply| QueueCommand::Remove { id, reply })
            .await?
    }

    /// Requeue a failed or canceled transfer for a fresh attempt.
    pub async fn requeue(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.request(|reply| QueueCommand::Requeue { id, reply })
            .await?
    }

    /// Change the concurrency bound. Running transfers are never preempted.
    pub async fn set_max_concurrent(&self, max_concurrent: usize) -> Result<()> {
        self.request(|reply| QueueCommand::SetMaxConcurrent {
            max_concurrent,
            reply,
        })
        .await?
    }

    /// Snapshot of a single transfer.
    pub async fn get(&self, id: impl Into<String>) -> Result<Option<TransferSnapshot>> {
        let id = id.into();
        self.request(|reply| QueueCommand::Get { id, reply }).await
    }

    /// Snapshots of all transfers in queue order.
    pub async fn list(&self) -> Result<Vec<TransferSnapshot>> {
        self.request(|reply| QueueCommand::List { reply }).await
    }

    /// Aggregate queue counters.
    pub async fn stats(&self) -> Result<QueueStats> {
        self.request(|reply| QueueCommand::Stats { reply }).await
    }

    /// Subscribe to transfer events.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }
}
