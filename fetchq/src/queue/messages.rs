//! Queue commands, worker reports and observable events.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::Result;
use crate::domain::{FailureCause, TransferSnapshot, TransferSpec, TransferStatus};

/// Commands accepted by the queue actor.
pub(crate) enum QueueCommand {
    Add {
        spec: TransferSpec,
        reply: oneshot::Sender<Result<String>>,
    },
    Pause {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Resume {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Remove {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Requeue {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SetMaxConcurrent {
        max_concurrent: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<Option<TransferSnapshot>>,
    },
    List {
        reply: oneshot::Sender<Vec<TransferSnapshot>>,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
}

/// Reports sent by transfer workers to the control task.
///
/// Every worker run ends with exactly one of `Paused`, `Completed`, `Failed`
/// or `Canceled`.
#[derive(Debug)]
pub(crate) enum WorkerReport {
    /// Stream id was resolved to a fetchable URL.
    Resolved {
        id: String,
        source_url: String,
        destination: PathBuf,
    },
    Progress {
        id: String,
        bytes_transferred: u64,
        bytes_total: Option<u64>,
        /// The source turned out not to be resumable; progress restarted
        /// from zero.
        restarted: bool,
    },
    Paused {
        id: String,
        bytes_transferred: u64,
    },
    Completed {
        id: String,
        bytes_total: u64,
        destination: PathBuf,
    },
    Failed {
        id: String,
        cause: FailureCause,
    },
    Canceled {
        id: String,
    },
}

/// Events broadcast by the queue for UI binding.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum TransferEvent {
    /// A transfer changed status.
    StatusChanged {
        id: String,
        status: TransferStatus,
        bytes_transferred: u64,
        bytes_total: Option<u64>,
        error: Option<FailureCause>,
    },
    /// Bytes moved for a running transfer.
    Progress {
        id: String,
        bytes_transferred: u64,
        bytes_total: Option<u64>,
        /// The source turned out not to be resumable; progress restarted
        /// from zero. Front ends surface this to the user.
        restarted: bool,
    },
    /// A transfer was removed from the queue and the store.
    Removed { id: String },
    /// Aggregate counters changed.
    StatsUpdated { stats: QueueStats },
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
    /// Summed bytes over all transfers, history included.
    pub bytes_transferred: u64,
}
