//! Queue control task.
//!
//! All queue state lives here, owned by a single task: transfer map, queue
//! order, running set and the admission decision. Workers and the persisted
//! store never race it; storage failures are logged and retried on the next
//! mutation rather than crashing the control loop.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::DestinationPolicy;
use super::handle::QueueHandle;
use super::messages::{QueueCommand, QueueStats, TransferEvent, WorkerReport};
use super::worker::{self, WorkerJob, WorkerSignals};
use crate::database::repositories::TransferRepository;
use crate::domain::{Transfer, TransferSpec, TransferStatus};
use crate::engine::{AudioConverter, Fetcher, ResolverRegistry};
use crate::{Error, Result};

/// Fallback extension before the service reports one.
const DEFAULT_EXTENSION: &str = "mp4";

/// Configuration for the transfer queue.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Maximum concurrently running transfers.
    pub max_concurrent: usize,
    /// Command mailbox capacity.
    pub command_capacity: usize,
    /// Worker report mailbox capacity.
    pub report_capacity: usize,
    /// Event broadcast capacity.
    pub event_capacity: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            command_capacity: 64,
            report_capacity: 256,
            event_capacity: 256,
        }
    }
}

/// The transfer queue actor.
pub struct TransferQueue {
    repo: Arc<dyn TransferRepository>,
    policy: Arc<dyn DestinationPolicy>,
    resolvers: Arc<ResolverRegistry>,
    fetcher: Arc<dyn Fetcher>,
    converter: Arc<AudioConverter>,

    transfers: HashMap<String, Transfer>,
    /// Insertion order; drives FIFO admission.
    order: Vec<String>,
    /// Currently admitted transfers and their pause/cancel signals.
    running: HashMap<String, WorkerSignals>,
    /// Transfers the user removed while they were still running.
    pending_removals: HashSet<String>,
    /// Saves that failed and are retried on the next mutation.
    unsaved: HashSet<String>,
    /// Deletes that failed and are retried on the next mutation.
    undeleted: HashSet<String>,

    max_concurrent: usize,

    command_rx: mpsc::Receiver<QueueCommand>,
    report_rx: mpsc::Receiver<WorkerReport>,
    report_tx: mpsc::Sender<WorkerReport>,
    event_tx: broadcast::Sender<TransferEvent>,
    shutdown: CancellationToken,
}

impl TransferQueue {
    /// Spawn the queue actor.
    ///
    /// Returns a handle for commands/events and the actor's join handle. The
    /// actor hydrates from the store before processing commands; transfers
    /// interrupted by a previous crash come back as `Queued`.
    pub fn spawn(
        repo: Arc<dyn TransferRepository>,
        policy: Arc<dyn DestinationPolicy>,
        resolvers: Arc<ResolverRegistry>,
        fetcher: Arc<dyn Fetcher>,
        converter: Arc<AudioConverter>,
        options: QueueOptions,
        shutdown: CancellationToken,
    ) -> (QueueHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(options.command_capacity);
        let (report_tx, report_rx) = mpsc::channel(options.report_capacity);
        let (event_tx, _) = broadcast::channel(options.event_capacity);

        let handle = QueueHandle::new(command_tx, event_tx.clone());

        let actor = Self {
            repo,
            policy,
            resolvers,
            fetcher,
            converter,
            transfers: HashMap::new(),
            order: Vec::new(),
            running: HashMap::new(),
            pending_removals: HashSet::new(),
            unsaved: HashSet::new(),
            undeleted: HashSet::new(),
            max_concurrent: options.max_concurrent.max(1),
            command_rx,
            report_rx,
            report_tx,
            event_tx,
            shutdown,
        };

        let join = tokio::spawn(actor.run());
        (handle, join)
    }

    async fn run(mut self) {
        if let Err(e) = self.hydrate().await {
            error!(error = %e, "Queue hydration failed, starting empty");
        }
        self.try_admit().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.park_workers();
                    break;
                }
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command).await;
                }
                Some(report) = self.report_rx.recv() => {
                    self.handle_report(report).await;
                }
                else => break,
            }
        }

        info!("Transfer queue stopped");
    }

    /// Load persisted transfers, resetting interrupted ones to `Queued`.
    async fn hydrate(&mut self) -> Result<()> {
        let reset = self.repo.reset_interrupted().await?;
        if reset > 0 {
            info!(count = reset, "Reset interrupted transfers to queued");
        }

        let transfers = self.repo.list_all().await?;
        info!(count = transfers.len(), "Hydrated transfers");

        for transfer in transfers {
            self.order.push(transfer.id.clone());
            self.transfers.insert(transfer.id.clone(), transfer);
        }
        Ok(())
    }

    /// Ask running workers to park; their partial files survive and the
    /// interrupted rows are re-queued at next startup.
    fn park_workers(&self) {
        for signals in self.running.values() {
            signals.pause.cancel();
        }
    }

    async fn handle_command(&mut self, command: QueueCommand) {
        match command {
            QueueCommand::Add { spec, reply } => {
                let result = self.add(spec).await;
                let _ = reply.send(result);
            }
            QueueCommand::Pause { id, reply } => {
                let _ = reply.send(self.pause(&id).await);
            }
            QueueCommand::Resume { id, reply } => {
                let _ = reply.send(self.resume(&id).await);
            }
            QueueCommand::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(&id).await);
            }
            QueueCommand::Remove { id, reply } => {
                let _ = reply.send(self.remove(&id).await);
            }
            QueueCommand::Requeue { id, reply } => {
                let _ = reply.send(self.requeue(&id).await);
            }
            QueueCommand::SetMaxConcurrent {
                max_concurrent,
                reply,
            } => {
                let _ = reply.send(self.set_max_concurrent(max_concurrent).await);
            }
            QueueCommand::Get { id, reply } => {
                let _ = reply.send(self.transfers.get(&id).map(Transfer::snapshot));
            }
            QueueCommand::List { reply } => {
                let snapshots = self
                    .order
                    .iter()
                    .filter_map(|id| self.transfers.get(id))
                    .map(Transfer::snapshot)
                    .collect();
                let _ = reply.send(snapshots);
            }
            QueueCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    async fn add(&mut self, spec: TransferSpec) -> Result<String> {
        spec.validate()?;

        let dir = self.policy.destination_dir(spec.category.as_deref());
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %e, "Failed to create destination directory");
        }

        let extension = spec
            .source_url
            .as_deref()
            .and_then(extension_from_url)
            .unwrap_or(DEFAULT_EXTENSION)
            .to_string();
        let stem = sanitize_filename(&spec.title);
        let destination = self.unique_destination(&dir, &stem, &extension).await;

        let transfer = Transfer::from_spec(spec, destination);
        let id = transfer.id.clone();
        debug!(id = %id, title = %transfer.title, "Transfer added");

        self.order.push(id.clone());
        self.transfers.insert(id.clone(), transfer);
        self.persist(&id).await;
        self.emit_status(&id);
        self.emit_stats();
        self.try_admit().await;

        Ok(id)
    }

    async fn pause(&mut self, id: &str) -> Result<()> {
        let Some(transfer) = self.transfers.get_mut(id) else {
            return Ok(());
        };

        match transfer.status {
            TransferStatus::Resolving | TransferStatus::Running => {
                // The worker parks at its next I/O boundary and reports back;
                // the status flips on its `Paused` report.
                if let Some(signals) = self.running.get(id) {
                    signals.pause.cancel();
                }
            }
            TransferStatus::Queued => {
                transfer.transition(TransferStatus::Paused)?;
                self.persist(id).await;
                self.emit_status(id);
                self.emit_stats();
            }
            // Already paused or terminal: idempotent no-op.
            _ => {}
        }
        Ok(())
    }

    async fn resume(&mut self, id: &str) -> Result<()> {
        let Some(transfer) = self.transfers.get_mut(id) else {
            return Ok(());
        };

        if transfer.status == TransferStatus::Paused {
            transfer.transition(TransferStatus::Queued)?;
            self.persist(id).await;
            self.emit_status(id);
            self.emit_stats();
            self.try_admit().await;
        }
        Ok(())
    }

    async fn cancel(&mut self, id: &str) -> Result<()> {
        let Some(transfer) = self.transfers.get_mut(id) else {
            return Ok(());
        };

        match transfer.status {
            TransferStatus::Resolving | TransferStatus::Running => {
                // The worker cleans up its partial file and reports
                // `Canceled` exactly once.
                if let Some(signals) = self.running.get(id) {
                    signals.cancel.cancel();
                }
            }
            TransferStatus::Queued | TransferStatus::Paused => {
                transfer.transition(TransferStatus::Canceled)?;
                let partial = transfer.destination_path.clone();
                worker::remove_partial(&partial).await;
                self.persist(id).await;
                self.emit_status(id);
                self.emit_stats();
            }
            // Terminal: idempotent no-op.
            _ => {}
        }
        Ok(())
    }

    async fn remove(&mut self, id: &str) -> Result<()> {
        let Some(transfer) = self.transfers.get(id) else {
            return Ok(());
        };

        if transfer.status.is_active() {
            // Cancel first; the record goes away once the worker reports.
            self.pending_removals.insert(id.to_string());
            if let Some(signals) = self.running.get(id) {
                signals.cancel.cancel();
            }
            return Ok(());
        }

        // Completed transfers keep their file; everything else cleans up.
        if !matches!(
            transfer.status,
            TransferStatus::Completed | TransferStatus::Canceled
        ) {
            worker::remove_partial(&transfer.destination_path.clone()).await;
        }

        self.finish_remove(id).await;
        Ok(())
    }

    async fn requeue(&mut self, id: &str) -> Result<()> {
        let Some(transfer) = self.transfers.get_mut(id) else {
            return Ok(());
        };

        if !matches!(
            transfer.status,
            TransferStatus::Failed | TransferStatus::Canceled
        ) {
            return Ok(());
        }

        // A fresh attempt starts from zero; drop any stale partial.
        let partial = transfer.destination_path.clone();
        transfer.reset_for_requeue()?;
        worker::remove_partial(&partial).await;

        self.persist(id).await;
        self.emit_status(id);
        self.emit_stats();
        self.try_admit().await;
        Ok(())
    }

    async fn set_max_concurrent(&mut self, max_concurrent: usize) -> Result<()> {
        if max_concurrent < 1 {
            return Err(Error::validation("concurrency limit must be at least 1"));
        }

        // Lowering the bound never preempts running transfers; it only
        // withholds new admissions until the running count falls under it.
        info!(max_concurrent, "Concurrency limit changed");
        self.max_concurrent = max_concurrent;
        self.try_admit().await;
        Ok(())
    }

    async fn handle_report(&mut self, report: WorkerReport) {
        match report {
            WorkerReport::Resolved {
                id,
                source_url,
                destination,
            } => {
                let Some(transfer) = self.transfers.get_mut(&id) else {
                    return;
                };
                transfer.source_url = Some(source_url);
                transfer.destination_path = destination;
                if let Err(e) = transfer.transition(TransferStatus::Running) {
                    debug!(id = %id, error = %e, "Stale resolution report");
                    return;
                }
                self.persist(&id).await;
                self.emit_status(&id);
            }
            WorkerReport::Progress {
                id,
                bytes_transferred,
                bytes_total,
                restarted,
            } => {
                let Some(transfer) = self.transfers.get_mut(&id) else {
                    return;
                };
                if transfer.status != TransferStatus::Running {
                    return;
                }
                if restarted {
                    // Non-resumable source: the byte count legitimately
                    // drops back to zero.
                    transfer.bytes_transferred = 0;
                }
                transfer.record_progress(bytes_transferred, bytes_total);
                let _ = self.event_tx.send(TransferEvent::Progress {
                    id,
                    bytes_transferred: transfer.bytes_transferred,
                    bytes_total: transfer.bytes_total,
                    restarted,
                });
            }
            WorkerReport::Paused {
                id,
                bytes_transferred,
            } => {
                self.running.remove(&id);
                if let Some(transfer) = self.transfers.get_mut(&id) {
                    transfer.record_progress(bytes_transferred, None);
                    if let Err(e) = transfer.transition(TransferStatus::Paused) {
                        debug!(id = %id, error = %e, "Stale pause report");
                    } else {
                        self.persist(&id).await;
                        self.emit_status(&id);
                        self.emit_stats();
                    }
                }
                self.try_admit().await;
            }
            WorkerReport::Completed {
                id,
                bytes_total,
                destination,
            } => {
                self.running.remove(&id);
                if let Some(transfer) = self.transfers.get_mut(&id) {
                    transfer.destination_path = destination;
                    transfer.record_progress(bytes_total, Some(bytes_total));
                    if let Err(e) = transfer.transition(TransferStatus::Completed) {
                        debug!(id = %id, error = %e, "Stale completion report");
                    } else {
                        info!(id = %id, bytes = bytes_total, "Transfer completed");
                        self.persist(&id).await;
                        self.emit_status(&id);
                        self.emit_stats();
                    }
                }
                self.resolve_pending_removal(&id).await;
                self.try_admit().await;
            }
            WorkerReport::Failed { id, cause } => {
                self.running.remove(&id);
                if let Some(transfer) = self.transfers.get_mut(&id) {
                    warn!(id = %id, cause = %cause, "Transfer failed");
                    if let Err(e) = transfer.fail(cause) {
                        debug!(id = %id, error = %e, "Stale failure report");
                    } else {
                        self.persist(&id).await;
                        self.emit_status(&id);
                        self.emit_stats();
                    }
                }
                self.resolve_pending_removal(&id).await;
                self.try_admit().await;
            }
            WorkerReport::Canceled { id } => {
                self.running.remove(&id);
                if let Some(transfer) = self.transfers.get_mut(&id) {
                    if let Err(e) = transfer.transition(TransferStatus::Canceled) {
                        debug!(id = %id, error = %e, "Stale cancel report");
                    } else {
                        self.persist(&id).await;
                        self.emit_status(&id);
                        self.emit_stats();
                    }
                }
                self.resolve_pending_removal(&id).await;
                self.try_admit().await;
            }
        }
    }

    /// Complete a removal deferred while the transfer was running.
    async fn resolve_pending_removal(&mut self, id: &str) {
        if self.pending_removals.remove(id) {
            self.finish_remove(id).await;
        }
    }

    async fn finish_remove(&mut self, id: &str) {
        self.order.retain(|entry| entry != id);
        self.transfers.remove(id);
        self.delete_record(id).await;
        let _ = self.event_tx.send(TransferEvent::Removed { id: id.to_string() });
        self.emit_stats();
    }

    /// Admit queued transfers while running slots are free, FIFO.
    async fn try_admit(&mut self) {
        loop {
            if self.running.len() >= self.max_concurrent {
                return;
            }

            let next = self.order.iter().find(|id| {
                self.transfers
                    .get(*id)
                    .is_some_and(|t| t.status == TransferStatus::Queued)
                    && !self.running.contains_key(*id)
            });
            let Some(id) = next.cloned() else {
                return;
            };

            if !self.admit(&id).await {
                return;
            }
        }
    }

    async fn admit(&mut self, id: &str) -> bool {
        let Some(transfer) = self.transfers.get_mut(id) else {
            return false;
        };

        let needs_resolution = transfer.source_url.is_none();
        let next = if needs_resolution {
            TransferStatus::Resolving
        } else {
            TransferStatus::Running
        };
        if let Err(e) = transfer.transition(next) {
            error!(id = %id, error = %e, "Admission transition rejected");
            return false;
        }

        let job = WorkerJob {
            id: transfer.id.clone(),
            service: transfer.service.clone(),
            resource_id: transfer.resource_id.clone(),
            stream_id: transfer.stream_id.clone(),
            source_url: transfer.source_url.clone(),
            destination: transfer.destination_path.clone(),
            resume_from: transfer.bytes_transferred,
            convert_to_audio: transfer.convert_to_audio,
            subtitle_language: transfer.subtitle_language.clone(),
        };

        debug!(id = %id, resolving = needs_resolution, "Transfer admitted");
        let signals = WorkerSignals::new();
        self.running.insert(id.to_string(), signals.clone());
        self.persist(id).await;
        self.emit_status(id);
        self.emit_stats();

        tokio::spawn(worker::run(
            job,
            self.resolvers.clone(),
            self.fetcher.clone(),
            self.converter.clone(),
            self.report_tx.clone(),
            signals,
        ));
        true
    }

    /// Persist a transfer, queueing the save for retry when storage fails.
    async fn persist(&mut self, id: &str) {
        self.unsaved.insert(id.to_string());
        self.flush_pending().await;
    }

    /// Queue a record deletion, retried like saves.
    async fn delete_record(&mut self, id: &str) {
        self.unsaved.remove(id);
        self.undeleted.insert(id.to_string());
        self.flush_pending().await;
    }

    async fn flush_pending(&mut self) {
        for id in self.undeleted.clone() {
            match self.repo.delete(&id).await {
                Ok(()) => {
                    self.undeleted.remove(&id);
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "Transfer delete failed, will retry");
                }
            }
        }

        for id in self.unsaved.clone() {
            let Some(transfer) = self.transfers.get(&id) else {
                self.unsaved.remove(&id);
                continue;
            };
            match self.repo.save(transfer).await {
                Ok(()) => {
                    self.unsaved.remove(&id);
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "Transfer save failed, will retry");
                }
            }
        }
    }

    fn emit_status(&self, id: &str) {
        if let Some(transfer) = self.transfers.get(id) {
            let _ = self.event_tx.send(TransferEvent::StatusChanged {
                id: transfer.id.clone(),
                status: transfer.status,
                bytes_transferred: transfer.bytes_transferred,
                bytes_total: transfer.bytes_total,
                error: transfer.error.clone(),
            });
        }
    }

    fn emit_stats(&self) {
        let _ = self.event_tx.send(TransferEvent::StatsUpdated {
            stats: self.stats(),
        });
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.transfers.len(),
            ..QueueStats::default()
        };
        for transfer in self.transfers.values() {
            match transfer.status {
                TransferStatus::Queued => stats.queued += 1,
                TransferStatus::Resolving | TransferStatus::Running => stats.running += 1,
                TransferStatus::Paused => stats.paused += 1,
                TransferStatus::Completed => stats.completed += 1,
                TransferStatus::Failed => stats.failed += 1,
                TransferStatus::Canceled => stats.canceled += 1,
            }
            stats.bytes_transferred += transfer.bytes_transferred;
        }
        stats
    }

    /// First destination filename not taken on disk or by another transfer.
    async fn unique_destination(&self, dir: &Path, stem: &str, extension: &str) -> PathBuf {
        let mut candidate = dir.join(format!("{}.{}", stem, extension));
        let mut attempt = 1;
        while self.destination_taken(&candidate)
            || tokio::fs::try_exists(&candidate).await.unwrap_or(false)
        {
            candidate = dir.join(format!("{} ({}).{}", stem, attempt, extension));
            attempt += 1;
        }
        candidate
    }

    fn destination_taken(&self, path: &Path) -> bool {
        self.transfers.values().any(|t| {
            t.destination_path == *path && t.status != TransferStatus::Canceled
        })
    }
}

/// Make a title safe to use as a filename.
fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches(['.', ' ']).to_string();

    if cleaned.is_empty() {
        "transfer".to_string()
    } else {
        cleaned
    }
}

/// Guess a file extension from a source URL path.
fn extension_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let (_, extension) = path.rsplit_once('.')?;
    let valid = !extension.is_empty()
        && extension.len() <= 4
        && extension.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(extension)
}
