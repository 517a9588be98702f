//! Integration tests for the transfer queue.
//!
//! The queue actor runs against an in-memory SQLite store with scripted
//! fetcher and resolver implementations, so admission, pause/resume, cancel
//! and requeue behavior can be driven deterministically.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use fetchq::database::repositories::{SqlxTransferRepository, TransferRepository};
use fetchq::database::{DbPool, init_pool_with_size, run_migrations};
use fetchq::domain::{FailureCause, TransferSnapshot, TransferSpec, TransferStatus};
use fetchq::engine::{
    AudioConverter, AudioConverterConfig, EngineError, FetchOutcome, FetchProgress, FetchRequest,
    Fetcher, ResolvedStream, ResolverRegistry, StreamResolver,
};
use fetchq::queue::{
    DestinationPolicy, QueueHandle, QueueOptions, TransferEvent, TransferQueue,
};

const STUB_CHUNK: u64 = 4;
const STUB_TOTAL: u64 = 64;

async fn setup_test_db() -> DbPool {
    // A single connection keeps the in-memory database alive and shared.
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("Failed to create test pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}

/// Destination policy pinning everything to one temp directory.
struct FixedDir(PathBuf);

impl DestinationPolicy for FixedDir {
    fn destination_dir(&self, _category: Option<&str>) -> PathBuf {
        self.0.clone()
    }
}

/// Fetcher that writes a small partial file, reports progress, then waits
/// for a release permit (completing) or the stop token (pausing/canceling).
struct GatedFetcher {
    release: Arc<Semaphore>,
}

impl GatedFetcher {
    fn new() -> (Arc<Self>, Arc<Semaphore>) {
        let release = Arc::new(Semaphore::new(0));
        (
            Arc::new(Self {
                release: release.clone(),
            }),
            release,
        )
    }
}

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: mpsc::Sender<FetchProgress>,
        stop: CancellationToken,
    ) -> Result<FetchOutcome, EngineError> {
        tokio::fs::write(&request.destination, b"data").await?;
        let bytes = request.resume_from + STUB_CHUNK;
        let _ = progress
            .send(FetchProgress {
                bytes_transferred: bytes,
                bytes_total: Some(STUB_TOTAL),
                restarted: false,
            })
            .await;

        tokio::select! {
            _ = stop.cancelled() => Ok(FetchOutcome::Stopped {
                bytes_transferred: bytes,
            }),
            permit = self.release.acquire() => {
                permit.expect("release semaphore closed").forget();
                Ok(FetchOutcome::Completed { bytes_total: STUB_TOTAL })
            }
        }
    }
}

/// Fetcher that completes immediately.
struct InstantFetcher;

#[async_trait]
impl Fetcher for InstantFetcher {
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: mpsc::Sender<FetchProgress>,
        _stop: CancellationToken,
    ) -> Result<FetchOutcome, EngineError> {
        tokio::fs::write(&request.destination, b"data").await?;
        let _ = progress
            .send(FetchProgress {
                bytes_transferred: STUB_TOTAL,
                bytes_total: Some(STUB_TOTAL),
                restarted: false,
            })
            .await;
        Ok(FetchOutcome::Completed { bytes_total: STUB_TOTAL })
    }
}

/// Fetcher whose first call fails and later calls block on the stop token.
struct FailOnceFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl Fetcher for FailOnceFetcher {
    async fn fetch(
        &self,
        request: FetchRequest,
        _progress: mpsc::Sender<FetchProgress>,
        stop: CancellationToken,
    ) -> Result<FetchOutcome, EngineError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(EngineError::HttpStatus { status: 503 });
        }
        stop.cancelled().await;
        Ok(FetchOutcome::Stopped {
            bytes_transferred: request.resume_from,
        })
    }
}

/// Stream resolver answering for the "youtube" service.
struct StubResolver;

#[async_trait]
impl StreamResolver for StubResolver {
    fn service(&self) -> &str {
        "youtube"
    }

    async fn resolve_stream(
        &self,
        resource_id: &str,
        stream_id: &str,
    ) -> Result<ResolvedStream, EngineError> {
        Ok(
            ResolvedStream::new(format!("https://cdn.example/{}/{}", resource_id, stream_id))
                .with_extension("webm"),
        )
    }

    async fn resolve_subtitle(
        &self,
        resource_id: &str,
        language: &str,
    ) -> Result<Option<String>, EngineError> {
        Ok(Some(format!(
            "https://cdn.example/{}/subs.{}.srt",
            resource_id, language
        )))
    }
}

fn unavailable_converter() -> Arc<AudioConverter> {
    Arc::new(AudioConverter::with_config(AudioConverterConfig {
        binary_path: "/nonexistent/fetchq-test-ffmpeg".into(),
        ..AudioConverterConfig::default()
    }))
}

struct TestQueue {
    handle: QueueHandle,
    _dir: tempfile::TempDir,
    dir_path: PathBuf,
    shutdown: CancellationToken,
}

async fn spawn_queue(fetcher: Arc<dyn Fetcher>, max_concurrent: usize) -> TestQueue {
    spawn_queue_with(fetcher, max_concurrent, ResolverRegistry::new()).await
}

async fn spawn_queue_with(
    fetcher: Arc<dyn Fetcher>,
    max_concurrent: usize,
    resolvers: ResolverRegistry,
) -> TestQueue {
    let pool = setup_test_db().await;
    let repo = Arc::new(SqlxTransferRepository::new(pool));
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let dir_path = dir.path().to_path_buf();
    let shutdown = CancellationToken::new();

    let (handle, _join) = TransferQueue::spawn(
        repo,
        Arc::new(FixedDir(dir_path.clone())),
        Arc::new(resolvers),
        fetcher,
        unavailable_converter(),
        QueueOptions {
            max_concurrent,
            ..QueueOptions::default()
        },
        shutdown.clone(),
    );

    TestQueue {
        handle,
        _dir: dir,
        dir_path,
        shutdown,
    }
}

fn explicit_spec(title: &str) -> TransferSpec {
    TransferSpec::new("youtube", "abc123", title)
        .with_source_url(format!("https://cdn.example/{}.mp4", title))
}

/// Poll until the predicate holds on the transfer snapshot.
async fn wait_for(
    queue: &QueueHandle,
    id: &str,
    what: &str,
    predicate: impl Fn(&TransferSnapshot) -> bool,
) -> TransferSnapshot {
    let deadline = Duration::from_secs(5);
    let result = tokio::time::timeout(deadline, async {
        loop {
            if let Some(snapshot) = queue.get(id).await.expect("queue stopped")
                && predicate(&snapshot)
            {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

async fn wait_for_status(queue: &QueueHandle, id: &str, status: TransferStatus) -> TransferSnapshot {
    wait_for(queue, id, status.as_str(), |s| s.status == status).await
}

/// Poll until the given number of transfers has completed.
async fn wait_for_completed_count(queue: &QueueHandle, count: usize) {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            if queue.stats().await.expect("queue stopped").completed == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {} completions", count))
}

mod admission_tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_admission_under_concurrency_bound() {
        let (fetcher, release) = GatedFetcher::new();
        let queue = spawn_queue(fetcher, 2).await;

        let mut ids = Vec::new();
        for n in 0..4 {
            ids.push(
                queue
                    .handle
                    .add(explicit_spec(&format!("clip-{}", n)))
                    .await
                    .unwrap(),
            );
        }

        // The first two are admitted, in order; the rest stay queued.
        wait_for_status(&queue.handle, &ids[0], TransferStatus::Running).await;
        wait_for_status(&queue.handle, &ids[1], TransferStatus::Running).await;
        assert_eq!(
            queue.handle.get(&ids[2]).await.unwrap().unwrap().status,
            TransferStatus::Queued
        );
        assert_eq!(
            queue.handle.get(&ids[3]).await.unwrap().unwrap().status,
            TransferStatus::Queued
        );

        // Freeing one slot admits the earliest queued transfer. (The permit
        // may complete either running transfer; admission order is what
        // matters.)
        release.add_permits(1);
        wait_for_completed_count(&queue.handle, 1).await;
        wait_for_status(&queue.handle, &ids[2], TransferStatus::Running).await;
        assert_eq!(
            queue.handle.get(&ids[3]).await.unwrap().unwrap().status,
            TransferStatus::Queued
        );

        queue.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_lowering_bound_does_not_preempt() {
        let (fetcher, release) = GatedFetcher::new();
        let queue = spawn_queue(fetcher, 2).await;

        let first = queue.handle.add(explicit_spec("first")).await.unwrap();
        let second = queue.handle.add(explicit_spec("second")).await.unwrap();
        wait_for_status(&queue.handle, &first, TransferStatus::Running).await;
        wait_for_status(&queue.handle, &second, TransferStatus::Running).await;

        queue.handle.set_max_concurrent(1).await.unwrap();
        let third = queue.handle.add(explicit_spec("third")).await.unwrap();

        // Both running transfers keep running over the lowered bound.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            queue.handle.get(&first).await.unwrap().unwrap().status,
            TransferStatus::Running
        );
        assert_eq!(
            queue.handle.get(&second).await.unwrap().unwrap().status,
            TransferStatus::Running
        );
        assert_eq!(
            queue.handle.get(&third).await.unwrap().unwrap().status,
            TransferStatus::Queued
        );

        // One completion leaves the running count at the new bound, so the
        // third transfer is still withheld.
        release.add_permits(1);
        wait_for_completed_count(&queue.handle, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            queue.handle.get(&third).await.unwrap().unwrap().status,
            TransferStatus::Queued
        );

        // The second completion frees a slot.
        release.add_permits(1);
        wait_for_completed_count(&queue.handle, 2).await;
        wait_for_status(&queue.handle, &third, TransferStatus::Running).await;

        queue.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        let (fetcher, _release) = GatedFetcher::new();
        let queue = spawn_queue(fetcher, 1).await;

        assert!(queue.handle.set_max_concurrent(0).await.is_err());

        queue.shutdown.cancel();
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_then_resume_preserves_bytes() {
        let (fetcher, _release) = GatedFetcher::new();
        let queue = spawn_queue(fetcher, 1).await;

        let id = queue.handle.add(explicit_spec("pausable")).await.unwrap();
        wait_for(&queue.handle, &id, "first progress", |s| {
            s.status == TransferStatus::Running && s.bytes_transferred == STUB_CHUNK
        })
        .await;

        queue.handle.pause(&id).await.unwrap();
        let paused = wait_for_status(&queue.handle, &id, TransferStatus::Paused).await;
        assert_eq!(paused.bytes_transferred, STUB_CHUNK);

        // Pausing keeps the partial file for the resumed attempt.
        let partial: Vec<PathBuf> = std::fs::read_dir(&queue.dir_path)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(partial.len(), 1);

        // Pause is idempotent.
        queue.handle.pause(&id).await.unwrap();

        queue.handle.resume(&id).await.unwrap();
        let resumed = wait_for_status(&queue.handle, &id, TransferStatus::Running).await;
        // Progress carries over; the fetcher resumes from the old offset.
        assert!(resumed.bytes_transferred >= STUB_CHUNK);

        queue.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_cancel_running_removes_partial_and_notifies_once() {
        let (fetcher, _release) = GatedFetcher::new();
        let queue = spawn_queue(fetcher, 1).await;
        let mut events = queue.handle.subscribe();

        let id = queue.handle.add(explicit_spec("doomed")).await.unwrap();
        wait_for_status(&queue.handle, &id, TransferStatus::Running).await;

        queue.handle.cancel(&id).await.unwrap();
        wait_for_status(&queue.handle, &id, TransferStatus::Canceled).await;
        // Cancel is idempotent on a terminal transfer.
        queue.handle.cancel(&id).await.unwrap();

        // Exactly one Canceled notification.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut canceled_events = 0;
        while let Ok(event) = events.try_recv() {
            if let TransferEvent::StatusChanged {
                status: TransferStatus::Canceled,
                ..
            } = event
            {
                canceled_events += 1;
            }
        }
        assert_eq!(canceled_events, 1);

        // The partial file is gone.
        assert_eq!(std::fs::read_dir(&queue.dir_path).unwrap().count(), 0);

        queue.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_cancel_queued_transfer() {
        let (fetcher, _release) = GatedFetcher::new();
        let queue = spawn_queue(fetcher, 1).await;

        let running = queue.handle.add(explicit_spec("running")).await.unwrap();
        let waiting = queue.handle.add(explicit_spec("waiting")).await.unwrap();
        wait_for_status(&queue.handle, &running, TransferStatus::Running).await;

        queue.handle.cancel(&waiting).await.unwrap();
        let snapshot = queue.handle.get(&waiting).await.unwrap().unwrap();
        assert_eq!(snapshot.status, TransferStatus::Canceled);

        queue.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_completion_emits_ordered_events() {
        let queue = spawn_queue(Arc::new(InstantFetcher), 1).await;
        let mut events = queue.handle.subscribe();

        let id = queue.handle.add(explicit_spec("quick")).await.unwrap();
        let done = wait_for_status(&queue.handle, &id, TransferStatus::Completed).await;
        assert_eq!(done.bytes_transferred, STUB_TOTAL);
        assert_eq!(done.bytes_total, Some(STUB_TOTAL));

        // Status events for this transfer arrive in lifecycle order.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TransferEvent::StatusChanged { id: event_id, status, .. } = event
                && event_id == id
            {
                statuses.push(status);
            }
        }
        assert_eq!(
            statuses,
            vec![
                TransferStatus::Queued,
                TransferStatus::Running,
                TransferStatus::Completed
            ]
        );

        queue.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_remove_completed_keeps_file() {
        let queue = spawn_queue(Arc::new(InstantFetcher), 1).await;

        let id = queue.handle.add(explicit_spec("keeper")).await.unwrap();
        wait_for_status(&queue.handle, &id, TransferStatus::Completed).await;

        queue.handle.remove(&id).await.unwrap();
        assert!(queue.handle.get(&id).await.unwrap().is_none());
        // The downloaded file survives removal of the history entry.
        assert_eq!(std::fs::read_dir(&queue.dir_path).unwrap().count(), 1);

        // Remove is idempotent.
        queue.handle.remove(&id).await.unwrap();

        queue.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_requeue_failed_preserves_identity_and_resets_bytes() {
        let fetcher = Arc::new(FailOnceFetcher {
            calls: AtomicUsize::new(0),
        });
        let queue = spawn_queue(fetcher, 1).await;

        let id = queue.handle.add(explicit_spec("retryable")).await.unwrap();
        let failed = wait_for_status(&queue.handle, &id, TransferStatus::Failed).await;
        assert!(matches!(
            failed.error,
            Some(FailureCause::Network {
                status: Some(503),
                ..
            })
        ));

        queue.handle.requeue(&id).await.unwrap();
        let requeued = wait_for(&queue.handle, &id, "requeued attempt", |s| {
            s.status != TransferStatus::Failed
        })
        .await;
        assert_eq!(requeued.id, id);
        assert_eq!(requeued.bytes_transferred, 0);
        assert!(requeued.error.is_none());

        // The second attempt runs until told otherwise.
        wait_for_status(&queue.handle, &id, TransferStatus::Running).await;

        queue.shutdown.cancel();
    }
}

mod resolution_tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_id_resolves_before_running() {
        let mut resolvers = ResolverRegistry::new();
        resolvers.register(Arc::new(StubResolver));
        let queue = spawn_queue_with(Arc::new(InstantFetcher), 1, resolvers).await;

        let spec = TransferSpec::new("youtube", "abc123", "resolved clip").with_stream_id("22");
        let id = queue.handle.add(spec).await.unwrap();

        wait_for_status(&queue.handle, &id, TransferStatus::Completed).await;

        // The resolver's extension decides the destination.
        let files: Vec<String> = std::fs::read_dir(&queue.dir_path)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(files.contains(&"resolved clip.webm".to_string()), "{files:?}");

        queue.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_missing_resolver_fails_with_stream_unavailable() {
        let queue = spawn_queue(Arc::new(InstantFetcher), 1).await;

        let spec = TransferSpec::new("nosuch", "abc123", "unresolvable").with_stream_id("22");
        let id = queue.handle.add(spec).await.unwrap();

        let failed = wait_for_status(&queue.handle, &id, TransferStatus::Failed).await;
        assert!(matches!(
            failed.error,
            Some(FailureCause::StreamUnavailable { .. })
        ));

        queue.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_subtitles_land_next_to_destination() {
        let mut resolvers = ResolverRegistry::new();
        resolvers.register(Arc::new(StubResolver));
        let queue = spawn_queue_with(Arc::new(InstantFetcher), 1, resolvers).await;

        let spec = TransferSpec::new("youtube", "abc123", "subtitled")
            .with_stream_id("22")
            .with_subtitles("en");
        let id = queue.handle.add(spec).await.unwrap();
        wait_for_status(&queue.handle, &id, TransferStatus::Completed).await;

        let mut files: Vec<String> = std::fs::read_dir(&queue.dir_path)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["subtitled.srt", "subtitled.webm"]);

        queue.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_missing_converter_fails_conversion() {
        let queue = spawn_queue(Arc::new(InstantFetcher), 1).await;

        let spec = explicit_spec("audio only").with_convert_to_audio(true);
        let id = queue.handle.add(spec).await.unwrap();

        let failed = wait_for_status(&queue.handle, &id, TransferStatus::Failed).await;
        assert!(matches!(
            failed.error,
            Some(FailureCause::Conversion { .. })
        ));

        queue.shutdown.cancel();
    }
}

mod validation_tests {
    use super::*;

    #[tokio::test]
    async fn test_add_rejects_invalid_specs() {
        let queue = spawn_queue(Arc::new(InstantFetcher), 1).await;

        // No source at all.
        let spec = TransferSpec::new("youtube", "abc123", "no source");
        assert!(queue.handle.add(spec).await.is_err());

        // Both sources at once.
        let spec = TransferSpec::new("youtube", "abc123", "two sources")
            .with_stream_id("22")
            .with_source_url("https://cdn.example/v.mp4");
        assert!(queue.handle.add(spec).await.is_err());

        // Empty service.
        let spec = TransferSpec::new("", "abc123", "no service")
            .with_source_url("https://cdn.example/v.mp4");
        assert!(queue.handle.add(spec).await.is_err());

        queue.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_colliding_titles_get_distinct_destinations() {
        let queue = spawn_queue(Arc::new(InstantFetcher), 1).await;

        let first = queue.handle.add(explicit_spec("same title")).await.unwrap();
        let second = queue.handle.add(explicit_spec("same title")).await.unwrap();
        wait_for_status(&queue.handle, &first, TransferStatus::Completed).await;
        wait_for_status(&queue.handle, &second, TransferStatus::Completed).await;

        let list = queue.handle.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, first);
        assert_eq!(list[1].id, second);

        // The second transfer got a numbered destination instead of
        // overwriting the first.
        let mut files: Vec<String> = std::fs::read_dir(&queue.dir_path)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["same title (1).mp4", "same title.mp4"]);

        queue.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_operations_on_unknown_ids_are_noops() {
        let queue = spawn_queue(Arc::new(InstantFetcher), 1).await;

        queue.handle.pause("ghost").await.unwrap();
        queue.handle.resume("ghost").await.unwrap();
        queue.handle.cancel("ghost").await.unwrap();
        queue.handle.remove("ghost").await.unwrap();
        queue.handle.requeue("ghost").await.unwrap();
        assert!(queue.handle.get("ghost").await.unwrap().is_none());

        queue.shutdown.cancel();
    }
}

mod hydration_tests {
    use super::*;
    use fetchq::domain::Transfer;

    #[tokio::test]
    async fn test_restart_requeues_interrupted_transfers_in_order() {
        let pool = setup_test_db().await;
        let repo = Arc::new(SqlxTransferRepository::new(pool.clone()));
        let dir = tempfile::tempdir().unwrap();

        // Simulate a previous session that died mid-transfer.
        let mut interrupted = Transfer::from_spec(
            explicit_spec("was running"),
            dir.path().join("was running.mp4"),
        );
        interrupted.transition(TransferStatus::Running).unwrap();
        let mut done =
            Transfer::from_spec(explicit_spec("was done"), dir.path().join("was done.mp4"));
        done.transition(TransferStatus::Running).unwrap();
        done.transition(TransferStatus::Completed).unwrap();
        repo.save(&interrupted).await.unwrap();
        repo.save(&done).await.unwrap();

        let shutdown = CancellationToken::new();
        let (fetcher, _release) = GatedFetcher::new();
        let (handle, _join) = TransferQueue::spawn(
            repo,
            Arc::new(FixedDir(dir.path().to_path_buf())),
            Arc::new(ResolverRegistry::new()),
            fetcher,
            unavailable_converter(),
            QueueOptions::default(),
            shutdown.clone(),
        );

        // The interrupted transfer comes back and is admitted again; the
        // completed one stays terminal history.
        wait_for_status(&handle, &interrupted.id, TransferStatus::Running).await;
        assert_eq!(
            handle.get(&done.id).await.unwrap().unwrap().status,
            TransferStatus::Completed
        );

        let list = handle.list().await.unwrap();
        let ids: Vec<&str> = list.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![interrupted.id.as_str(), done.id.as_str()]);

        shutdown.cancel();
    }
}
