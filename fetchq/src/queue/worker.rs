//! Per-transfer execution task.
//!
//! A worker owns one admitted transfer from resolution to its terminal
//! report. It communicates with the control task only through
//! [`WorkerReport`]s; pause and cancel arrive as cancellation tokens and are
//! observed at I/O boundaries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::messages::WorkerReport;
use crate::domain::FailureCause;
use crate::engine::{
    AudioConverter, EngineError, FetchOutcome, FetchProgress, FetchRequest, Fetcher,
    ResolverRegistry,
};

/// Capacity of the per-fetch progress channel.
const PROGRESS_CHANNEL_CAPACITY: usize = 32;

/// Everything a worker needs to run one transfer.
pub(crate) struct WorkerJob {
    pub id: String,
    pub service: String,
    pub resource_id: String,
    pub stream_id: Option<String>,
    pub source_url: Option<String>,
    pub destination: PathBuf,
    pub resume_from: u64,
    pub convert_to_audio: bool,
    pub subtitle_language: Option<String>,
}

/// Pause/cancel signals for a running worker.
///
/// Pause keeps the partial file; cancel removes it. The worker merges both
/// into a single stop token for the fetch loop and checks afterwards which
/// one fired.
#[derive(Clone)]
pub(crate) struct WorkerSignals {
    pub pause: CancellationToken,
    pub cancel: CancellationToken,
}

impl WorkerSignals {
    pub fn new() -> Self {
        Self {
            pause: CancellationToken::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Run a transfer to its terminal report.
pub(crate) async fn run(
    job: WorkerJob,
    resolvers: Arc<ResolverRegistry>,
    fetcher: Arc<dyn Fetcher>,
    converter: Arc<AudioConverter>,
    reports: mpsc::Sender<WorkerReport>,
    signals: WorkerSignals,
) {
    let stop = merged_stop(&signals);
    let report = execute(&job, &resolvers, &fetcher, &converter, &reports, &signals, &stop).await;
    stop.cancel();
    let _ = reports.send(report).await;
}

async fn execute(
    job: &WorkerJob,
    resolvers: &ResolverRegistry,
    fetcher: &Arc<dyn Fetcher>,
    converter: &AudioConverter,
    reports: &mpsc::Sender<WorkerReport>,
    signals: &WorkerSignals,
    stop: &CancellationToken,
) -> WorkerReport {
    // Stream resolution, when no explicit URL was supplied.
    let (source_url, mut destination) = match &job.source_url {
        Some(url) => (url.clone(), job.destination.clone()),
        None => match resolve_stream(job, resolvers, stop).await {
            Ok(Some((url, destination))) => {
                let _ = reports
                    .send(WorkerReport::Resolved {
                        id: job.id.clone(),
                        source_url: url.clone(),
                        destination: destination.clone(),
                    })
                    .await;
                (url, destination)
            }
            Ok(None) => return stopped_report(job, signals, job.resume_from, None).await,
            Err(cause) => {
                return WorkerReport::Failed {
                    id: job.id.clone(),
                    cause,
                };
            }
        },
    };

    // The raw fetch.
    let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    let forwarder = tokio::spawn(forward_progress(
        job.id.clone(),
        progress_rx,
        reports.clone(),
    ));

    let fetch_result = fetcher
        .fetch(
            FetchRequest {
                url: source_url,
                destination: destination.clone(),
                resume_from: job.resume_from,
            },
            progress_tx,
            stop.clone(),
        )
        .await;
    let _ = forwarder.await;

    let bytes_total = match fetch_result {
        Ok(FetchOutcome::Completed { bytes_total }) => bytes_total,
        Ok(FetchOutcome::Stopped { bytes_transferred }) => {
            return stopped_report(job, signals, bytes_transferred, Some(&destination)).await;
        }
        Err(e) => {
            return WorkerReport::Failed {
                id: job.id.clone(),
                cause: map_engine_error(e),
            };
        }
    };

    // Optional audio extraction; the transfer stays Running throughout.
    if job.convert_to_audio {
        match convert_audio(job, converter, &destination, signals).await {
            Ok(audio_path) => destination = audio_path,
            Err(ConvertStepError::Canceled) => {
                remove_partial(&destination).await;
                return WorkerReport::Canceled { id: job.id.clone() };
            }
            Err(ConvertStepError::Failed(cause)) => {
                return WorkerReport::Failed {
                    id: job.id.clone(),
                    cause,
                };
            }
        }
    }

    // Subtitles are best-effort: failures are logged, never fatal.
    if let Some(language) = &job.subtitle_language {
        if signals.cancel.is_cancelled() {
            remove_partial(&destination).await;
            return WorkerReport::Canceled { id: job.id.clone() };
        }
        fetch_subtitles(job, resolvers, fetcher, &destination, language, signals).await;
        if signals.cancel.is_cancelled() {
            remove_partial(&destination).await;
            return WorkerReport::Canceled { id: job.id.clone() };
        }
    }

    WorkerReport::Completed {
        id: job.id.clone(),
        bytes_total,
        destination,
    }
}

/// Resolve the stream id to a URL; `Ok(None)` means the stop token fired.
async fn resolve_stream(
    job: &WorkerJob,
    resolvers: &ResolverRegistry,
    stop: &CancellationToken,
) -> Result<Option<(String, PathBuf)>, FailureCause> {
    let stream_id = job.stream_id.as_deref().unwrap_or_default();
    let resolver = resolvers.get(&job.service).ok_or_else(|| {
        FailureCause::StreamUnavailable {
            message: format!("no resolver registered for service '{}'", job.service),
        }
    })?;

    let resolved = tokio::select! {
        _ = stop.cancelled() => return Ok(None),
        resolved = resolver.resolve_stream(&job.resource_id, stream_id) => {
            resolved.map_err(map_engine_error)?
        }
    };

    // A fresh transfer adopts the extension the service reported.
    let destination = match &resolved.file_extension {
        Some(extension) if job.resume_from == 0 => job.destination.with_extension(extension),
        _ => job.destination.clone(),
    };

    Ok(Some((resolved.url, destination)))
}

/// Forward fetch progress to the control task, tagged with the transfer id.
async fn forward_progress(
    id: String,
    mut progress_rx: mpsc::Receiver<FetchProgress>,
    reports: mpsc::Sender<WorkerReport>,
) {
    while let Some(progress) = progress_rx.recv().await {
        let _ = reports
            .send(WorkerReport::Progress {
                id: id.clone(),
                bytes_transferred: progress.bytes_transferred,
                bytes_total: progress.bytes_total,
                restarted: progress.restarted,
            })
            .await;
    }
}

enum ConvertStepError {
    Canceled,
    Failed(FailureCause),
}

async fn convert_audio(
    job: &WorkerJob,
    converter: &AudioConverter,
    video_path: &Path,
    signals: &WorkerSignals,
) -> Result<PathBuf, ConvertStepError> {
    if !converter.is_available() {
        return Err(ConvertStepError::Failed(FailureCause::Conversion {
            exit_code: None,
            message: "converter binary not found".to_string(),
        }));
    }

    let audio_path = converter.output_path(video_path);
    if audio_path == *video_path {
        debug!(id = %job.id, "Destination already has the audio extension, skipping conversion");
        return Ok(audio_path);
    }

    // Conversions cannot resume; only cancel is observed here. A pause
    // request during conversion takes effect after the sub-step.
    match converter
        .convert(video_path, &audio_path, &signals.cancel)
        .await
    {
        Ok(()) => {
            if let Err(e) = tokio::fs::remove_file(video_path).await {
                warn!(id = %job.id, error = %e, "Failed to remove source video after conversion");
            }
            Ok(audio_path)
        }
        Err(EngineError::Canceled) => Err(ConvertStepError::Canceled),
        Err(e) => Err(ConvertStepError::Failed(map_engine_error(e))),
    }
}

async fn fetch_subtitles(
    job: &WorkerJob,
    resolvers: &ResolverRegistry,
    fetcher: &Arc<dyn Fetcher>,
    destination: &Path,
    language: &str,
    signals: &WorkerSignals,
) {
    let Some(resolver) = resolvers.get(&job.service) else {
        return;
    };

    let subtitle_url = match resolver.resolve_subtitle(&job.resource_id, language).await {
        Ok(Some(url)) => url,
        Ok(None) => {
            debug!(id = %job.id, language, "No subtitles available");
            return;
        }
        Err(e) => {
            warn!(id = %job.id, language, error = %e, "Subtitle resolution failed");
            return;
        }
    };

    let subtitle_path = destination.with_extension("srt");
    // Progress of the subtitle sub-step is not surfaced.
    let (progress_tx, _progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

    match fetcher
        .fetch(
            FetchRequest {
                url: subtitle_url,
                destination: subtitle_path.clone(),
                resume_from: 0,
            },
            progress_tx,
            signals.cancel.clone(),
        )
        .await
    {
        Ok(FetchOutcome::Completed { .. }) => {
            debug!(id = %job.id, path = %subtitle_path.display(), "Subtitles downloaded");
        }
        Ok(FetchOutcome::Stopped { .. }) => {
            remove_partial(&subtitle_path).await;
        }
        Err(e) => {
            warn!(id = %job.id, error = %e, "Subtitle download failed");
            remove_partial(&subtitle_path).await;
        }
    }
}

/// Terminal report after the stop token fired: canceled or paused.
async fn stopped_report(
    job: &WorkerJob,
    signals: &WorkerSignals,
    bytes_transferred: u64,
    partial: Option<&Path>,
) -> WorkerReport {
    if signals.cancel.is_cancelled() {
        if let Some(path) = partial {
            remove_partial(path).await;
        }
        WorkerReport::Canceled { id: job.id.clone() }
    } else {
        WorkerReport::Paused {
            id: job.id.clone(),
            bytes_transferred,
        }
    }
}

pub(crate) async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove partial file");
    }
}

/// Map an engine error onto the transfer failure taxonomy.
fn map_engine_error(e: EngineError) -> FailureCause {
    match e {
        EngineError::Http(e) => FailureCause::Network {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        },
        EngineError::HttpStatus { status } => FailureCause::Network {
            status: Some(status),
            message: "unexpected HTTP status".to_string(),
        },
        EngineError::Io(e) => FailureCause::Storage {
            message: e.to_string(),
        },
        EngineError::StreamUnavailable(message) => FailureCause::StreamUnavailable { message },
        EngineError::NoResolver(service) => FailureCause::StreamUnavailable {
            message: format!("no resolver registered for service '{}'", service),
        },
        EngineError::Conversion { exit_code, message } => {
            FailureCause::Conversion { exit_code, message }
        }
        // Cancellation is routed through reports, not the failure taxonomy.
        EngineError::Canceled => FailureCause::Network {
            status: None,
            message: "canceled".to_string(),
        },
    }
}

/// Merge pause and cancel into one stop token for the fetch loop.
fn merged_stop(signals: &WorkerSignals) -> CancellationToken {
    let stop = CancellationToken::new();
    let out = stop.clone();
    let pause = signals.pause.clone();
    let cancel = signals.cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = pause.cancelled() => out.cancel(),
            _ = cancel.cancelled() => out.cancel(),
            _ = out.cancelled() => {}
        }
    });
    stop
}
