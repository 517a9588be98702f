//! Transfer entity and status state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Status of a transfer.
///
/// `Queued → Resolving → Running → {Completed | Failed | Canceled}`, with
/// `Paused` reachable from `Queued`, `Resolving` and `Running`. Terminal
/// states are left only through a user-initiated requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// Accepted, waiting for a running slot.
    Queued,
    /// Stream id is being turned into a fetchable URL.
    Resolving,
    /// Bytes are being transferred (includes the conversion sub-step).
    Running,
    /// Parked by the user; keeps its partial file.
    Paused,
    /// Terminal, success.
    Completed,
    /// Terminal, carries a failure cause.
    Failed,
    /// Terminal, user-initiated abort.
    Canceled,
}

impl TransferStatus {
    /// Get the status from a string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Some(Self::Queued),
            "RESOLVING" => Some(Self::Resolving),
            "RUNNING" => Some(Self::Running),
            "PAUSED" => Some(Self::Paused),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELED" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Resolving => "RESOLVING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Whether this status ends the transfer's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Whether the transfer occupies a running slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Resolving | Self::Running)
    }

    /// Whether a transition to `next` is allowed.
    pub fn can_transition(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        match (*self, next) {
            (Queued, Resolving | Running | Paused | Failed | Canceled) => true,
            (Resolving, Running | Paused | Failed | Canceled) => true,
            (Running, Paused | Completed | Failed | Canceled) => true,
            (Paused, Queued | Canceled) => true,
            // Requeue paths out of terminal states.
            (Failed, Queued) => true,
            (Canceled, Queued) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cause of a failed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// Selected format/stream could not be resolved to a URL.
    StreamUnavailable { message: String },
    /// Connection or transfer error; carries the HTTP status where known.
    Network {
        status: Option<u16>,
        message: String,
    },
    /// Audio-conversion subprocess exited nonzero.
    Conversion {
        exit_code: Option<i32>,
        message: String,
    },
    /// Destination write error (disk full, permission denied).
    Storage { message: String },
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StreamUnavailable { message } => write!(f, "stream unavailable: {}", message),
            Self::Network {
                status: Some(status),
                message,
            } => write!(f, "network failure (HTTP {}): {}", status, message),
            Self::Network {
                status: None,
                message,
            } => write!(f, "network failure: {}", message),
            Self::Conversion {
                exit_code: Some(code),
                message,
            } => write!(f, "conversion failed (exit {}): {}", code, message),
            Self::Conversion {
                exit_code: None,
                message,
            } => write!(f, "conversion failed: {}", message),
            Self::Storage { message } => write!(f, "storage failure: {}", message),
        }
    }
}

/// Request to create a transfer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferSpec {
    /// Service name ("youtube", "vimeo", a plugin name, ...).
    pub service: String,
    /// Service-specific resource id (video id for built-ins, URL for plugins).
    pub resource_id: String,
    /// Selected stream id, resolved to a URL before the transfer runs.
    pub stream_id: Option<String>,
    /// Explicit source URL; mutually exclusive with `stream_id`.
    pub source_url: Option<String>,
    /// Display title; also the basis of the destination filename.
    pub title: String,
    /// Category deciding the destination directory.
    pub category: Option<String>,
    /// Subtitle language to download alongside the video.
    pub subtitle_language: Option<String>,
    /// Extract the audio track after the fetch completes.
    pub convert_to_audio: bool,
}

impl TransferSpec {
    pub fn new(
        service: impl Into<String>,
        resource_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            resource_id: resource_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the stream id to resolve before running.
    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    /// Set an explicit source URL, bypassing resolution.
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Request subtitles in the given language.
    pub fn with_subtitles(mut self, language: impl Into<String>) -> Self {
        self.subtitle_language = Some(language.into());
        self
    }

    /// Request audio extraction after the fetch.
    pub fn with_convert_to_audio(mut self, convert: bool) -> Self {
        self.convert_to_audio = convert;
        self
    }

    /// Validate the spec.
    ///
    /// Exactly one of `stream_id` / `source_url` must be authoritative.
    pub fn validate(&self) -> Result<()> {
        if self.service.trim().is_empty() {
            return Err(Error::validation("transfer service must not be empty"));
        }
        if self.title.trim().is_empty() {
            return Err(Error::validation("transfer title must not be empty"));
        }
        match (&self.stream_id, &self.source_url) {
            (None, None) => Err(Error::validation(
                "transfer needs a stream id or an explicit source URL",
            )),
            (Some(_), Some(_)) => Err(Error::validation(
                "stream id and explicit source URL are mutually exclusive",
            )),
            (Some(_), None) if self.resource_id.trim().is_empty() => Err(Error::validation(
                "stream resolution needs a resource id",
            )),
            _ => Ok(()),
        }
    }
}

/// The durable unit of work: one download, optionally with audio conversion.
///
/// Mutated only by the queue's control task; everything else observes
/// snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    /// Opaque unique id, stable for the transfer's lifetime.
    pub id: String,
    pub service: String,
    pub resource_id: String,
    pub stream_id: Option<String>,
    /// Resolved source URL; filled in lazily when a stream id was supplied.
    pub source_url: Option<String>,
    pub title: String,
    pub category: Option<String>,
    pub subtitle_language: Option<String>,
    pub convert_to_audio: bool,
    pub destination_path: PathBuf,
    pub bytes_transferred: u64,
    /// Unknown until response headers are received.
    pub bytes_total: Option<u64>,
    pub status: TransferStatus,
    pub error: Option<FailureCause>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// Create a queued transfer from a validated spec.
    pub fn from_spec(spec: TransferSpec, destination_path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            service: spec.service,
            resource_id: spec.resource_id,
            stream_id: spec.stream_id,
            source_url: spec.source_url,
            title: spec.title,
            category: spec.category,
            subtitle_language: spec.subtitle_language,
            convert_to_audio: spec.convert_to_audio,
            destination_path,
            bytes_transferred: 0,
            bytes_total: None,
            status: TransferStatus::Queued,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new status, validating the state machine.
    pub fn transition(&mut self, next: TransferStatus) -> Result<()> {
        if !self.status.can_transition(next) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a progress update. Progress is monotonic: a report below the
    /// current byte count is ignored.
    pub fn record_progress(&mut self, bytes_transferred: u64, bytes_total: Option<u64>) {
        if bytes_transferred >= self.bytes_transferred {
            self.bytes_transferred = bytes_transferred;
        }
        if bytes_total.is_some() {
            self.bytes_total = bytes_total;
        }
        self.updated_at = Utc::now();
    }

    /// Transition to `Failed` with a cause.
    pub fn fail(&mut self, cause: FailureCause) -> Result<()> {
        self.transition(TransferStatus::Failed)?;
        self.error = Some(cause);
        Ok(())
    }

    /// Reset a failed or canceled transfer for a fresh attempt.
    ///
    /// Keeps the identity, clears progress and error.
    pub fn reset_for_requeue(&mut self) -> Result<()> {
        self.transition(TransferStatus::Queued)?;
        self.bytes_transferred = 0;
        self.bytes_total = None;
        self.error = None;
        Ok(())
    }

    /// Observational snapshot for UI binding.
    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            id: self.id.clone(),
            title: self.title.clone(),
            service: self.service.clone(),
            status: self.status,
            bytes_transferred: self.bytes_transferred,
            bytes_total: self.bytes_total,
            category: self.category.clone(),
            error: self.error.clone(),
        }
    }
}

/// Read-only view of a transfer handed to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub id: String,
    pub title: String,
    pub service: String,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub bytes_total: Option<u64>,
    pub category: Option<String>,
    pub error: Option<FailureCause>,
}
