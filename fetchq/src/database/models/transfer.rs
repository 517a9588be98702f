//! Transfer row model and domain conversions.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::warn;

use crate::domain::{FailureCause, Transfer, TransferStatus};
use crate::{Error, Result};

/// Row model for the `transfers` table.
#[derive(Debug, Clone, FromRow)]
pub struct TransferDbModel {
    pub id: String,
    pub position: i64,
    pub service: String,
    pub resource_id: String,
    pub stream_id: Option<String>,
    pub source_url: Option<String>,
    pub title: String,
    pub category: Option<String>,
    pub subtitle_language: Option<String>,
    pub convert_to_audio: bool,
    pub destination_path: String,
    pub bytes_transferred: i64,
    pub bytes_total: Option<i64>,
    pub status: String,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TransferDbModel {
    /// Build a row from a domain transfer. `position` is assigned by the
    /// repository on insert; updates keep the stored value.
    pub fn from_domain(transfer: &Transfer, position: i64) -> Result<Self> {
        let error = transfer
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        Ok(Self {
            id: transfer.id.clone(),
            position,
            service: transfer.service.clone(),
            resource_id: transfer.resource_id.clone(),
            stream_id: transfer.stream_id.clone(),
            source_url: transfer.source_url.clone(),
            title: transfer.title.clone(),
            category: transfer.category.clone(),
            subtitle_language: transfer.subtitle_language.clone(),
            convert_to_audio: transfer.convert_to_audio,
            destination_path: transfer.destination_path.to_string_lossy().into_owned(),
            bytes_transferred: transfer.bytes_transferred as i64,
            bytes_total: transfer.bytes_total.map(|b| b as i64),
            status: transfer.status.as_str().to_string(),
            error,
            created_at: transfer.created_at.to_rfc3339(),
            updated_at: transfer.updated_at.to_rfc3339(),
        })
    }

    /// Convert a row back into the domain type.
    ///
    /// The error column is parsed leniently: an unreadable cause becomes
    /// `None` rather than poisoning hydration.
    pub fn into_domain(self) -> Result<Transfer> {
        let status = TransferStatus::from_str(&self.status).ok_or_else(|| {
            Error::Other(format!(
                "unknown transfer status '{}' for {}",
                self.status, self.id
            ))
        })?;

        let error = self.error.as_deref().and_then(|raw| {
            serde_json::from_str::<FailureCause>(raw)
                .map_err(|e| warn!(id = %self.id, error = %e, "Discarding unreadable failure cause"))
                .ok()
        });

        Ok(Transfer {
            id: self.id,
            service: self.service,
            resource_id: self.resource_id,
            stream_id: self.stream_id,
            source_url: self.source_url,
            title: self.title,
            category: self.category,
            subtitle_language: self.subtitle_language,
            convert_to_audio: self.convert_to_audio,
            destination_path: self.destination_path.into(),
            bytes_transferred: self.bytes_transferred.max(0) as u64,
            bytes_total: self.bytes_total.map(|b| b.max(0) as u64),
            status,
            error,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
