//! Transfer repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::TransferDbModel;
use crate::domain::Transfer;
use crate::{Error, Result};

/// Transfer repository trait.
#[async_trait]
pub trait TransferRepository: Send + Sync {
    /// Insert or update a transfer.
    ///
    /// A new row is appended at the end of the queue order; an existing row
    /// keeps its position. Upsert semantics let the control task retry a
    /// failed save on the next mutation without tracking what kind of write
    /// was lost.
    async fn save(&self, transfer: &Transfer) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Transfer>;
    /// All transfers in queue (insertion) order.
    async fn list_all(&self) -> Result<Vec<Transfer>>;
    async fn delete(&self, id: &str) -> Result<()>;
    /// Reset transfers left RESOLVING/RUNNING by a crash back to QUEUED.
    async fn reset_interrupted(&self) -> Result<i32>;
}

/// SQLx implementation of TransferRepository.
pub struct SqlxTransferRepository {
    pool: SqlitePool,
}

impl SqlxTransferRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransferRepository for SqlxTransferRepository {
    async fn save(&self, transfer: &Transfer) -> Result<()> {
        // Position is assigned by the subquery on insert; the value passed
        // to the model is a placeholder.
        let row = TransferDbModel::from_domain(transfer, 0)?;
        sqlx::query(
            r#"
            INSERT INTO transfers (
                id, position, service, resource_id, stream_id, source_url,
                title, category, subtitle_language, convert_to_audio,
                destination_path, bytes_transferred, bytes_total, status,
                error, created_at, updated_at
            )
            VALUES (
                ?, (SELECT COALESCE(MAX(position), 0) + 1 FROM transfers),
                ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            )
            ON CONFLICT(id) DO UPDATE SET
                stream_id = excluded.stream_id,
                source_url = excluded.source_url,
                title = excluded.title,
                category = excluded.category,
                subtitle_language = excluded.subtitle_language,
                convert_to_audio = excluded.convert_to_audio,
                destination_path = excluded.destination_path,
                bytes_transferred = excluded.bytes_transferred,
                bytes_total = excluded.bytes_total,
                status = excluded.status,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.id)
        .bind(&row.service)
        .bind(&row.resource_id)
        .bind(&row.stream_id)
        .bind(&row.source_url)
        .bind(&row.title)
        .bind(&row.category)
        .bind(&row.subtitle_language)
        .bind(row.convert_to_audio)
        .bind(&row.destination_path)
        .bind(row.bytes_transferred)
        .bind(row.bytes_total)
        .bind(&row.status)
        .bind(&row.error)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Transfer> {
        sqlx::query_as::<_, TransferDbModel>("SELECT * FROM transfers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Transfer", id))?
            .into_domain()
    }

    async fn list_all(&self) -> Result<Vec<Transfer>> {
        let rows =
            sqlx::query_as::<_, TransferDbModel>("SELECT * FROM transfers ORDER BY position")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|row| row.into_domain()).collect()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM transfers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_interrupted(&self) -> Result<i32> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE transfers SET status = 'QUEUED', updated_at = ? \
             WHERE status IN ('RESOLVING', 'RUNNING')",
        )
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as i32)
    }
}
