//! Settings repository.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::CategoryDbModel;
use crate::Result;

/// Settings repository trait: durable key→JSON values plus the category table.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn set_value(&self, key: &str, value: &serde_json::Value) -> Result<()>;
    async fn delete_value(&self, key: &str) -> Result<()>;
    async fn load_all(&self) -> Result<HashMap<String, serde_json::Value>>;

    async fn list_categories(&self) -> Result<Vec<CategoryDbModel>>;
    async fn upsert_category(&self, name: &str, path: &str) -> Result<()>;
    async fn delete_category(&self, name: &str) -> Result<()>;
}

/// SQLx implementation of SettingsRepository.
pub struct SqlxSettingsRepository {
    pool: SqlitePool,
}

impl SqlxSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for SqlxSettingsRepository {
    async fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((raw,)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_value(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(&raw)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<HashMap<String, serde_json::Value>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;

        let mut values = HashMap::with_capacity(rows.len());
        for (key, raw) in rows {
            values.insert(key, serde_json::from_str(&raw)?);
        }
        Ok(values)
    }

    async fn list_categories(&self) -> Result<Vec<CategoryDbModel>> {
        let categories =
            sqlx::query_as::<_, CategoryDbModel>("SELECT * FROM categories ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(categories)
    }

    async fn upsert_category(&self, name: &str, path: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO categories (name, path)
            VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET path = excluded.path
            "#,
        )
        .bind(name)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_category(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM categories WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
