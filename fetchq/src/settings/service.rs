//! Settings service with cache and typed accessors.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::info;

use super::events::{SettingsEvent, SettingsEventBroadcaster};
use crate::database::models::CategoryDbModel;
use crate::database::repositories::SettingsRepository;
use crate::{Error, Result};

/// Well-known settings keys.
pub mod keys {
    /// Directory completed transfers are written into by default.
    pub const DOWNLOAD_PATH: &str = "download_path";
    /// Maximum number of concurrently running transfers.
    pub const MAX_CONCURRENT_TRANSFERS: &str = "max_concurrent_transfers";
    /// Category applied to new transfers when none is given.
    pub const DEFAULT_CATEGORY: &str = "default_category";
    /// Whether subtitle download is on by default.
    pub const SUBTITLES_ENABLED: &str = "subtitles_enabled";
    /// Preferred subtitle language.
    pub const SUBTITLE_LANGUAGE: &str = "subtitle_language";
    /// Optional HTTP proxy for fetches.
    pub const PROXY_URL: &str = "proxy_url";
    /// Prefix for per-service default stream ids.
    pub const DEFAULT_STREAM_PREFIX: &str = "default_stream.";
}

/// Default download directory.
const DEFAULT_DOWNLOAD_PATH: &str = "./downloads";

/// Default concurrency limit.
const DEFAULT_MAX_CONCURRENT: usize = 1;

/// Database-backed settings with an in-memory cache.
///
/// Getters read the cache synchronously; call [`hydrate`](Self::hydrate) once
/// at startup. Setters write through to the repository, then update the cache
/// and publish a [`SettingsEvent`].
pub struct SettingsService<R> {
    repo: Arc<R>,
    values: RwLock<HashMap<String, Value>>,
    categories: RwLock<Vec<CategoryDbModel>>,
    events: SettingsEventBroadcaster,
}

impl<R: SettingsRepository> SettingsService<R> {
    pub fn new(repo: Arc<R>, events: SettingsEventBroadcaster) -> Self {
        Self {
            repo,
            values: RwLock::new(HashMap::new()),
            categories: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Load all settings and categories from the repository.
    ///
    /// Returns the number of stored values loaded.
    pub async fn hydrate(&self) -> Result<usize> {
        let values = self.repo.load_all().await?;
        let categories = self.repo.list_categories().await?;
        let count = values.len();

        *self.values.write() = values;
        *self.categories.write() = categories;

        info!(values = count, "Settings hydrated");
        Ok(count)
    }

    fn cached(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    async fn store(&self, key: &str, value: Value) -> Result<()> {
        self.repo.set_value(key, &value).await?;
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    /// Get a raw JSON value.
    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.cached(key)
    }

    /// Set a raw JSON value and publish a change event.
    pub async fn set_raw(&self, key: &str, value: Value) -> Result<()> {
        self.store(key, value).await?;
        self.events.publish(SettingsEvent::ValueChanged {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Default destination directory.
    pub fn download_path(&self) -> PathBuf {
        self.cached(keys::DOWNLOAD_PATH)
            .and_then(|v| v.as_str().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_PATH))
    }

    pub async fn set_download_path(&self, path: &str) -> Result<()> {
        self.set_raw(keys::DOWNLOAD_PATH, Value::from(path)).await
    }

    /// Concurrency limit for the transfer queue; always at least 1.
    pub fn max_concurrent_transfers(&self) -> usize {
        self.cached(keys::MAX_CONCURRENT_TRANSFERS)
            .and_then(|v| v.as_u64())
            .map(|n| n.max(1) as usize)
            .unwrap_or(DEFAULT_MAX_CONCURRENT)
    }

    pub async fn set_max_concurrent_transfers(&self, max_concurrent: usize) -> Result<()> {
        if max_concurrent < 1 {
            return Err(Error::validation("concurrency limit must be at least 1"));
        }
        self.store(keys::MAX_CONCURRENT_TRANSFERS, Value::from(max_concurrent as u64))
            .await?;
        self.events
            .publish(SettingsEvent::ConcurrencyChanged { max_concurrent });
        Ok(())
    }

    pub fn default_category(&self) -> Option<String> {
        self.cached(keys::DEFAULT_CATEGORY)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty())
    }

    pub async fn set_default_category(&self, category: Option<&str>) -> Result<()> {
        let value = category.map(Value::from).unwrap_or(Value::Null);
        self.set_raw(keys::DEFAULT_CATEGORY, value).await
    }

    pub fn subtitles_enabled(&self) -> bool {
        self.cached(keys::SUBTITLES_ENABLED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub async fn set_subtitles_enabled(&self, enabled: bool) -> Result<()> {
        self.set_raw(keys::SUBTITLES_ENABLED, Value::from(enabled))
            .await
    }

    pub fn subtitle_language(&self) -> Option<String> {
        self.cached(keys::SUBTITLE_LANGUAGE)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty())
    }

    pub async fn set_subtitle_language(&self, language: &str) -> Result<()> {
        self.set_raw(keys::SUBTITLE_LANGUAGE, Value::from(language))
            .await
    }

    pub fn proxy_url(&self) -> Option<String> {
        self.cached(keys::PROXY_URL)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty())
    }

    pub async fn set_proxy_url(&self, url: Option<&str>) -> Result<()> {
        let value = url.map(Value::from).unwrap_or(Value::Null);
        self.set_raw(keys::PROXY_URL, value).await
    }

    /// Preferred stream id for a service (e.g. a format label).
    pub fn default_stream_id(&self, service: &str) -> Option<String> {
        self.cached(&format!("{}{}", keys::DEFAULT_STREAM_PREFIX, service))
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty())
    }

    pub async fn set_default_stream_id(&self, service: &str, stream_id: &str) -> Result<()> {
        self.set_raw(
            &format!("{}{}", keys::DEFAULT_STREAM_PREFIX, service),
            Value::from(stream_id),
        )
        .await
    }

    /// All categories, sorted by name.
    pub fn categories(&self) -> Vec<CategoryDbModel> {
        self.categories.read().clone()
    }

    pub async fn set_category(&self, name: &str, path: &str) -> Result<()> {
        self.repo.upsert_category(name, path).await?;
        *self.categories.write() = self.repo.list_categories().await?;
        self.events.publish(SettingsEvent::CategoriesChanged);
        Ok(())
    }

    pub async fn remove_category(&self, name: &str) -> Result<()> {
        self.repo.delete_category(name).await?;
        *self.categories.write() = self.repo.list_categories().await?;
        self.events.publish(SettingsEvent::CategoriesChanged);
        Ok(())
    }

    /// Destination directory for a category, falling back to the default
    /// download path for unknown or absent categories.
    pub fn resolve_destination_dir(&self, category: Option<&str>) -> PathBuf {
        category
            .and_then(|name| {
                self.categories
                    .read()
                    .iter()
                    .find(|c| c.name == name)
                    .map(|c| PathBuf::from(&c.path))
            })
            .unwrap_or_else(|| self.download_path())
    }
}

impl<R: SettingsRepository> crate::queue::DestinationPolicy for SettingsService<R> {
    fn destination_dir(&self, category: Option<&str>) -> PathBuf {
        self.resolve_destination_dir(category)
    }
}
