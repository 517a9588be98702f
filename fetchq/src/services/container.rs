//! Service container for dependency injection.
//!
//! The container constructs every service explicitly and owns their
//! lifecycle: built at startup, torn down by [`shutdown`](ServiceContainer::shutdown).
//! Nothing in the application reaches for global state.

use std::sync::Arc;
use std::time::Duration;

use resources_parser::{PluginRegistry, Resource};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::repositories::{SqlxSettingsRepository, SqlxTransferRepository};
use crate::domain::TransferSpec;
use crate::engine::{AudioConverter, Fetcher, HttpFetcher, ResolverRegistry};
use crate::queue::{DestinationPolicy, QueueHandle, QueueOptions, TransferQueue};
use crate::settings::{SettingsEvent, SettingsEventBroadcaster, SettingsService};
use crate::{Error, Result};

/// Default event channel capacity.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// How long shutdown waits for the queue actor to drain.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    /// Settings service.
    pub settings: Arc<SettingsService<SqlxSettingsRepository>>,
    /// Settings event broadcaster (shared between services).
    pub settings_events: SettingsEventBroadcaster,
    /// URL resolver (built-in services + plugins).
    pub resources: Arc<resources_parser::Resolver>,
    /// Per-service stream resolvers.
    pub stream_resolvers: Arc<ResolverRegistry>,
    /// Transfer queue handle.
    pub queue: QueueHandle,
    /// Queue actor join handle, awaited on shutdown.
    queue_join: JoinHandle<()>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Create a container with no plugins and no stream resolvers.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        Self::with_registries(pool, ResolverRegistry::new(), PluginRegistry::new()).await
    }

    /// Create a container with embedder-supplied stream resolvers and URL
    /// plugins.
    pub async fn with_registries(
        pool: SqlitePool,
        stream_resolvers: ResolverRegistry,
        plugins: PluginRegistry,
    ) -> Result<Self> {
        info!("Initializing service container");

        // Settings service, hydrated before anything reads it.
        let settings_repo = Arc::new(SqlxSettingsRepository::new(pool.clone()));
        let settings_events = SettingsEventBroadcaster::with_capacity(DEFAULT_EVENT_CAPACITY);
        let settings = Arc::new(SettingsService::new(
            settings_repo,
            settings_events.clone(),
        ));
        settings.hydrate().await?;

        // Execution engine.
        let fetcher: Arc<dyn Fetcher> = Arc::new(
            HttpFetcher::with_proxy(settings.proxy_url().as_deref())
                .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?,
        );
        let converter = Arc::new(AudioConverter::new());
        if !converter.is_available() {
            warn!("Audio converter binary not found; audio conversions will fail");
        }

        // Transfer queue actor.
        let transfer_repo = Arc::new(SqlxTransferRepository::new(pool.clone()));
        let stream_resolvers = Arc::new(stream_resolvers);
        let cancellation_token = CancellationToken::new();
        let options = QueueOptions {
            max_concurrent: settings.max_concurrent_transfers(),
            ..QueueOptions::default()
        };
        let (queue, queue_join) = TransferQueue::spawn(
            transfer_repo,
            settings.clone() as Arc<dyn DestinationPolicy>,
            stream_resolvers.clone(),
            fetcher,
            converter,
            options,
            cancellation_token.child_token(),
        );

        let resources = Arc::new(resources_parser::Resolver::with_plugins(plugins));

        info!("Service container initialized");

        Ok(Self {
            pool,
            settings,
            settings_events,
            resources,
            stream_resolvers,
            queue,
            queue_join,
            cancellation_token,
        })
    }

    /// Wire up cross-service subscriptions.
    pub fn initialize(&self) {
        self.setup_settings_event_subscriptions();
    }

    /// Keep the queue's admission bound in sync with the stored setting.
    fn setup_settings_event_subscriptions(&self) {
        let mut rx = self.settings_events.subscribe();
        let queue = self.queue.clone();
        let cancel = self.cancellation_token.child_token();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(SettingsEvent::ConcurrencyChanged { max_concurrent }) => {
                            if let Err(e) = queue.set_max_concurrent(max_concurrent).await {
                                warn!(error = %e, "Failed to apply concurrency change");
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Settings event subscriber lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    /// Resolve a raw URL into a `{service, kind, id}` resource.
    pub fn resolve_url(&self, url: &str) -> Option<Resource> {
        self.resources.resolve(url)
    }

    /// Add a download transfer, applying stored defaults for category and
    /// subtitles.
    ///
    /// Empty strings count as absent, mirroring how front ends hand over
    /// optional selector values.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_download_transfer(
        &self,
        service: &str,
        resource_id: &str,
        stream_id: &str,
        source_url: &str,
        title: &str,
        category: &str,
        subtitle_language: &str,
        convert_to_audio: bool,
    ) -> Result<String> {
        let category = non_empty(category).or_else(|| self.settings.default_category());
        let subtitle_language = non_empty(subtitle_language).or_else(|| {
            self.settings
                .subtitles_enabled()
                .then(|| self.settings.subtitle_language())
                .flatten()
        });
        let source_url = non_empty(source_url);
        // Without an explicit URL, fall back to the stored per-service
        // format selection.
        let stream_id = non_empty(stream_id).or_else(|| {
            source_url
                .is_none()
                .then(|| self.settings.default_stream_id(service))
                .flatten()
        });

        let spec = TransferSpec {
            service: service.to_string(),
            resource_id: resource_id.to_string(),
            stream_id,
            source_url,
            title: title.to_string(),
            category,
            subtitle_language,
            convert_to_audio,
        };

        self.queue.add(spec).await
    }

    /// Shut down all services: stop the queue actor, then close the pool.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down service container");
        self.cancellation_token.cancel();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.queue_join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Queue actor ended with an error"),
            Err(_) => warn!("Timed out waiting for the queue actor to stop"),
        }

        self.pool.close().await;
        info!("Service container shut down");
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
