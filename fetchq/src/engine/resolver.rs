//! Stream resolution seam.
//!
//! The queue resolves a `stream_id` into a fetchable URL before a transfer
//! starts running. Per-service clients implement [`StreamResolver`] and are
//! registered by service name; the queue never talks to a service API
//! directly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::EngineError;

/// A stream selection resolved to a directly fetchable URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedStream {
    pub url: String,
    /// Preferred destination extension, when the service knows it.
    pub file_extension: Option<String>,
}

impl ResolvedStream {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_extension: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = Some(extension.into());
        self
    }
}

/// Per-service stream resolution.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Service name this resolver answers for.
    fn service(&self) -> &str;

    /// Resolve a chosen stream id into a fetchable URL.
    async fn resolve_stream(
        &self,
        resource_id: &str,
        stream_id: &str,
    ) -> std::result::Result<ResolvedStream, EngineError>;

    /// Resolve a subtitle track URL for a language.
    ///
    /// `Ok(None)` means the service has no subtitles for the resource; only
    /// infrastructure problems are errors.
    async fn resolve_subtitle(
        &self,
        _resource_id: &str,
        _language: &str,
    ) -> std::result::Result<Option<String>, EngineError> {
        Ok(None)
    }
}

/// Registry of stream resolvers keyed by service name.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn StreamResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver under its own service name.
    pub fn register(&mut self, resolver: Arc<dyn StreamResolver>) {
        self.resolvers
            .insert(resolver.service().to_string(), resolver);
    }

    /// Look up the resolver for a service.
    pub fn get(&self, service: &str) -> Option<Arc<dyn StreamResolver>> {
        self.resolvers.get(service).cloned()
    }

    /// Registered service names, unordered.
    pub fn services(&self) -> Vec<String> {
        self.resolvers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver;

    #[async_trait]
    impl StreamResolver for FixedResolver {
        fn service(&self) -> &str {
            "youtube"
        }

        async fn resolve_stream(
            &self,
            resource_id: &str,
            stream_id: &str,
        ) -> std::result::Result<ResolvedStream, EngineError> {
            Ok(ResolvedStream::new(format!(
                "https://cdn.example/{}/{}",
                resource_id, stream_id
            ))
            .with_extension("mp4"))
        }
    }

    #[tokio::test]
    async fn test_registry_lookup_and_resolve() {
        let mut registry = ResolverRegistry::new();
        registry.register(Arc::new(FixedResolver));

        let resolver = registry.get("youtube").unwrap();
        let stream = resolver.resolve_stream("abc123", "22").await.unwrap();
        assert_eq!(stream.url, "https://cdn.example/abc123/22");
        assert_eq!(stream.file_extension.as_deref(), Some("mp4"));

        assert!(registry.get("dailymotion").is_none());
    }

    #[tokio::test]
    async fn test_default_subtitle_resolution_is_absent() {
        let resolver = FixedResolver;
        let subtitle = resolver.resolve_subtitle("abc123", "en").await.unwrap();
        assert!(subtitle.is_none());
    }
}
