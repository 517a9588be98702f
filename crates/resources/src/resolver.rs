//! URL to resource resolution.
//!
//! Built-in service patterns are tried first, in fixed priority order
//! (youtube, dailymotion, vimeo), then the plugin registry. The substring
//! branches below are order-sensitive: an ambiguous URL takes the first
//! matching branch.

use std::sync::LazyLock;

use regex::Regex;

use crate::plugins::PluginRegistry;
use crate::resource::{DAILYMOTION, Resource, ResourceKind, VIMEO, YOUTUBE};

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:(?:www|m)\.)?(?:youtube\.com|youtu\.be)/\S+").unwrap()
});

static DAILYMOTION_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:(?:www|touch)\.)?(?:dailymotion\.com|dai\.ly)/\S+").unwrap()
});

static VIMEO_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://(?:www\.)?vimeo\.com/\S+").unwrap());

/// Separators preceding a YouTube video/playlist/user id.
static YOUTUBE_ID_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"v=|list=|/").unwrap());

/// Resolves raw URLs into [`Resource`] triples.
pub struct Resolver {
    plugins: PluginRegistry,
}

impl Resolver {
    /// Create a resolver with no plugins registered.
    pub fn new() -> Self {
        Self::with_plugins(PluginRegistry::new())
    }

    /// Create a resolver backed by a plugin registry.
    pub fn with_plugins(plugins: PluginRegistry) -> Self {
        Self { plugins }
    }

    /// The plugin registry backing this resolver.
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Resolve a URL to a resource.
    ///
    /// Returns `None` when no built-in or plugin pattern matches. Never
    /// errors: an unrecognized URL is an absence, not a failure.
    pub fn resolve(&self, url: &str) -> Option<Resource> {
        let url = percent_decode(url);

        if YOUTUBE_URL.is_match(&url) {
            return Some(resolve_youtube(&url));
        }
        if DAILYMOTION_URL.is_match(&url) {
            return Some(resolve_dailymotion(&url));
        }
        if VIMEO_URL.is_match(&url) {
            return Some(resolve_vimeo(&url));
        }

        self.plugins.resolve(&url)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

fn percent_decode(url: &str) -> String {
    urlencoding::decode(url)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| url.to_string())
}

fn resolve_youtube(url: &str) -> Resource {
    // Id is whatever follows the last `v=`, `list=` or `/`, up to the query.
    let id = until_query(YOUTUBE_ID_SPLIT.split(url).last().unwrap_or(""));

    let kind = if url.contains("youtu.be") || url.contains("v=") || url.contains("/v/") {
        ResourceKind::Video
    } else if url.contains("list=") {
        ResourceKind::Playlist
    } else {
        ResourceKind::User
    };

    Resource::new(YOUTUBE, kind, id)
}

fn resolve_dailymotion(url: &str) -> Resource {
    // Id is the last path segment, minus any `_slug` suffix.
    let id = last_segment(url).split('_').next().unwrap_or("");

    let kind = if url.contains("dai.ly") || url.contains("/video/") {
        ResourceKind::Video
    } else if url.contains("/playlist/") {
        ResourceKind::Playlist
    } else {
        ResourceKind::User
    };

    Resource::new(DAILYMOTION, kind, id)
}

fn resolve_vimeo(url: &str) -> Resource {
    let id = last_segment(url);

    let kind = if url.contains("/album/") {
        ResourceKind::Playlist
    } else if id.chars().any(|c| !c.is_ascii_digit()) {
        ResourceKind::User
    } else {
        ResourceKind::Video
    };

    Resource::new(VIMEO, kind, id)
}

fn last_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or("")
}

fn until_query(input: &str) -> &str {
    input.split(['&', '?']).next().unwrap_or("")
}
