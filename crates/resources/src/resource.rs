//! Resource identity types.

use serde::{Deserialize, Serialize};

/// Service name used for built-in YouTube matches.
pub const YOUTUBE: &str = "youtube";
/// Service name used for built-in Dailymotion matches.
pub const DAILYMOTION: &str = "dailymotion";
/// Service name used for built-in Vimeo matches.
pub const VIMEO: &str = "vimeo";

/// Kind of entity a resource URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Video,
    Playlist,
    User,
    Group,
    Category,
    Comment,
    Stream,
    Subtitle,
}

impl ResourceKind {
    /// Get the kind from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "video" => Some(Self::Video),
            "playlist" => Some(Self::Playlist),
            "user" => Some(Self::User),
            "group" => Some(Self::Group),
            "category" => Some(Self::Category),
            "comment" => Some(Self::Comment),
            "stream" => Some(Self::Stream),
            "subtitle" => Some(Self::Subtitle),
            _ => None,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Playlist => "playlist",
            Self::User => "user",
            Self::Group => "group",
            Self::Category => "category",
            Self::Comment => "comment",
            Self::Stream => "stream",
            Self::Subtitle => "subtitle",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A service-identified entity produced by the resolver.
///
/// For built-in services the `id` is the parsed fragment (video id, playlist
/// id, user name). For plugin matches the `id` is the whole decoded URL; the
/// plugin parses it downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub service: String,
    pub kind: ResourceKind,
    pub id: String,
}

impl Resource {
    pub fn new(service: impl Into<String>, kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            kind,
            id: id.into(),
        }
    }
}
