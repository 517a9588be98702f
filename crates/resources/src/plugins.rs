//! Plugin-declared URL pattern tables.
//!
//! Plugins extend resolution beyond the built-in services by declaring an
//! ordered list of `(kind, pattern)` pairs. Order matters twice: plugins are
//! tried in registration order, and a plugin's patterns in declaration order,
//! so resolution is deterministic — first match wins.

use regex::Regex;

use crate::error::PatternError;
use crate::resource::{Resource, ResourceKind};

/// URL pattern table declared by a single plugin.
#[derive(Debug)]
pub struct ResourcePlugin {
    name: String,
    patterns: Vec<(ResourceKind, Regex)>,
    optional_kinds: Vec<ResourceKind>,
}

impl ResourcePlugin {
    /// Create an empty plugin declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            patterns: Vec::new(),
            optional_kinds: Vec::new(),
        }
    }

    /// Append a URL pattern for a resource kind.
    ///
    /// Patterns match like the built-in tables: the match must start at the
    /// beginning of the URL, but an explicit `^` anchor is not required.
    pub fn with_pattern(mut self, kind: ResourceKind, pattern: &str) -> Result<Self, PatternError> {
        let regex = Regex::new(pattern).map_err(|source| PatternError::InvalidPattern {
            kind: kind.to_string(),
            source,
        })?;
        self.patterns.push((kind, regex));
        Ok(self)
    }

    /// Declare support for an optional resource kind (e.g. subtitles).
    pub fn with_optional_kind(mut self, kind: ResourceKind) -> Self {
        self.optional_kinds.push(kind);
        self
    }

    /// The plugin's stable service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the plugin declared support for an optional kind.
    pub fn supports(&self, kind: ResourceKind) -> bool {
        self.optional_kinds.contains(&kind)
    }

    /// First kind whose pattern matches the URL, in declaration order.
    fn matches(&self, url: &str) -> Option<ResourceKind> {
        self.patterns
            .iter()
            .find(|(_, regex)| matches_at_start(regex, url))
            .map(|(kind, _)| *kind)
    }
}

/// Match only when the pattern hits the start of the URL.
fn matches_at_start(regex: &Regex, url: &str) -> bool {
    regex.find(url).is_some_and(|m| m.start() == 0)
}

/// Ordered collection of plugin pattern tables.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: Vec<ResourcePlugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Later registrations are tried after earlier ones.
    pub fn register(&mut self, plugin: ResourcePlugin) {
        self.plugins.push(plugin);
    }

    /// Look up a plugin by name.
    pub fn get(&self, name: &str) -> Option<&ResourcePlugin> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    /// Iterate plugins in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourcePlugin> {
        self.plugins.iter()
    }

    /// Resolve a URL against all registered plugins.
    ///
    /// The resource id is the whole URL; plugins parse their own URLs.
    pub(crate) fn resolve(&self, url: &str) -> Option<Resource> {
        self.plugins
            .iter()
            .find_map(|plugin| {
                plugin
                    .matches(url)
                    .map(|kind| Resource::new(plugin.name(), kind, url))
            })
    }
}
