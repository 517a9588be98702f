//! Settings change events.

use tokio::sync::broadcast;

/// Events broadcast when settings change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsEvent {
    /// The transfer concurrency limit changed.
    ConcurrencyChanged { max_concurrent: usize },
    /// The category table changed (added, renamed path, removed).
    CategoriesChanged,
    /// Some other setting changed.
    ValueChanged { key: String },
}

impl SettingsEvent {
    /// Get a description of the event for logging.
    pub fn description(&self) -> String {
        match self {
            Self::ConcurrencyChanged { max_concurrent } => {
                format!("Concurrency limit changed: {}", max_concurrent)
            }
            Self::CategoriesChanged => "Categories changed".to_string(),
            Self::ValueChanged { key } => format!("Setting changed: {}", key),
        }
    }
}

/// Default channel capacity for settings events.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Broadcaster for settings events.
///
/// Uses tokio's broadcast channel to distribute events to multiple
/// subscribers.
#[derive(Clone)]
pub struct SettingsEventBroadcaster {
    sender: broadcast::Sender<SettingsEvent>,
}

impl SettingsEventBroadcaster {
    /// Create a new broadcaster with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new broadcaster with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to settings events.
    pub fn subscribe(&self) -> broadcast::Receiver<SettingsEvent> {
        self.sender.subscribe()
    }

    /// Publish a settings event.
    ///
    /// Returns the number of receivers; 0 when nobody is subscribed.
    pub fn publish(&self, event: SettingsEvent) -> usize {
        tracing::debug!("Publishing settings event: {}", event.description());
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for SettingsEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
