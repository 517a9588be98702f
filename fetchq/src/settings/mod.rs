//! Durable application settings.
//!
//! Settings are key→JSON rows in the database, fronted by an in-memory cache
//! hydrated at startup. Writes go through the repository and publish a
//! [`SettingsEvent`] so other services can react without polling.

mod events;
mod service;

pub use events::{SettingsEvent, SettingsEventBroadcaster};
pub use service::{SettingsService, keys};
