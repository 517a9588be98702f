//! Resolution of video service URLs into resource triples.
//!
//! A [`Resource`] identifies an entity on a video service by
//! `{service, kind, id}`. The [`Resolver`] turns a raw URL into a resource
//! using a fixed table of built-in service patterns (youtube, dailymotion,
//! vimeo) followed by plugin-declared pattern tables registered in a
//! [`PluginRegistry`].
//!
//! Resolution is pure and side-effect free: the pattern tables are built once
//! and never mutated, so a `Resolver` can be shared freely across threads.

pub mod error;
pub mod plugins;
pub mod resolver;
pub mod resource;

pub use error::PatternError;
pub use plugins::{PluginRegistry, ResourcePlugin};
pub use resolver::Resolver;
pub use resource::{Resource, ResourceKind};
