//! fetchq library crate.
//!
//! A concurrent, resumable download queue for video services: resolve a URL
//! or stream selection, queue the transfer, fetch it under a concurrency
//! bound, optionally extract the audio track, and keep the whole history in
//! a durable store.

pub mod database;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod queue;
pub mod services;
pub mod settings;

pub use error::{Error, Result};
