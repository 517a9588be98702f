//! Transfer execution engine.
//!
//! The queue's workers drive three seams defined here: a [`StreamResolver`]
//! turning a stream selection into a fetchable URL, a [`Fetcher`] streaming
//! the source to disk, and an [`AudioConverter`] for the optional
//! post-processing sub-step. Production implementations are `HttpFetcher`
//! (reqwest) and the ffmpeg-based converter; the per-service REST clients sit
//! behind `StreamResolver` and are supplied by the embedding application.

mod convert;
mod error;
mod fetcher;
mod resolver;

pub use convert::{AudioConverter, AudioConverterConfig};
pub use error::EngineError;
pub use fetcher::{FetchOutcome, FetchProgress, FetchRequest, Fetcher, HttpFetcher};
pub use resolver::{ResolvedStream, ResolverRegistry, StreamResolver};
