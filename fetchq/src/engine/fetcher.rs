//! HTTP fetch implementation.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::EngineError;

/// User agent sent with fetch requests.
const USER_AGENT: &str = concat!("fetchq/", env!("CARGO_PKG_VERSION"));

/// Emit a progress update at most every this many bytes.
const PROGRESS_GRANULARITY_BYTES: u64 = 64 * 1024;

/// A fetch assignment.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub destination: PathBuf,
    /// Byte offset to resume from; 0 starts fresh.
    pub resume_from: u64,
}

/// Progress report emitted while fetching.
#[derive(Debug, Clone, Copy)]
pub struct FetchProgress {
    pub bytes_transferred: u64,
    pub bytes_total: Option<u64>,
    /// Set on the first report when the server ignored a resume request and
    /// the fetch restarted from zero.
    pub restarted: bool,
}

/// How a fetch ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The body was written to the destination in full.
    Completed { bytes_total: u64 },
    /// The stop token fired; the partial file is kept on disk.
    Stopped { bytes_transferred: u64 },
}

/// Streams a source URL into a destination file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Run a fetch to completion, stop, or error.
    ///
    /// Progress reports are monotonic in `bytes_transferred`. The `stop`
    /// token is observed at every chunk boundary; stopping keeps the partial
    /// file so a later attempt can resume.
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: mpsc::Sender<FetchProgress>,
        stop: CancellationToken,
    ) -> std::result::Result<FetchOutcome, EngineError>;
}

/// Production fetcher backed by a shared reqwest client.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with no proxy.
    pub fn new() -> std::result::Result<Self, EngineError> {
        Self::with_proxy(None)
    }

    /// Create a fetcher, optionally routing through an HTTP proxy.
    pub fn with_proxy(proxy_url: Option<&str>) -> std::result::Result<Self, EngineError> {
        install_rustls_provider();

        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(url) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(url)?);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

/// Install the process-wide rustls crypto provider.
///
/// The webpki-roots reqwest build ships without a default provider.
fn install_rustls_provider() {
    static PROVIDER_INSTALLED: std::sync::OnceLock<()> = std::sync::OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate may have installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: mpsc::Sender<FetchProgress>,
        stop: CancellationToken,
    ) -> std::result::Result<FetchOutcome, EngineError> {
        let mut http_request = self.client.get(&request.url);
        if request.resume_from > 0 {
            http_request = http_request.header(RANGE, format!("bytes={}-", request.resume_from));
        }

        let response = tokio::select! {
            _ = stop.cancelled() => {
                return Ok(FetchOutcome::Stopped {
                    bytes_transferred: request.resume_from,
                });
            }
            response = http_request.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let (mut offset, bytes_total, mut file) =
            if request.resume_from > 0 && status == StatusCode::PARTIAL_CONTENT {
                let total = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(content_range_total)
                    .or_else(|| {
                        response
                            .content_length()
                            .map(|len| len + request.resume_from)
                    });
                let file = OpenOptions::new()
                    .append(true)
                    .open(&request.destination)
                    .await?;
                (request.resume_from, total, file)
            } else {
                if request.resume_from > 0 {
                    // The server ignored the range request; this source is
                    // not resumable and the fetch restarts from zero.
                    warn!(url = %request.url, "Server ignored range request, restarting from zero");
                }
                let file = File::create(&request.destination).await?;
                (0, response.content_length().filter(|len| *len > 0), file)
            };

        // Initial report so observers see the resume offset (or the reset
        // to zero) before the first chunk lands.
        let _ = progress
            .send(FetchProgress {
                bytes_transferred: offset,
                bytes_total,
                restarted: request.resume_from > 0 && offset == 0,
            })
            .await;

        let mut stream = response.bytes_stream();
        let mut last_reported = offset;

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    file.flush().await?;
                    debug!(url = %request.url, bytes = offset, "Fetch stopped");
                    return Ok(FetchOutcome::Stopped {
                        bytes_transferred: offset,
                    });
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        file.write_all(&bytes).await?;
                        offset += bytes.len() as u64;
                        if offset - last_reported >= PROGRESS_GRANULARITY_BYTES {
                            last_reported = offset;
                            let _ = progress
                                .send(FetchProgress {
                                    bytes_transferred: offset,
                                    bytes_total,
                                    restarted: false,
                                })
                                .await;
                        }
                    }
                    Some(Err(e)) => return Err(EngineError::Http(e)),
                    None => break,
                }
            }
        }

        file.flush().await?;
        let _ = progress
            .send(FetchProgress {
                bytes_transferred: offset,
                bytes_total: Some(offset),
                restarted: false,
            })
            .await;

        Ok(FetchOutcome::Completed { bytes_total: offset })
    }
}

/// Extract the total length from a `Content-Range: bytes a-b/total` header.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}
