//! Audio extraction via an ffmpeg subprocess.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::EngineError;

/// How long to wait for a killed converter to be reaped.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the audio converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConverterConfig {
    /// Path to the ffmpeg binary.
    pub binary_path: String,
    /// Arguments selecting the audio track.
    pub audio_args: Vec<String>,
    /// Extension of the produced audio file.
    pub extension: String,
}

impl Default for AudioConverterConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            audio_args: vec!["-vn".to_string(), "-acodec".to_string(), "copy".to_string()],
            extension: "m4a".to_string(),
        }
    }
}

/// Extracts the audio track of a downloaded video.
pub struct AudioConverter {
    config: AudioConverterConfig,
    version: Option<String>,
}

impl AudioConverter {
    /// Create a converter with default configuration.
    pub fn new() -> Self {
        Self::with_config(AudioConverterConfig::default())
    }

    /// Create with a custom configuration.
    pub fn with_config(config: AudioConverterConfig) -> Self {
        let version = Self::detect_version(&config.binary_path);
        Self { config, version }
    }

    /// Detect the converter binary version.
    fn detect_version(path: &str) -> Option<String> {
        process_utils::std_command(path)
            .arg("-version")
            .output()
            .ok()
            .and_then(|output| {
                String::from_utf8(output.stdout)
                    .ok()
                    .and_then(|s| s.lines().next().map(|l| l.to_string()))
            })
    }

    /// Check if the converter binary exists.
    pub fn is_available(&self) -> bool {
        self.version.is_some()
    }

    /// Get the converter version string.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Audio output path for a video input path.
    pub fn output_path(&self, input: &Path) -> PathBuf {
        input.with_extension(&self.config.extension)
    }

    /// Extract the audio track of `input` into `output`.
    ///
    /// Cancellation kills the subprocess and removes the partial output.
    /// A nonzero exit becomes `EngineError::Conversion` carrying the exit
    /// code and the tail of stderr.
    pub async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), EngineError> {
        let mut command = process_utils::tokio_command(&self.config.binary_path);
        command
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .args(&self.config.audio_args)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(input = %input.display(), output = %output.display(), "Starting audio conversion");
        let mut child = command.spawn()?;

        // Drain stderr concurrently so the child never blocks on a full pipe.
        let mut stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(ref mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = process_utils::kill_and_reap(&mut child, KILL_REAP_TIMEOUT).await {
                    warn!(error = %e, "Failed to kill converter subprocess");
                }
                stderr_task.abort();
                remove_partial(output).await;
                return Err(EngineError::Canceled);
            }
            status = child.wait() => status?,
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            remove_partial(output).await;
            return Err(EngineError::Conversion {
                exit_code: status.code(),
                message: stderr_tail(&stderr),
            });
        }

        Ok(())
    }
}

impl Default for AudioConverter {
    fn default() -> Self {
        Self::new()
    }
}

async fn remove_partial(output: &Path) {
    if let Err(e) = tokio::fs::remove_file(output).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %output.display(), error = %e, "Failed to remove partial conversion output");
    }
}

/// Last non-empty stderr line, or a placeholder.
fn stderr_tail(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("converter produced no diagnostics")
        .to_string()
}
