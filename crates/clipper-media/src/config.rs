//! Media configuration.

use std::time::Duration;

/// Engine settings shared by direct and queued execution.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// FFmpeg executable name or path
    pub ffmpeg_path: String,
    /// Maximum wall-clock time for one engine run
    pub job_timeout: Duration,
    /// Bytes of stdout/stderr kept per run
    pub output_capture_limit: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            job_timeout: Duration::from_secs(300),
            output_capture_limit: 16 * 1024,
        }
    }
}

impl MediaConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.ffmpeg_path),
            job_timeout: std::env::var("JOB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            output_capture_limit: std::env::var("ENGINE_OUTPUT_CAPTURE_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.output_capture_limit),
        }
    }
}
