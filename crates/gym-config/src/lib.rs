//! Shared configuration for the `gymd` simulation daemon.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, then an
//! optional `gymd.toml` file, then `GYMD_*` environment variables, then
//! command-line flags. Every field carries a default so the daemon starts with
//! no configuration at all.

mod defaults;
mod framing;
mod logging;
mod socket;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_LOG_FILTER, DEFAULT_MAX_REQUEST_BYTES,
    DEFAULT_PLAYBACK_BASE_URL, DEFAULT_TCP_HOST, DEFAULT_TCP_PORT, DEFAULT_TRANSCODER,
    default_frame_mode, default_idle_timeout_secs, default_log_filter,
    default_log_filter_string, default_log_format, default_max_request_bytes,
    default_playback_base_url, default_recording_root, default_socket_endpoint,
    default_transcoder,
};
pub use framing::{FrameMode, FrameModeParseError};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "GYMD")]
pub struct Config {
    /// Endpoint clients connect to.
    #[ortho_config(default = default_socket_endpoint())]
    pub listen_socket: SocketEndpoint,
    /// Record delimiting mode for incoming requests.
    #[ortho_config(default = default_frame_mode())]
    pub frame_mode: FrameMode,
    /// Seconds a connection may stay silent before it is torn down.
    #[ortho_config(default = default_idle_timeout_secs())]
    pub idle_timeout_secs: u64,
    /// Largest accepted request record, in bytes.
    #[ortho_config(default = default_max_request_bytes())]
    pub max_request_bytes: usize,
    /// Root directory for per-instance recordings.
    #[ortho_config(default = default_recording_root())]
    pub recording_root: Utf8PathBuf,
    /// Base URL prefixed to exported recording paths.
    #[ortho_config(default = default_playback_base_url())]
    pub playback_base_url: String,
    /// Program invoked to transcode recordings.
    #[ortho_config(default = default_transcoder())]
    pub transcoder: String,
    /// Tracing filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_socket: default_socket_endpoint(),
            frame_mode: default_frame_mode(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_request_bytes: default_max_request_bytes(),
            recording_root: default_recording_root(),
            playback_base_url: default_playback_base_url(),
            transcoder: default_transcoder(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Endpoint the daemon listens on.
    #[must_use]
    pub fn listen_socket(&self) -> &SocketEndpoint {
        &self.listen_socket
    }

    /// Record delimiting mode for incoming requests.
    #[must_use]
    pub fn frame_mode(&self) -> FrameMode {
        self.frame_mode
    }

    /// Per-connection idle timeout.
    ///
    /// A zero value is treated as one second; a socket read timeout of zero
    /// is rejected by the operating system.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }

    /// Largest accepted request record, in bytes.
    #[must_use]
    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    /// Root directory for per-instance recordings.
    #[must_use]
    pub fn recording_root(&self) -> &Utf8Path {
        self.recording_root.as_path()
    }

    /// Base URL prefixed to exported recording paths.
    #[must_use]
    pub fn playback_base_url(&self) -> &str {
        &self.playback_base_url
    }

    /// Program invoked to transcode recordings.
    #[must_use]
    pub fn transcoder(&self) -> &str {
        &self.transcoder
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
