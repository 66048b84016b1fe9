use camino::Utf8PathBuf;
use std::env;

use crate::framing::FrameMode;
use crate::socket::SocketEndpoint;

/// Default TCP host the daemon listens on.
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";

/// Default TCP port the daemon listens on.
pub const DEFAULT_TCP_PORT: u16 = 4040;

/// Default idle read timeout applied to each connection, in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 1200;

/// Default upper bound on a single request record.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Default base URL under which exported recordings are published.
pub const DEFAULT_PLAYBACK_BASE_URL: &str = "http://127.0.0.1/recordings/";

/// Default external tool used to transcode recordings.
pub const DEFAULT_TRANSCODER: &str = "ffmpeg";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Computes the default listening endpoint for the daemon.
pub fn default_socket_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp(DEFAULT_TCP_HOST, DEFAULT_TCP_PORT)
}

/// Default record delimiting mode.
pub fn default_frame_mode() -> FrameMode {
    FrameMode::Blank
}

/// Default idle timeout, in seconds.
pub fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

/// Default request size ceiling, in bytes.
pub fn default_max_request_bytes() -> usize {
    DEFAULT_MAX_REQUEST_BYTES
}

/// Owned playback base URL.
pub fn default_playback_base_url() -> String {
    DEFAULT_PLAYBACK_BASE_URL.to_string()
}

/// Owned transcoder program name.
pub fn default_transcoder() -> String {
    DEFAULT_TRANSCODER.to_string()
}

/// Directory under which per-instance recordings are written.
pub fn default_recording_root() -> Utf8PathBuf {
    let mut base = Utf8PathBuf::from_path_buf(env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    base.push("gymd");
    base.push("recordings");
    base
}
