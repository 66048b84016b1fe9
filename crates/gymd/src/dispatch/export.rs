//! Export of recorded episodes for browser playback.
//!
//! Recordings live under `<recording_root>/<instance_id>`. When that
//! directory holds videos, either episode videos written by the recorder or
//! MP4 captures placed there by other tools, the newest one is transcoded to
//! WebM with an external tool. The client receives the URL the WebM is
//! published at.

use std::fs;
use std::io;
use std::process::{Command, Stdio};
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::registry::InstanceId;
use crate::simulation::VIDEO_EXTENSION;

use super::DISPATCH_TARGET;

/// File name of the transcoded recording.
pub const WEBM_OUTPUT: &str = "output.webm";

const VIDEO_EXTENSIONS: [&str; 2] = [VIDEO_EXTENSION, "mp4"];

/// Errors raised while exporting recordings.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The configured playback base URL is unusable.
    #[error("invalid playback base URL '{base}': {source}")]
    InvalidBaseUrl {
        /// URL text that failed to parse.
        base: String,
        /// Parser failure.
        #[source]
        source: url::ParseError,
    },

    /// The recording directory could not be listed.
    #[error("failed to scan recording directory '{directory}': {source}")]
    Scan {
        /// Directory being scanned.
        directory: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Publishes an instance's recordings and reports where they can be viewed.
#[cfg_attr(test, mockall::automock)]
pub trait RecordingExporter: Send + Sync {
    /// Exports the recordings of `instance`, returning the playback URL.
    ///
    /// # Errors
    ///
    /// Returns an [`ExportError`] when the recordings cannot be inspected or
    /// no playback URL can be formed.
    fn export(&self, instance: &InstanceId) -> Result<Url, ExportError>;
}

/// Exporter that shells out to a video transcoder.
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: String,
    recording_root: Utf8PathBuf,
    base_url: Url,
}

impl Transcoder {
    /// Creates a transcoder running `program` over recordings under
    /// `recording_root`, publishing below `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidBaseUrl`] when `base_url` does not parse.
    pub fn new(
        program: impl Into<String>,
        recording_root: impl Into<Utf8PathBuf>,
        base_url: &str,
    ) -> Result<Self, ExportError> {
        let normalised = if base_url.ends_with('/') {
            base_url.to_owned()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalised).map_err(|source| ExportError::InvalidBaseUrl {
            base: base_url.to_owned(),
            source,
        })?;
        Ok(Self {
            program: program.into(),
            recording_root: recording_root.into(),
            base_url,
        })
    }

    /// URL the transcoded recording of `instance` is published at.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidBaseUrl`] when the joined URL is invalid.
    pub fn playback_url(&self, instance: &InstanceId) -> Result<Url, ExportError> {
        self.base_url
            .join(&format!("{instance}/{WEBM_OUTPUT}"))
            .map_err(|source| ExportError::InvalidBaseUrl {
                base: self.base_url.to_string(),
                source,
            })
    }

    fn transcode(&self, source: &Utf8Path, target: &Utf8Path) {
        let status = Command::new(&self.program)
            .args(["-y", "-i", source.as_str()])
            .args(["-c:v", "libvpx", "-crf", "10", "-b:v", "1M", "-c:a", "libvorbis"])
            .arg(target.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => {
                info!(target: DISPATCH_TARGET, %source, %target, "recording transcoded");
            }
            Ok(status) => {
                warn!(target: DISPATCH_TARGET, %source, %status, "transcoder failed");
            }
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    program = %self.program,
                    %error,
                    "transcoder could not be started"
                );
            }
        }
    }
}

impl RecordingExporter for Transcoder {
    fn export(&self, instance: &InstanceId) -> Result<Url, ExportError> {
        let directory = self.recording_root.join(instance.as_str());
        if let Some(source) = newest_video(&directory)? {
            self.transcode(&source, &directory.join(WEBM_OUTPUT));
        }
        self.playback_url(instance)
    }
}

/// Most recently modified video in `directory`, if any.
fn newest_video(directory: &Utf8Path) -> Result<Option<Utf8PathBuf>, ExportError> {
    let scan_error = |source| ExportError::Scan {
        directory: directory.to_owned(),
        source,
    };
    let entries = match directory.read_dir_utf8() {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(scan_error(error)),
    };

    let mut newest: Option<(SystemTime, Utf8PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(scan_error)?;
        let path = entry.path();
        if !path
            .extension()
            .is_some_and(|extension| VIDEO_EXTENSIONS.contains(&extension))
        {
            continue;
        }
        let modified = fs::metadata(path)
            .and_then(|metadata| metadata.modified())
            .map_err(scan_error)?;
        if newest.as_ref().is_none_or(|(latest, _)| modified > *latest) {
            newest = Some((modified, path.to_owned()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}
