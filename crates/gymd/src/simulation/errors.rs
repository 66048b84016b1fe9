//! Errors raised by simulation engines and recording wrappers.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Failures surfaced by the simulation facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine does not know a simulation by this name.
    #[error("unknown simulation '{name}'")]
    UnknownSimulation {
        /// Name requested by the client.
        name: String,
    },

    /// The action could not be interpreted in the instance's action space.
    #[error("invalid action: {message}")]
    InvalidAction {
        /// Human-readable reason.
        message: String,
    },

    /// A step was attempted before the episode was reset.
    #[error("simulation must be reset before stepping")]
    NeedsReset,

    /// Recording files could not be read or written.
    #[error("recording I/O failed at '{path}': {source}")]
    RecordingIo {
        /// File or directory involved.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Recording trajectories could not be serialised.
    #[error("failed to serialise recording: {0}")]
    RecordingSerialise(#[from] serde_json::Error),

    /// The recording directory already holds a recording.
    #[error(
        "recording directory '{directory}' already holds recordings; pass force or resume"
    )]
    RecordingExists {
        /// Directory that already holds recordings.
        directory: Utf8PathBuf,
    },

    /// The instance is already being recorded.
    #[error("instance is already being recorded into '{directory}'")]
    AlreadyRecording {
        /// Directory receiving the active recording.
        directory: Utf8PathBuf,
    },

    /// The instance is not being recorded.
    #[error("instance is not being recorded")]
    NotRecording,
}

impl EngineError {
    /// Creates an unknown simulation error.
    pub fn unknown_simulation(name: impl Into<String>) -> Self {
        Self::UnknownSimulation { name: name.into() }
    }

    /// Creates an invalid action error.
    pub fn invalid_action(message: impl Into<String>) -> Self {
        Self::InvalidAction {
            message: message.into(),
        }
    }

    /// Creates a recording IO error for the given path.
    pub fn recording_io(path: impl Into<Utf8PathBuf>, source: io::Error) -> Self {
        Self::RecordingIo {
            path: path.into(),
            source,
        }
    }
}
