//! Error types for request dispatch failures.
//!
//! Every failure maps onto a small client-facing taxonomy, see
//! [`FaultKind`]. Faults never reach the client as text: the dispatcher logs
//! them and acknowledges the record instead.

use std::io;

use thiserror::Error;

use crate::framing::FrameError;
use crate::registry::{InstanceId, RegistryError};
use crate::simulation::EngineError;

use super::export::ExportError;

/// Client-facing classification of a dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FaultKind {
    /// The requested simulation name was rejected.
    InvalidEnvironment,
    /// The referenced instance does not exist.
    UnknownInstance,
    /// The request could not be understood.
    MalformedRequest,
    /// Reading or writing the connection failed.
    TransportFault,
    /// The engine failed while serving a valid request.
    EngineFault,
}

/// Errors surfaced while handling one request record.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The record is not a JSON object or a field has the wrong shape.
    #[error("malformed request: {message}")]
    MalformedRequest {
        /// What was wrong with the record.
        message: String,
        /// JSON parse failure, when one caused the rejection.
        #[source]
        source: Option<serde_json::Error>,
    },

    /// A command needs an active instance but the session has none.
    #[error("no active instance for this session")]
    NoActiveInstance,

    /// The registry refused the operation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The simulation failed.
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),

    /// Exporting a recording failed.
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Closing an owned instance failed; the connection must close.
    #[error("failed to tear down instance '{id}': {source}")]
    Teardown {
        /// Instance that could not be closed.
        id: InstanceId,
        /// Registry failure raised by the close.
        #[source]
        source: RegistryError,
    },

    /// Framing failed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Serialising a reply failed.
    #[error("failed to serialise reply: {0}")]
    SerializeReply(#[source] serde_json::Error),

    /// Socket setup failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DispatchError {
    /// Creates a malformed request error from a serde error.
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::MalformedRequest {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a malformed request error with a custom message.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a teardown error.
    pub fn teardown(id: &InstanceId, source: RegistryError) -> Self {
        Self::Teardown {
            id: id.clone(),
            source,
        }
    }

    /// Classifies the error for logs and tests.
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::MalformedRequest { .. } => FaultKind::MalformedRequest,
            Self::NoActiveInstance => FaultKind::UnknownInstance,
            Self::Registry(error) => match error {
                RegistryError::InvalidEnvironment { .. } => FaultKind::InvalidEnvironment,
                RegistryError::UnknownInstance { .. } => FaultKind::UnknownInstance,
                RegistryError::IdentifierExhausted { .. } | RegistryError::Poisoned => {
                    FaultKind::EngineFault
                }
            },
            Self::Engine(EngineError::InvalidAction { .. }) => FaultKind::MalformedRequest,
            Self::Engine(_) | Self::Export(_) | Self::Teardown { .. } => FaultKind::EngineFault,
            Self::Frame(_) | Self::SerializeReply(_) | Self::Io(_) => FaultKind::TransportFault,
        }
    }

    /// Whether the connection must close after this error.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            Self::Teardown { .. } | Self::Frame(_) | Self::SerializeReply(_) | Self::Io(_)
        )
    }
}
