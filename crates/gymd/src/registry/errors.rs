//! Registry failures.

use thiserror::Error;

use crate::simulation::EngineError;

use super::InstanceId;

/// Errors raised by [`super::Registry`] operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The engine refused to create the requested simulation.
    #[error("cannot create simulation '{name}': {source}")]
    InvalidEnvironment {
        /// Simulation name supplied by the client.
        name: String,
        /// Engine failure.
        #[source]
        source: EngineError,
    },

    /// No live instance is registered under this identifier.
    #[error("unknown instance '{id}'")]
    UnknownInstance {
        /// Identifier that failed to resolve.
        id: InstanceId,
    },

    /// Identifier generation kept colliding with live instances.
    #[error("could not allocate a unique instance id after {attempts} attempts")]
    IdentifierExhausted {
        /// Number of attempts made.
        attempts: usize,
    },

    /// A registry lock was poisoned by a panicking thread.
    #[error("registry lock poisoned")]
    Poisoned,
}

impl RegistryError {
    pub(crate) fn unknown(id: &InstanceId) -> Self {
        Self::UnknownInstance { id: id.clone() }
    }
}
