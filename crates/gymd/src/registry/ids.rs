//! Instance identifiers.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Number of hex characters kept from a v4 UUID.
pub const INSTANCE_ID_LEN: usize = 13;

/// Opaque identifier of a registered simulation instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wraps a raw identifier, typically one received from a client.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrows the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Source of candidate identifiers.
///
/// The registry checks candidates against live instances, so generators need
/// not guarantee uniqueness.
pub trait IdGenerator: Send + Sync {
    /// Produces the next candidate identifier.
    fn next_id(&self) -> InstanceId;
}

/// Generates identifiers from random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> InstanceId {
        let mut text = Uuid::new_v4().simple().to_string();
        text.truncate(INSTANCE_ID_LEN);
        InstanceId(text)
    }
}
