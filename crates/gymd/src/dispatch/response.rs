//! Reply shapes and the writer that frames them.
//!
//! Replies are bare JSON objects whose keys identify the reply kind, for
//! example `{"instance":"…"}` or `{"observation":[…]}`. The one exception is
//! the teardown acknowledgement, which is the literal token `error`.

use std::io::Write;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::framing::FrameWriter;
use crate::registry::InstanceId;
use crate::simulation::{SpaceDescription, Transition, wire_float};

use super::errors::DispatchError;

/// Literal sent after an empty request tore the session down.
pub const ERROR_TOKEN: &[u8] = b"error";

/// JSON replies understood by clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// A new instance was created.
    Instance { instance: InstanceId },
    /// A random member of the action space.
    Sample { sample: Value },
    /// Observation after a reset.
    Observation { observation: Value },
    /// Description of an action or observation space.
    Space { info: SpaceDescription },
    /// Result of one step.
    Step {
        observation: Value,
        reward: f64,
        done: bool,
        info: Map<String, Value>,
    },
    /// Where an exported recording can be watched.
    Url { url: String },
    /// Nothing else to report.
    Ack {},
}

impl Reply {
    /// Builds a step reply, keeping the reward JSON-safe.
    pub fn step(transition: Transition) -> Self {
        let Transition {
            observation,
            reward,
            done,
            info,
        } = transition;
        Self::Step {
            observation,
            reward: wire_float(reward),
            done,
            info,
        }
    }
}

/// Anything the dispatcher may send for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A JSON reply.
    Reply(Reply),
    /// The bare `error` token.
    ErrorToken,
}

impl From<Reply> for Outbound {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}

/// Writer that serialises outbound messages into framed records.
pub struct ResponseWriter<W> {
    frames: FrameWriter<W>,
}

impl<W: Write> ResponseWriter<W> {
    /// Creates a response writer over the given stream.
    pub fn new(writer: W) -> Self {
        Self {
            frames: FrameWriter::new(writer),
        }
    }

    /// Writes one outbound message at the given compression level.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or the write fails.
    pub fn write(&mut self, outbound: &Outbound, level: u32) -> Result<(), DispatchError> {
        match outbound {
            Outbound::Reply(reply) => {
                let payload = serde_json::to_vec(reply).map_err(DispatchError::SerializeReply)?;
                self.frames.write_record(&payload, level)?;
            }
            Outbound::ErrorToken => self.frames.write_record(ERROR_TOKEN, level)?,
        }
        Ok(())
    }
}
