//! Request dispatch for simulation sessions.
//!
//! Each connection is served by a [`Session`] that reads framed request
//! records, hands them to the [`Dispatcher`], and writes the resulting
//! replies back at the session's current compression level.
//!
//! ## Protocol
//!
//! A request record is a JSON object. Commands are recognised by the keys
//! present, and a single record may carry several of them:
//!
//! ```json
//! {"env":{"name":"CartPole-v0"}}
//! {"env":{"action":"reset"}}
//! {"step":{"action":0,"render":1}}
//! {"url":1,"monitor":{"action":"start","force":1}}
//! ```
//!
//! The dispatcher evaluates a fixed table of probes in order against every
//! record. Each matching probe may emit one reply and may end the session.
//! A record that produces no reply is acknowledged with `{}`. An empty record
//! tears down every instance the session created and replies with the bare
//! token `error`.
//!
//! Replies are terminated by `\r\n\r\n`. Once a client negotiates a non-zero
//! compression level, reply payloads are zlib-compressed before the
//! terminator is appended.

mod errors;
mod export;
mod handler;
mod probes;
mod request;
mod response;
mod session;

pub use self::errors::{DispatchError, FaultKind};
pub use self::export::{ExportError, RecordingExporter, Transcoder};
pub use self::probes::{DispatchOutcome, Dispatcher};
pub use self::response::{Outbound, Reply};
pub use self::session::{Session, SessionEnd, SessionState};

pub(crate) use self::handler::SessionConnectionHandler;

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
