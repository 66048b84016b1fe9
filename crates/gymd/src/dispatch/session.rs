//! Per-connection session state and the request loop that drives it.
//!
//! Each connection owns one [`SessionState`]; nothing in it is shared with
//! other connections. Instances a session creates are tracked by an
//! [`OwnedInstances`] guard which closes whatever is still registered when
//! the session ends, however it ends.

use std::io::{Read, Write};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::framing::{FrameError, FrameReader, MAX_COMPRESSION_LEVEL};
use crate::registry::{InstanceId, Registry};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;
use super::probes::Dispatcher;
use super::response::ResponseWriter;

/// Instances created by one session.
///
/// Dropping the guard closes every instance it still owns.
pub struct OwnedInstances {
    registry: Arc<Registry>,
    ids: Vec<InstanceId>,
}

impl OwnedInstances {
    /// Creates an empty guard over `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            ids: Vec::new(),
        }
    }

    /// Takes ownership of `id`.
    pub fn adopt(&mut self, id: InstanceId) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    /// Gives up ownership of `id` without closing it.
    pub fn release(&mut self, id: &InstanceId) -> bool {
        let before = self.ids.len();
        self.ids.retain(|owned| owned != id);
        self.ids.len() != before
    }

    /// Whether `id` is owned.
    pub fn contains(&self, id: &InstanceId) -> bool {
        self.ids.contains(id)
    }

    /// Owned identifiers, oldest first.
    pub fn ids(&self) -> &[InstanceId] {
        &self.ids
    }

    /// Closes every owned instance now, returning how many were live.
    pub fn close_all(&mut self) -> usize {
        let closed = self.registry.close_many(&self.ids);
        self.ids.clear();
        closed
    }
}

impl Drop for OwnedInstances {
    fn drop(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        let owned = self.ids.len();
        let closed = self.close_all();
        debug!(target: DISPATCH_TARGET, owned, closed, "session instances released");
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for the next record.
    AwaitingRequest,
    /// Dispatching a record.
    Processing,
    /// Tearing down.
    Closing,
}

/// Mutable state of one connection.
pub struct SessionState {
    active_instance: Option<InstanceId>,
    compression_level: u32,
    pending_close: bool,
    phase: SessionPhase,
    owned: OwnedInstances,
}

impl SessionState {
    /// Fresh state for a new connection.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            active_instance: None,
            compression_level: 0,
            pending_close: false,
            phase: SessionPhase::AwaitingRequest,
            owned: OwnedInstances::new(registry),
        }
    }

    /// Instance targeted by instance commands, if one was selected.
    pub fn active_instance(&self) -> Option<&InstanceId> {
        self.active_instance.as_ref()
    }

    /// The active instance, or an error when the session has none.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoActiveInstance`] before any instance was
    /// selected.
    pub fn require_active(&self) -> Result<&InstanceId, DispatchError> {
        self.active_instance
            .as_ref()
            .ok_or(DispatchError::NoActiveInstance)
    }

    /// Makes `id` the active instance and takes ownership of it.
    pub fn activate(&mut self, id: InstanceId) {
        self.owned.adopt(id.clone());
        self.active_instance = Some(id);
    }

    /// Clears the active instance and releases its ownership.
    pub fn deactivate(&mut self) -> Option<InstanceId> {
        let id = self.active_instance.take()?;
        self.owned.release(&id);
        Some(id)
    }

    /// Current reply compression level; zero sends plain text.
    pub fn compression_level(&self) -> u32 {
        self.compression_level
    }

    /// Sets the reply compression level, clamped to the zlib maximum.
    pub fn set_compression_level(&mut self, level: u32) {
        self.compression_level = level.min(MAX_COMPRESSION_LEVEL);
    }

    /// Whether the connection closes after the current record.
    pub fn pending_close(&self) -> bool {
        self.pending_close
    }

    /// Asks for the connection to close once the current record is done.
    pub fn mark_pending_close(&mut self) {
        self.pending_close = true;
    }

    /// Where the session is in its request cycle.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
    }

    /// Instances this session created and still owns.
    pub fn owned(&self) -> &OwnedInstances {
        &self.owned
    }

    /// Closes every owned instance and forgets the active one.
    pub fn release_all(&mut self) -> usize {
        self.active_instance = None;
        self.owned.close_all()
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionEnd {
    /// The peer closed the stream.
    PeerClosed,
    /// The client asked to close its instance.
    ClientClose,
    /// The client sent an empty record.
    EmptyRecord,
    /// A previous command requested closing after its reply.
    PendingClose,
    /// No record arrived within the idle timeout.
    IdleTimeout,
    /// The client sent a record that could not be framed.
    MalformedFraming,
    /// Reading or writing the socket failed.
    TransportFault,
    /// Closing an instance failed.
    TeardownFault,
}

/// One connection's request loop.
pub struct Session<R, W> {
    reader: FrameReader<R>,
    writer: ResponseWriter<W>,
    state: SessionState,
}

impl<R: Read, W: Write> Session<R, W> {
    /// Creates a session reading records from `reader` and replying on
    /// `writer`.
    pub fn new(reader: FrameReader<R>, writer: W, registry: Arc<Registry>) -> Self {
        Self {
            reader,
            writer: ResponseWriter::new(writer),
            state: SessionState::new(registry),
        }
    }

    /// Serves records until the session ends, then releases owned instances.
    pub fn run(mut self, dispatcher: &Dispatcher) -> SessionEnd {
        let end = self.serve(dispatcher);
        self.state.set_phase(SessionPhase::Closing);
        let released = self.state.release_all();
        info!(target: DISPATCH_TARGET, %end, released, "session closed");
        end
    }

    fn serve(&mut self, dispatcher: &Dispatcher) -> SessionEnd {
        loop {
            self.state.set_phase(SessionPhase::AwaitingRequest);
            let record = match self.reader.read_record() {
                Ok(Some(record)) => record,
                Ok(None) => return SessionEnd::PeerClosed,
                Err(error) => return frame_failure(&error),
            };

            self.state.set_phase(SessionPhase::Processing);
            let outcome = dispatcher.dispatch(&record, &mut self.state);
            for outbound in &outcome.outbound {
                if let Err(error) = self
                    .writer
                    .write(outbound, self.state.compression_level())
                {
                    warn!(target: DISPATCH_TARGET, %error, "failed to write reply");
                    return SessionEnd::TransportFault;
                }
            }

            if let Some(end) = outcome.end {
                return end;
            }
            if self.state.pending_close() {
                return SessionEnd::PendingClose;
            }
        }
    }
}

fn frame_failure(error: &FrameError) -> SessionEnd {
    match error {
        FrameError::IdleTimeout => {
            debug!(target: DISPATCH_TARGET, "session idle timeout");
            SessionEnd::IdleTimeout
        }
        FrameError::Io(error) => {
            debug!(target: DISPATCH_TARGET, %error, "session transport failure");
            SessionEnd::TransportFault
        }
        FrameError::TooLarge { .. } | FrameError::Encoding(_) => {
            warn!(target: DISPATCH_TARGET, %error, "malformed framing");
            SessionEnd::MalformedFraming
        }
    }
}
