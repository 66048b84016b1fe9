//! Connection handler that runs one simulation session per connection.
//!
//! The listener hands every accepted stream to [`SessionConnectionHandler`],
//! which splits it into a framed reader and a reply writer and drives a
//! [`Session`] until the client leaves or the session ends.

use std::sync::Arc;
use std::time::Duration;

use gym_config::{Config, FrameMode};
use tracing::{debug, warn};

use crate::framing::FrameReader;
use crate::transport::{ConnectionHandler, ConnectionStream};

use super::DISPATCH_TARGET;
use super::probes::Dispatcher;
use super::session::Session;

/// Connection handler that serves the simulation protocol.
#[derive(Debug)]
pub struct SessionConnectionHandler {
    dispatcher: Arc<Dispatcher>,
    frame_mode: FrameMode,
    idle_timeout: Duration,
    max_request_bytes: usize,
}

impl SessionConnectionHandler {
    /// Creates a handler using the framing and timeout settings in `config`.
    pub fn new(dispatcher: Arc<Dispatcher>, config: &Config) -> Self {
        Self {
            dispatcher,
            frame_mode: config.frame_mode(),
            idle_timeout: config.idle_timeout(),
            max_request_bytes: config.max_request_bytes(),
        }
    }

    fn serve(&self, stream: ConnectionStream) {
        let peer = stream.peer();
        if let Err(error) = stream.set_read_timeout(Some(self.idle_timeout)) {
            warn!(target: DISPATCH_TARGET, %peer, %error, "failed to set idle timeout");
            return;
        }
        let writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %peer, %error, "failed to split connection");
                return;
            }
        };

        debug!(target: DISPATCH_TARGET, %peer, "session started");
        let reader = FrameReader::new(stream, self.frame_mode, self.max_request_bytes);
        let session = Session::new(reader, writer, Arc::clone(self.dispatcher.registry()));
        let end = session.run(&self.dispatcher);
        debug!(target: DISPATCH_TARGET, %peer, %end, "session finished");
    }
}

impl ConnectionHandler for SessionConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        self.serve(stream);
    }
}
