//! Test helpers for the transport module.

use std::io::Write;
use std::sync::{Arc, Mutex};

use super::{ConnectionHandler, ConnectionStream};

/// Greets every peer with an acknowledgement frame and records its address.
#[derive(Default)]
pub(crate) struct GreetingHandler {
    peers: Mutex<Vec<String>>,
}

impl GreetingHandler {
    pub(crate) const GREETING: &'static [u8] = b"{}\r\n\r\n";

    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn served(&self) -> usize {
        self.peers().len()
    }

    pub(crate) fn peers(&self) -> Vec<String> {
        self.peers
            .lock()
            .map(|peers| peers.clone())
            .unwrap_or_default()
    }
}

impl ConnectionHandler for GreetingHandler {
    fn handle(&self, mut stream: ConnectionStream) {
        let peer = stream.peer();
        // Peers that hang up early still count as served.
        let _ = stream.write_all(Self::GREETING).and_then(|()| stream.flush());
        if let Ok(mut peers) = self.peers.lock() {
            peers.push(peer);
        }
    }
}
