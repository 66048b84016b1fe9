//! BDD test world for session scenarios: a live listener and its clients.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use flate2::read::ZlibDecoder;
use serde_json::Value;
use tempfile::TempDir;

use gym_config::{Config, SocketEndpoint};

use crate::dispatch::{Dispatcher, SessionConnectionHandler, Transcoder};
use crate::framing::RECORD_TERMINATOR;
use crate::registry::Registry;
use crate::simulation::BuiltinEngine;
use crate::transport::{ListenerHandle, SocketListener};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// One connected client.
pub struct Client {
    stream: TcpStream,
    last_reply: Option<Vec<u8>>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect client");
        stream
            .set_read_timeout(Some(CLIENT_TIMEOUT))
            .expect("client read timeout");
        Self {
            stream,
            last_reply: None,
        }
    }

    /// Sends one record followed by the blank-line terminator.
    pub fn send(&mut self, record: &str) {
        let mut framed = record.as_bytes().to_vec();
        framed.extend_from_slice(RECORD_TERMINATOR);
        self.stream.write_all(&framed).expect("write request");
        self.stream.flush().expect("flush request");
    }

    /// Sends a record and stores the reply payload.
    pub fn exchange(&mut self, record: &str) {
        self.send(record);
        self.last_reply = Some(self.read_payload());
    }

    fn read_payload(&mut self) -> Vec<u8> {
        let mut payload = Vec::new();
        let mut byte = [0_u8; 1];
        while !payload.ends_with(RECORD_TERMINATOR) {
            let read = self.stream.read(&mut byte).expect("read reply");
            assert_ne!(read, 0, "connection closed before a reply arrived");
            payload.push(byte[0]);
        }
        payload.truncate(payload.len() - RECORD_TERMINATOR.len());
        payload
    }

    /// Raw bytes of the last reply.
    pub fn last_payload(&self) -> &[u8] {
        self.last_reply.as_deref().expect("no reply recorded")
    }

    /// Last reply decoded as JSON.
    pub fn last_json(&self) -> Value {
        serde_json::from_slice(self.last_payload()).expect("reply should be JSON")
    }

    /// Last reply inflated and decoded as JSON.
    pub fn last_compressed_json(&self) -> Value {
        let mut inflated = Vec::new();
        ZlibDecoder::new(self.last_payload())
            .read_to_end(&mut inflated)
            .expect("reply should be zlib compressed");
        serde_json::from_slice(&inflated).expect("inflated reply should be JSON")
    }

    /// Whether the daemon closed the connection without sending more data.
    pub fn is_closed(&mut self) -> bool {
        let mut byte = [0_u8; 1];
        match self.stream.read(&mut byte) {
            Ok(0) => true,
            Ok(_) => false,
            Err(error) if error.kind() == io::ErrorKind::ConnectionReset => true,
            Err(_) => false,
        }
    }
}

/// Scenario world holding a running listener and its clients.
pub struct SessionWorld {
    registry: Arc<Registry>,
    listener: Option<ListenerHandle>,
    address: Option<SocketAddr>,
    clients: Vec<Client>,
    recordings: TempDir,
}

impl SessionWorld {
    fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new(Arc::new(BuiltinEngine::new()))),
            listener: None,
            address: None,
            clients: Vec::new(),
            recordings: TempDir::new().expect("temp dir"),
        }
    }

    /// Starts a TCP listener serving sessions with the given idle timeout.
    pub fn start(&mut self, idle_timeout_secs: u64) {
        let root = Utf8PathBuf::from_path_buf(self.recordings.path().to_path_buf())
            .expect("utf8 recordings path");
        let config = Config {
            listen_socket: SocketEndpoint::tcp("127.0.0.1", 0),
            idle_timeout_secs,
            recording_root: root.clone(),
            ..Config::default()
        };
        let exporter = Transcoder::new(
            "gymd-test-missing-transcoder",
            root.clone(),
            config.playback_base_url(),
        )
        .expect("default base url");
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.registry),
            Arc::new(exporter),
            root,
        ));
        let handler = Arc::new(SessionConnectionHandler::new(dispatcher, &config));
        let listener = SocketListener::bind(config.listen_socket()).expect("bind listener");
        self.address = listener.local_addr();
        self.listener = Some(listener.start(handler).expect("start listener"));
    }

    /// Connects a new client and returns its index.
    pub fn connect(&mut self) -> usize {
        let addr = self.address.expect("listener address should be set");
        self.clients.push(Client::connect(addr));
        self.clients.len() - 1
    }

    /// Client by index, connecting clients on demand.
    pub fn client(&mut self, index: usize) -> &mut Client {
        while self.clients.len() <= index {
            self.connect();
        }
        &mut self.clients[index]
    }

    /// Waits until the registry is empty or the deadline passes.
    pub fn wait_for_empty_registry(&self) -> bool {
        let deadline = Instant::now() + CLIENT_TIMEOUT;
        while Instant::now() < deadline {
            if self.registry.is_empty() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Drop for SessionWorld {
    fn drop(&mut self) {
        self.clients.clear();
        if let Some(handle) = self.listener.take() {
            handle.shutdown();
            let _ = handle.join();
        }
    }
}

/// Default session world fixture.
#[must_use]
pub fn session_world() -> RefCell<SessionWorld> {
    RefCell::new(SessionWorld::new())
}
