//! In-memory transport standing in for the peer in unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use crate::protocol::Envelope;
use crate::transport::{Connector, Transport, TransportError};

const PEER_WAIT: Duration = Duration::from_secs(5);

pub(crate) struct MockTransport {
    inbound: Mutex<Receiver<Option<String>>>,
    loopback: Sender<Option<String>>,
    outbound: Sender<String>,
    closed: AtomicBool,
}

/// The far end of a [`MockTransport`]
pub(crate) struct MockPeer {
    to_client: Sender<Option<String>>,
    from_client: Receiver<String>,
}

pub(crate) fn mock_pair() -> (MockTransport, MockPeer) {
    let (to_client, inbound) = mpsc::channel();
    let (outbound, from_client) = mpsc::channel();
    let transport = MockTransport {
        inbound: Mutex::new(inbound),
        loopback: to_client.clone(),
        outbound,
        closed: AtomicBool::new(false),
    };
    (
        transport,
        MockPeer {
            to_client,
            from_client,
        },
    )
}

impl Transport for MockTransport {
    fn send(&self, text: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(text.to_string())
            .map_err(|_| TransportError::Closed)
    }

    fn receive(&self) -> Result<Option<String>, TransportError> {
        match self.inbound.lock().unwrap().recv() {
            Ok(frame) => Ok(frame),
            Err(_) => Ok(None),
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.loopback.send(None);
        Ok(())
    }
}

impl MockPeer {
    /// Next raw text frame written by the client
    pub fn recv_text(&self) -> String {
        self.from_client
            .recv_timeout(PEER_WAIT)
            .expect("client did not send a frame")
    }

    /// Next envelope written by the client
    pub fn recv(&self) -> Envelope {
        Envelope::decode(&self.recv_text()).expect("client sent a malformed frame")
    }

    pub fn send(&self, frame: Value) {
        self.send_raw(&frame.to_string());
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.to_client.send(Some(text.to_string()));
    }

    /// Answer `req` with a response frame echoing its id
    pub fn reply(&self, req: &Envelope, payload: Value) {
        self.send(json!({"id": req.id, "type": "response", "payload": payload}));
    }

    /// Close the connection from the peer side
    pub fn hang_up(&self) {
        let _ = self.to_client.send(None);
    }

    /// Accept the next registration request
    pub fn accept_registration(&self, key: &str) -> Envelope {
        let req = self.recv();
        self.send(json!({"id": req.id, "type": "registered", "payload": {"client-key": key}}));
        req
    }
}

/// Hands out queued mock transports and records every URL dialled
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    transports: Arc<Mutex<VecDeque<MockTransport>>>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, transport: MockTransport) {
        self.transports.lock().unwrap().push_back(transport);
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.urls.lock().unwrap().push(url.to_string());
        match self.transports.lock().unwrap().pop_front() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(TransportError::Connect(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no mock transport queued",
            ))),
        }
    }
}
