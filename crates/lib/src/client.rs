use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dispatch::{self, Core};
use crate::error::SessionError;
use crate::input::{InputSession, POINTER_INPUT_SOCKET_URI};
use crate::pairing::{Manifest, PairingMode, SessionState};
use crate::protocol::Envelope;
use crate::registry::ReplySlot;
use crate::transport::{Connector, DialConfig, Transport, TransportError, WsConnector};

/// Client session with one device.
///
/// All methods take `&self` and may be called from several threads at once;
/// share the session behind an `Arc` to do so. Replies are matched to callers
/// by request id, not by arrival order.
pub struct Tv {
    transport: Arc<dyn Transport>,
    connector: Arc<dyn Connector>,
    core: Arc<Core>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    input: Mutex<Option<InputSession>>,
    manifest: Manifest,
}

impl Tv {
    /// Dial a device by host name or address using `config`
    pub fn dial(host: &str, config: DialConfig) -> Result<Self, SessionError> {
        let url = config.control_url(host);
        Self::connect(&url, WsConnector::new(config))
    }

    /// Open the control socket at `url` and start the dispatch thread.
    /// `connector` is kept for the input socket.
    pub fn connect<C: Connector>(url: &str, connector: C) -> Result<Self, SessionError> {
        let connector: Arc<dyn Connector> = Arc::new(connector);
        let transport: Arc<dyn Transport> = Arc::from(connector.connect(url)?);
        let core = Arc::new(Core::new());

        let dispatcher = dispatch::spawn(transport.clone(), core.clone())
            .map_err(|e| TransportError::Io(format!("failed to spawn dispatch thread: {e}")))?;
        info!(url, "connected");

        Ok(Self {
            transport,
            connector,
            core,
            dispatcher: Mutex::new(Some(dispatcher)),
            input: Mutex::new(None),
            manifest: Manifest::default(),
        })
    }

    /// Replace the manifest sent on registration
    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn state(&self) -> SessionState {
        self.core.pairing().state()
    }

    /// Client key in use once registered
    pub fn client_key(&self) -> Option<String> {
        self.core.pairing().client_key().map(String::from)
    }

    /// Number of requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.core.requests.len()
    }

    /// Register with a previously issued client key
    pub fn register_with_key(&self, key: &str) -> Result<(), SessionError> {
        self.register(PairingMode::Key, Some(key)).map(|_| ())
    }

    /// Register by asking the user to confirm on the device. Blocks until
    /// they answer or the connection drops, and returns the new client key.
    /// Persisting the key is up to the caller.
    pub fn register_with_prompt(&self) -> Result<String, SessionError> {
        self.register(PairingMode::Prompt, None)
    }

    fn register(&self, mode: PairingMode, key: Option<&str>) -> Result<String, SessionError> {
        if self.core.requests.is_closed() {
            return Err(SessionError::ConnectionClosed);
        }
        let id = self.core.requests.next_id();
        let slot = self
            .core
            .pairing()
            .begin(&id, mode, key)
            .map_err(|e| match e {
                SessionError::InvalidState(SessionState::Closed) => SessionError::ConnectionClosed,
                e => e,
            })?;

        let frame = Envelope::register(&id, self.manifest.registration_payload(key));
        if let Err(e) = self.transport.send(&frame.encode()) {
            self.core.pairing().cancel(&id);
            return Err(e.into());
        }
        debug!(%id, ?mode, "registration sent");

        slot.recv().unwrap_or(Err(SessionError::ConnectionClosed))
    }

    /// Send a command and block until its reply arrives
    pub fn command(&self, uri: &str, payload: Option<Value>) -> Result<Value, SessionError> {
        let (_, slot) = self.issue(uri, payload)?;
        slot.recv().unwrap_or(Err(SessionError::ConnectionClosed))
    }

    /// Like [`Tv::command`], but give up after `timeout`. A reply arriving
    /// later is dropped.
    pub fn command_with_timeout(
        &self,
        uri: &str,
        payload: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        let (id, slot) = self.issue(uri, payload)?;
        match slot.recv_timeout(timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                if self.core.requests.cancel(&id) {
                    warn!(%id, uri, "request timed out");
                    Err(SessionError::Timeout)
                } else {
                    // Resolved while we were giving up
                    slot.recv().unwrap_or(Err(SessionError::ConnectionClosed))
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::ConnectionClosed),
        }
    }

    fn issue(&self, uri: &str, payload: Option<Value>) -> Result<(String, ReplySlot), SessionError> {
        if self.core.requests.is_closed() {
            return Err(SessionError::ConnectionClosed);
        }
        if self.state() != SessionState::Registered {
            return Err(SessionError::NotRegistered);
        }

        let (id, slot) = self.core.requests.register()?;
        let frame = Envelope::request(id.as_str(), uri, payload);
        if let Err(e) = self.transport.send(&frame.encode()) {
            self.core.requests.cancel(&id);
            return Err(e.into());
        }
        debug!(%id, uri, "request sent");
        Ok((id, slot))
    }

    /// Press a remote button (e.g. `UP`, `ENTER`, `BACK`). The input socket
    /// is opened on first use and reused afterwards.
    pub fn send_button(&self, name: &str) -> Result<(), SessionError> {
        let mut input = self.input.lock().unwrap_or_else(PoisonError::into_inner);
        let session = match input.take() {
            Some(session) => session,
            None => {
                let reply = self.command(POINTER_INPUT_SOCKET_URI, None)?;
                InputSession::open(self.connector.as_ref(), &reply)?
            }
        };
        let result = session.send_button(name);
        *input = Some(session);
        result
    }

    /// Close the session. Pending calls fail with
    /// [`SessionError::ConnectionClosed`]. Safe to call more than once.
    pub fn close(&self) -> Result<(), SessionError> {
        let closed = self.transport.close();
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = dispatcher {
            let _ = handle.join();
            info!("session closed");
        }
        // No-op when the dispatch thread already shut down
        self.core.shutdown(true);

        // Taken last: a button press may hold this lock while it waits on
        // the control socket, and the shutdown above releases it
        let input = self
            .input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(input) = input {
            input.close();
        }

        closed.map_err(SessionError::from)
    }
}

impl Drop for Tv {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
