//! Pairing / registration handshake
//!
//! A registration request gets up to two replies on the same logical call:
//! an optional `response` acknowledging that the peer is showing a
//! confirmation prompt, then a `registered` frame with the client key (or an
//! `error` frame if the key or the user refused). At most one pairing
//! operation is in flight per session, so a `registered` frame without an id
//! is attributed to that operation.

use std::sync::mpsc::{self, Receiver, SyncSender};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::SessionError;
use crate::protocol::{Envelope, FrameKind};

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No socket
    Disconnected,
    /// Socket open, registration not started
    Connecting,
    /// Registration sent, waiting for the first reply
    AwaitingRegistration,
    /// Peer is asking the user to confirm on screen
    AwaitingUserPrompt,
    /// Commands may be issued
    Registered,
    /// Socket closed cleanly
    Closed,
    /// Registration refused or socket failed
    Failed,
}

impl SessionState {
    /// Whether a registration call may start from this state
    pub fn can_register(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Connecting)
    }
}

/// How the in-flight registration was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PairingMode {
    Prompt,
    Key,
}

/// Application manifest sent with every registration request.
///
/// The peer shows `app_name` in its confirmation prompt and grants the
/// listed permissions to the issued key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub manifest_version: u32,
    pub app_version: String,
    #[serde(skip)]
    pub app_name: String,
    pub permissions: Vec<String>,
}

const DEFAULT_PERMISSIONS: &[&str] = &[
    "LAUNCH",
    "LAUNCH_WEBAPP",
    "APP_TO_APP",
    "CLOSE",
    "TEST_OPEN",
    "TEST_PROTECTED",
    "CONTROL_AUDIO",
    "CONTROL_DISPLAY",
    "CONTROL_INPUT_JOYSTICK",
    "CONTROL_INPUT_MEDIA_RECORDING",
    "CONTROL_INPUT_MEDIA_PLAYBACK",
    "CONTROL_INPUT_TV",
    "CONTROL_INPUT_TEXT",
    "CONTROL_MOUSE_AND_KEYBOARD",
    "CONTROL_POWER",
    "READ_APP_STATUS",
    "READ_CURRENT_CHANNEL",
    "READ_INPUT_DEVICE_LIST",
    "READ_INSTALLED_APPS",
    "READ_NETWORK_STATE",
    "READ_RUNNING_APPS",
    "READ_TV_CHANNEL_LIST",
    "WRITE_NOTIFICATION_TOAST",
    "READ_POWER_STATE",
    "READ_COUNTRY_INFO",
];

impl Default for Manifest {
    fn default() -> Self {
        Self {
            manifest_version: 1,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            app_name: "ssapctl".to_string(),
            permissions: DEFAULT_PERMISSIONS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl Manifest {
    /// Registration payload, with `client-key` only when reusing a key
    pub fn registration_payload(&self, client_key: Option<&str>) -> Value {
        let mut manifest = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = manifest.as_object_mut() {
            obj.insert(
                "signed".into(),
                json!({ "localizedAppNames": { "": self.app_name } }),
            );
        }

        let mut payload = json!({
            "forcePairing": false,
            "pairingType": "PROMPT",
            "manifest": manifest,
        });
        if let (Some(key), Some(obj)) = (client_key, payload.as_object_mut()) {
            obj.insert("client-key".into(), Value::String(key.to_string()));
        }
        payload
    }
}

pub(crate) type PairingReply = Result<String, SessionError>;

struct PairingOp {
    id: String,
    mode: PairingMode,
    offered_key: Option<String>,
    slot: SyncSender<PairingReply>,
}

/// Pairing state machine. Owned by the session behind a lock shared with
/// the dispatch thread.
pub(crate) struct Pairing {
    state: SessionState,
    in_flight: Option<PairingOp>,
    client_key: Option<String>,
}

impl Pairing {
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            in_flight: None,
            client_key: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_key(&self) -> Option<&str> {
        self.client_key.as_deref()
    }

    /// Start a pairing operation under request `id`. The returned receiver
    /// resolves with the client key once the peer registers us.
    pub fn begin(
        &mut self,
        id: &str,
        mode: PairingMode,
        offered_key: Option<&str>,
    ) -> Result<Receiver<PairingReply>, SessionError> {
        if !self.state.can_register() || self.in_flight.is_some() {
            return Err(SessionError::InvalidState(self.state));
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.in_flight = Some(PairingOp {
            id: id.to_string(),
            mode,
            offered_key: offered_key.map(String::from),
            slot: tx,
        });
        self.state = SessionState::AwaitingRegistration;
        Ok(rx)
    }

    /// Whether `env` belongs to the in-flight pairing operation
    pub fn claims(&self, env: &Envelope) -> bool {
        let Some(op) = &self.in_flight else {
            return false;
        };
        match &env.id {
            Some(id) => *id == op.id,
            None => matches!(
                env.kind,
                FrameKind::Prompt | FrameKind::Registered | FrameKind::Error
            ),
        }
    }

    /// Advance the state machine with a claimed frame
    pub fn handle(&mut self, env: Envelope) {
        let Some(op) = self.in_flight.take() else {
            return;
        };

        match env.kind {
            FrameKind::Registered => {
                let key = env.payload_text("client-key").or(op.offered_key);
                match key {
                    Some(key) => {
                        info!(mode = ?op.mode, "registered with peer");
                        self.state = SessionState::Registered;
                        self.client_key = Some(key.clone());
                        let _ = op.slot.send(Ok(key));
                    }
                    None => {
                        self.state = SessionState::Failed;
                        let _ = op.slot.send(Err(SessionError::UnexpectedPayload(
                            "registered frame without client-key".into(),
                        )));
                    }
                }
            }
            FrameKind::Error => {
                let details = env.rejection().unwrap_or_default();
                info!(mode = ?op.mode, %details, "registration rejected");
                self.state = SessionState::Failed;
                let _ = op.slot.send(Err(SessionError::AuthenticationRejected(details)));
            }
            FrameKind::Prompt | FrameKind::Response => {
                // Acknowledgement: the real answer comes later on the same op
                debug!(pairing_type = ?env.payload_text("pairingType"), "awaiting user prompt");
                self.state = SessionState::AwaitingUserPrompt;
                self.in_flight = Some(op);
            }
            other => {
                debug!(kind = %other, "ignoring frame during pairing");
                self.in_flight = Some(op);
            }
        }
    }

    /// Fail the in-flight operation if it is `id`. Returns false otherwise.
    pub fn fail(&mut self, id: &str, err: SessionError) -> bool {
        if !self.in_flight.as_ref().is_some_and(|op| op.id == id) {
            return false;
        }
        if let Some(op) = self.in_flight.take() {
            self.state = SessionState::Failed;
            let _ = op.slot.send(Err(err));
        }
        true
    }

    /// Abandon the in-flight operation (send failed before the peer saw it)
    pub fn cancel(&mut self, id: &str) {
        if self.in_flight.as_ref().is_some_and(|op| op.id == id) {
            self.in_flight = None;
            self.state = SessionState::Connecting;
        }
    }

    /// The connection is gone: settle the final state and fail any
    /// in-flight pairing.
    pub fn connection_lost(&mut self, clean: bool) {
        if let Some(op) = self.in_flight.take() {
            let err = match self.state {
                SessionState::AwaitingUserPrompt => SessionError::PairingAborted,
                _ => SessionError::ConnectionClosed,
            };
            let _ = op.slot.send(Err(err));
        }
        if self.state != SessionState::Failed {
            self.state = if clean {
                SessionState::Closed
            } else {
                SessionState::Failed
            };
        }
    }
}
