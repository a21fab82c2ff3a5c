//! Input sub-session
//!
//! Remote-button events travel over a second socket whose URL the peer hands
//! out in reply to [`POINTER_INPUT_SOCKET_URI`]. Each event is one text frame
//! of `key:value` lines terminated by a blank line:
//!
//! ```text
//! type:button
//! name:ENTER
//!
//! ```
//!
//! Anything the peer writes back on this socket is read and discarded.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::transport::{Connector, Transport};

/// Command that yields the input socket URL in `payload.socketPath`
pub const POINTER_INPUT_SOCKET_URI: &str =
    "ssap://com.webos.service.networkinput/getPointerInputSocket";

/// Encode a button press
pub fn button_frame(name: &str) -> String {
    format!("type:button\nname:{name}\n\n")
}

pub(crate) struct InputSession {
    url: String,
    transport: Arc<dyn Transport>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl InputSession {
    /// Connect to the socket advertised in a pointer-input reply
    pub fn open(connector: &dyn Connector, reply: &Value) -> Result<Self, SessionError> {
        let url = reply
            .get("socketPath")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SessionError::UnexpectedPayload("pointer input reply without socketPath".into())
            })?;
        let transport: Arc<dyn Transport> = Arc::from(connector.connect(url)?);
        info!(url, "input socket opened");

        let reader = transport.clone();
        let drain = thread::Builder::new()
            .name("ssap-input".into())
            .spawn(move || discard_inbound(reader.as_ref()));
        let drain = match drain {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("failed to spawn input reader: {e}");
                None
            }
        };

        Ok(Self {
            url: url.to_string(),
            transport,
            drain: Mutex::new(drain),
        })
    }

    pub fn send_button(&self, name: &str) -> Result<(), SessionError> {
        self.transport.send(&button_frame(name))?;
        debug!(button = name, url = %self.url, "button sent");
        Ok(())
    }

    pub fn close(&self) {
        let _ = self.transport.close();
        let drain = self
            .drain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = drain {
            let _ = handle.join();
        }
    }
}

/// Read the input socket until it closes so unsolicited frames never queue up
fn discard_inbound(transport: &dyn Transport) {
    loop {
        match transport.receive() {
            Ok(Some(text)) => debug!(len = text.len(), "discarding input socket frame"),
            Ok(None) => break,
            Err(e) => {
                debug!("input socket reader stopped: {e}");
                break;
            }
        }
    }
}
