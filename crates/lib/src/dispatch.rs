//! Inbound dispatch loop
//!
//! One thread per session owns the read side of the transport. Each frame is
//! decoded and routed to the pairing state machine or to the pending-request
//! registry; anything else is an unsolicited event and is dropped. When the
//! transport ends, the session state is settled and every pending request is
//! failed before the thread exits.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::pairing::{Pairing, SessionState};
use crate::protocol::{self, Envelope, FrameKind};
use crate::registry::PendingRequests;
use crate::transport::Transport;

/// State shared between a session and its dispatch thread
pub(crate) struct Core {
    pub requests: PendingRequests,
    pairing: Mutex<Pairing>,
}

impl Core {
    pub fn new() -> Self {
        Self {
            requests: PendingRequests::new(),
            pairing: Mutex::new(Pairing::new(SessionState::Connecting)),
        }
    }

    pub fn pairing(&self) -> MutexGuard<'_, Pairing> {
        self.pairing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settle the final state and fail everything still waiting
    pub fn shutdown(&self, clean: bool) {
        self.pairing().connection_lost(clean);
        let failed = self.requests.close();
        if failed > 0 {
            info!(failed, "failed pending requests on shutdown");
        }
    }
}

/// Start the dispatch thread for a session
pub(crate) fn spawn(
    transport: Arc<dyn Transport>,
    core: Arc<Core>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ssap-dispatch".into())
        .spawn(move || run(transport.as_ref(), &core))
}

pub(crate) fn run(transport: &dyn Transport, core: &Core) {
    loop {
        match transport.receive() {
            Ok(Some(text)) => route(core, &text),
            Ok(None) => {
                info!("connection closed");
                core.shutdown(true);
                return;
            }
            Err(e) => {
                warn!("transport failed: {e}");
                core.shutdown(false);
                return;
            }
        }
    }
}

/// Route one inbound frame. Never panics on bad input.
pub(crate) fn route(core: &Core, text: &str) {
    let env = match Envelope::decode(text) {
        Ok(env) => env,
        Err(e) => {
            warn!("dropping malformed frame: {e}");
            // Tell the owner of the id, if any, rather than leaving it waiting
            if let Some(id) = protocol::salvage_id(text) {
                let err = SessionError::MalformedFrame(e.clone());
                if !core.pairing().fail(&id, err) {
                    core.requests
                        .complete(&id, Err(SessionError::MalformedFrame(e)));
                }
            }
            return;
        }
    };

    {
        let mut pairing = core.pairing();
        if pairing.claims(&env) {
            debug!(id = ?env.id, kind = %env.kind, "pairing frame");
            pairing.handle(env);
            return;
        }
    }

    match (env.id.as_deref(), env.kind) {
        (Some(id), FrameKind::Response | FrameKind::Error) => {
            let reply = match env.rejection() {
                Some(details) => Err(SessionError::CommandRejected { details }),
                None => Ok(env.payload.clone().unwrap_or(Value::Null)),
            };
            if core.requests.complete(id, reply) {
                debug!(%id, kind = %env.kind, "reply routed");
            } else {
                debug!(%id, "reply for unknown request dropped");
            }
        }
        (id, kind) => {
            debug!(?id, %kind, "unsolicited frame dropped");
        }
    }
}
