//! Client for SSAP-style websocket device control.
//!
//! [`Tv`] owns one control socket, pairs with the device, and turns the
//! multiplexed reply stream into blocking calls. Remote-button presses go
//! over a secondary input socket opened on demand.

pub mod client;
pub mod commands;
mod dispatch;
pub mod error;
pub mod input;
pub mod pairing;
pub mod protocol;
mod registry;
#[cfg(test)]
mod testing;
pub mod transport;

pub use client::Tv;
pub use commands::Command;
pub use error::SessionError;
pub use pairing::{Manifest, SessionState};
pub use transport::{Connector, DialConfig, Transport, TransportError, WsConnector};
