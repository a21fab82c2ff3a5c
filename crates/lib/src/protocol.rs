//! Envelope protocol spoken over the control socket
//!
//! Every message is a single JSON text frame. Outbound requests carry a
//! session-unique id; the peer echoes it on the matching response or error.
//!
//! # Wire Format
//!
//! ```text
//! {"id":"3","type":"request","uri":"ssap://audio/getVolume","payload":{}}
//! {"id":"3","type":"response","payload":{"returnValue":true,"volume":11}}
//! {"id":"4","type":"error","error":"404 no such service or method","payload":{}}
//! {"id":"1","type":"register","payload":{"pairingType":"PROMPT","manifest":{}}}
//! {"id":"1","type":"prompt"}
//! {"id":"1","type":"registered","payload":{"client-key":"..."}}
//! ```
//!
//! Inbound ids may arrive as strings or integers; both decode to a string.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Discriminant carried in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Command sent by the client
    Request,
    /// Successful reply to a request
    Response,
    /// Failed reply to a request
    Error,
    /// Pairing request sent by the client
    Register,
    /// Pairing acknowledged, the user is being asked on screen
    Prompt,
    /// Pairing completed, carries the client key
    Registered,
    /// Greeting pushed by the peer
    Hello,
    /// Anything else the peer pushes unprompted
    #[serde(other)]
    Event,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Request => "request",
            FrameKind::Response => "response",
            FrameKind::Error => "error",
            FrameKind::Register => "register",
            FrameKind::Prompt => "prompt",
            FrameKind::Registered => "registered",
            FrameKind::Hello => "hello",
            FrameKind::Event => "event",
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    /// Correlation id (absent on some pushed events)
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Target URI (requests only)
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    /// Error text (error frames only)
    #[serde(default)]
    pub error: Option<String>,
}

/// Envelope codec errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Syntax(String),
    #[error("frame has no usable `type` field: {0}")]
    Structure(String),
    #[error("{0} frame without id")]
    MissingId(FrameKind),
}

fn deserialize_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    Ok(Option::<RawId>::deserialize(d)?.map(|raw| match raw {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    }))
}

impl Envelope {
    /// Build an outbound command frame
    pub fn request(id: impl Into<String>, uri: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            kind: FrameKind::Request,
            uri: Some(uri.into()),
            payload,
            error: None,
        }
    }

    /// Build an outbound pairing frame
    pub fn register(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Some(id.into()),
            kind: FrameKind::Register,
            uri: None,
            payload: Some(payload),
            error: None,
        }
    }

    /// Encode as a JSON text frame. Absent fields are omitted.
    pub fn encode(&self) -> String {
        let mut obj = Map::new();
        if let Some(id) = &self.id {
            obj.insert("id".into(), Value::String(id.clone()));
        }
        obj.insert("type".into(), Value::String(self.kind.as_str().into()));
        if let Some(uri) = &self.uri {
            obj.insert("uri".into(), Value::String(uri.clone()));
        }
        if let Some(payload) = &self.payload {
            obj.insert("payload".into(), payload.clone());
        }
        if let Some(error) = &self.error {
            obj.insert("error".into(), Value::String(error.clone()));
        }
        Value::Object(obj).to_string()
    }

    /// Decode a JSON text frame
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::Syntax(e.to_string()))?;
        let env: Envelope =
            serde_json::from_value(value).map_err(|e| FrameError::Structure(e.to_string()))?;

        // Replies are only meaningful if they can be correlated
        if env.id.is_none() && matches!(env.kind, FrameKind::Request | FrameKind::Response) {
            return Err(FrameError::MissingId(env.kind));
        }
        Ok(env)
    }

    /// Human-readable rejection details for an error-typed frame, or for a
    /// response whose payload reports `returnValue: false`
    pub fn rejection(&self) -> Option<String> {
        match self.kind {
            FrameKind::Error => Some(
                self.error
                    .clone()
                    .or_else(|| self.payload_text("errorText"))
                    .unwrap_or_else(|| "request failed".to_string()),
            ),
            FrameKind::Response => {
                let failed = self
                    .payload
                    .as_ref()
                    .and_then(|p| p.get("returnValue"))
                    .and_then(Value::as_bool)
                    == Some(false);
                failed.then(|| {
                    self.payload_text("errorText")
                        .unwrap_or_else(|| "returnValue was false".to_string())
                })
            }
            _ => None,
        }
    }

    /// Read a string field out of the payload
    pub fn payload_text(&self, key: &str) -> Option<String> {
        self.payload
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(Value::as_str)
            .map(String::from)
    }
}

/// Best-effort id recovery from a frame that failed to decode, so a pending
/// caller can be told its reply was malformed instead of waiting forever.
pub fn salvage_id(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
