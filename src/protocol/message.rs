//! Bayeux message definitions
//!
//! `Message` is the wire representation of every protocol message, meta or
//! application. Messages travel as JSON arrays; fields the client does not
//! model explicitly are preserved in `extra` so extensions and servers can
//! round-trip them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::channel;
use crate::protocol::error::ProtocolError;

pub const BAYEUX_VERSION: &str = "1.0";

/// Reconnect policy advised by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
    Retry,
    Handshake,
    None,
    /// Any value this client does not act on.
    #[serde(other)]
    Unknown,
}

/// Server advice. Intervals and timeouts are milliseconds on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl Advice {
    pub fn interval(&self) -> Option<Duration> {
        self.interval.map(millis)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(millis)
    }
}

fn millis(value: f64) -> Duration {
    Duration::from_millis(value.max(0.0) as u64)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    pub fn handshake(supported_connection_types: Vec<String>) -> Self {
        Self {
            version: Some(BAYEUX_VERSION.to_string()),
            supported_connection_types: Some(supported_connection_types),
            ..Self::new(channel::HANDSHAKE)
        }
    }

    pub fn connect(client_id: &str, connection_type: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            connection_type: Some(connection_type.to_string()),
            ..Self::new(channel::CONNECT)
        }
    }

    pub fn subscribe(client_id: &str, subscription: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            subscription: Some(subscription.to_string()),
            ..Self::new(channel::SUBSCRIBE)
        }
    }

    pub fn unsubscribe(client_id: &str, subscription: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            subscription: Some(subscription.to_string()),
            ..Self::new(channel::UNSUBSCRIBE)
        }
    }

    pub fn disconnect(client_id: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            ..Self::new(channel::DISCONNECT)
        }
    }

    pub fn publish(channel: &str, client_id: Option<&str>, data: Value) -> Self {
        Self {
            client_id: client_id.map(str::to_string),
            data: Some(data),
            ..Self::new(channel)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn is_meta(&self) -> bool {
        channel::is_meta(&self.channel)
    }

    /// Whether this message answers a request (it carries `successful`).
    pub fn is_reply(&self) -> bool {
        self.successful.is_some()
    }

    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }

    /// The error carried by an unsuccessful reply.
    pub fn protocol_error(&self) -> ProtocolError {
        match &self.error {
            Some(raw) => ProtocolError::parse(raw),
            None => ProtocolError::unparsed("request was not successful"),
        }
    }
}

/// Decode a response body into messages. Servers answer with an array,
/// but a bare object is tolerated.
pub fn decode_messages(body: &str) -> Result<Vec<Message>, serde_json::Error> {
    match serde_json::from_str::<Value>(body)? {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Message>, _>>(),
        single => Ok(vec![serde_json::from_value(single)?]),
    }
}

pub fn encode_messages(messages: &[Message]) -> Result<String, serde_json::Error> {
    serde_json::to_string(messages)
}
