//! Wire envelope shared by the broadcast server and the reconnecting client.
//!
//! Every frame in either direction is a JSON object
//! `{ "type": string, "data": any, "timestamp": number }` where `timestamp`
//! is milliseconds since the Unix epoch.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::results::ResultSnapshot;

/// Payload of the `connection-ack` frame.
pub const CONNECTION_ACK_TEXT: &str = "Connected to voting server";
/// Payload of the `error` frame sent for unparseable input.
pub const INVALID_FORMAT_TEXT: &str = "Invalid message format";

/// Known envelope types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    ConnectionAck,
    VoteUpdate,
    Error,
    Pong,
    Ping,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionAck => "connection-ack",
            Self::VoteUpdate => "vote-update",
            Self::Error => "error",
            Self::Pong => "pong",
            Self::Ping => "ping",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connection-ack" => Ok(Self::ConnectionAck),
            "vote-update" => Ok(Self::VoteUpdate),
            "error" => Ok(Self::Error),
            "pong" => Ok(Self::Pong),
            "ping" => Ok(Self::Ping),
            other => Err(EnvelopeError::UnknownType(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("envelope is null")]
    Null,

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("unexpected payload for {kind}: {source}")]
    Payload {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },
}

/// One frame on the realtime channel.
///
/// `kind` stays a raw string so that frames with types this build does not
/// know about still parse; callers decide how to treat them via
/// [`Envelope::message_type`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: i64,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(kind: MessageType, data: Value) -> Self {
        Self {
            kind: kind.as_str().to_owned(),
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn connection_ack() -> Self {
        Self::new(MessageType::ConnectionAck, Value::from(CONNECTION_ACK_TEXT))
    }

    pub fn vote_update(snapshot: &ResultSnapshot) -> Result<Self, EnvelopeError> {
        let data = serde_json::to_value(snapshot)?;
        Ok(Self::new(MessageType::VoteUpdate, data))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(MessageType::Error, Value::String(message.into()))
    }

    pub fn pong() -> Self {
        Self::new(MessageType::Pong, Value::from("pong"))
    }

    /// Parse a raw text frame.
    ///
    /// Only invalid JSON and a bare `null` fail. Any other value is read
    /// field by field: a missing or non-string `type` becomes an empty kind,
    /// and `timestamp` accepts integers, floats, and numeric strings.
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(raw)?;
        if value.is_null() {
            return Err(EnvelopeError::Null);
        }
        Ok(Self::from_value(value))
    }

    fn from_value(mut value: Value) -> Self {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let timestamp = value.get("timestamp").map_or(0, lenient_millis);
        let data = value.get_mut("data").map(Value::take).unwrap_or(Value::Null);
        Self {
            kind,
            data,
            timestamp,
        }
    }

    /// The typed kind, or `None` for types this build does not know.
    pub fn message_type(&self) -> Option<MessageType> {
        self.kind.parse().ok()
    }

    /// Decode the `data` of a `vote-update` frame.
    pub fn snapshot(&self) -> Result<ResultSnapshot, EnvelopeError> {
        serde_json::from_value(self.data.clone()).map_err(|source| EnvelopeError::Payload {
            kind: MessageType::VoteUpdate,
            source,
        })
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn lenient_millis(v: &Value) -> i64 {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64))
            .unwrap_or_default(),
        _ => 0,
    }
}
