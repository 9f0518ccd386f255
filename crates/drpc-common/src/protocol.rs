//! JSON wire messages exchanged between drpc clients and servers.
//!
//! Every message is a JSON object discriminated by its `type` field.
//! Inbound text is parsed in two stages, JSON first and then the message
//! shape, so callers can tell garbage bytes from well-formed JSON that is
//! not a valid message. Both are connection-fatal on the server.

use crate::types::{Args, RequestId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Fallback error text when a failed `result` carries no `error` field.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Open a subscription to a named stream.
    Subscribe {
        /// Client-chosen subscription id.
        id: RequestId,
        /// Registered stream name.
        name: String,
        /// Stream arguments.
        args: Args,
    },
    /// Drop a subscription. Unknown ids are ignored.
    Unsubscribe {
        /// Subscription id to drop.
        id: RequestId,
    },
    /// Invoke a named mutation.
    Call {
        /// Client-chosen call id.
        id: RequestId,
        /// Registered mutation name.
        name: String,
        /// Mutation arguments.
        args: Args,
    },
    /// Keepalive; carries no data.
    Heartbeat,
    /// Publish this connection's presence payload.
    Presence {
        /// Presence payload.
        data: Args,
    },
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Keepalive sent after the server has been idle.
    Heartbeat,
    /// Initial value of a freshly opened subscription.
    Snapshot {
        /// Subscription id echoed from the `subscribe` request.
        id: RequestId,
        /// Wire form of the stream's current value.
        snapshot: Value,
    },
    /// Changes for every subscription that changed during one step.
    Delta {
        /// Subscription id to wire change. Ids without changes are omitted.
        #[serde(deserialize_with = "deserialize_changes")]
        changes: BTreeMap<RequestId, Value>,
    },
    /// Outcome of a `call`.
    Result {
        /// Call id echoed from the `call` request.
        id: RequestId,
        /// Whether the mutation succeeded.
        success: bool,
        /// Success value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        /// Error text for a failed mutation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Typed outcome of a mutation endpoint.
///
/// `Error` is a business failure: it is reported to the caller and the
/// connection stays open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationResult {
    /// The mutation succeeded with this value.
    Success(Value),
    /// The mutation failed with this message.
    Error(String),
}

impl MutationResult {
    /// Returns `true` for [`MutationResult::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Converts into a standard `Result`.
    ///
    /// # Errors
    ///
    /// Returns the error message for [`MutationResult::Error`].
    pub fn into_result(self) -> Result<Value, String> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Error(error) => Err(error),
        }
    }
}

/// Errors produced while decoding or encoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload was not valid JSON.
    #[error("invalid json: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// The payload was JSON but did not match any message shape.
    #[error("invalid message: {0}")]
    InvalidMessage(#[source] serde_json::Error),
    /// A message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

fn decode<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    serde_json::from_value(value).map_err(ProtocolError::InvalidMessage)
}

/// JSON object keys are strings; parse them back into request ids.
fn deserialize_changes<'de, D>(deserializer: D) -> Result<BTreeMap<RequestId, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, change)| {
            key.parse::<RequestId>()
                .map(|id| (id, change))
                .map_err(|_| serde::de::Error::custom(format!("invalid change id: {key}")))
        })
        .collect()
}

impl ClientMessage {
    /// Creates a `subscribe` message.
    #[must_use]
    pub fn subscribe(id: RequestId, name: impl Into<String>, args: Args) -> Self {
        Self::Subscribe {
            id,
            name: name.into(),
            args,
        }
    }

    /// Creates an `unsubscribe` message.
    #[must_use]
    pub const fn unsubscribe(id: RequestId) -> Self {
        Self::Unsubscribe { id }
    }

    /// Creates a `call` message.
    #[must_use]
    pub fn call(id: RequestId, name: impl Into<String>, args: Args) -> Self {
        Self::Call {
            id,
            name: name.into(),
            args,
        }
    }

    /// Creates a `presence` message.
    #[must_use]
    pub const fn presence(data: Args) -> Self {
        Self::Presence { data }
    }

    /// Wire tag of this message, for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Call { .. } => "call",
            Self::Heartbeat => "heartbeat",
            Self::Presence { .. } => "presence",
        }
    }

    /// Parses and validates an inbound text payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidJson`] for malformed JSON and
    /// [`ProtocolError::InvalidMessage`] for JSON of the wrong shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use drpc_common::protocol::ClientMessage;
    /// let msg = ClientMessage::parse(r#"{"type":"unsubscribe","id":3}"#).unwrap();
    /// assert_eq!(msg, ClientMessage::unsubscribe(3));
    /// ```
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        decode(text)
    }

    /// Serializes to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

impl ServerMessage {
    /// Creates a `snapshot` message.
    #[must_use]
    pub const fn snapshot(id: RequestId, snapshot: Value) -> Self {
        Self::Snapshot { id, snapshot }
    }

    /// Creates a `delta` message.
    #[must_use]
    pub const fn delta(changes: BTreeMap<RequestId, Value>) -> Self {
        Self::Delta { changes }
    }

    /// Creates a `result` message from a mutation outcome.
    #[must_use]
    pub fn result(id: RequestId, outcome: MutationResult) -> Self {
        match outcome {
            MutationResult::Success(value) => Self::Result {
                id,
                success: true,
                value: Some(value),
                error: None,
            },
            MutationResult::Error(error) => Self::Result {
                id,
                success: false,
                value: None,
                error: Some(error),
            },
        }
    }

    /// Wire tag of this message, for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Snapshot { .. } => "snapshot",
            Self::Delta { .. } => "delta",
            Self::Result { .. } => "result",
        }
    }

    /// Parses an inbound text payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the payload is not a valid server message.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        decode(text)
    }

    /// Serializes to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_subscribe() {
        let msg = ClientMessage::parse(r#"{"type":"subscribe","id":1,"name":"todos","args":{}}"#)
            .unwrap();
        assert_eq!(msg, ClientMessage::subscribe(1, "todos", Args::new()));
    }

    #[test]
    fn parse_call_keeps_args() {
        let msg = ClientMessage::parse(
            r#"{"type":"call","id":2,"name":"addTodo","args":{"title":"x"}}"#,
        )
        .unwrap();
        let ClientMessage::Call { id, name, args } = msg else {
            panic!("expected call");
        };
        assert_eq!(id, 2);
        assert_eq!(name, "addTodo");
        assert_eq!(args.get("title"), Some(&json!("x")));
    }

    #[test]
    fn parse_heartbeat_and_presence() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"heartbeat"}"#).unwrap(),
            ClientMessage::Heartbeat
        );
        let msg = ClientMessage::parse(r#"{"type":"presence","data":{"cursor":4}}"#).unwrap();
        assert_eq!(msg.kind(), "presence");
    }

    #[test]
    fn invalid_json_is_distinguished() {
        let err = ClientMessage::parse("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = ClientMessage::parse(r#"{"type":"explode","id":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn args_must_be_an_object() {
        let err = ClientMessage::parse(r#"{"type":"subscribe","id":1,"name":"t","args":[1]}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn missing_id_is_rejected() {
        assert!(ClientMessage::parse(r#"{"type":"unsubscribe"}"#).is_err());
        assert!(ClientMessage::parse(r#"{"type":"unsubscribe","id":"1"}"#).is_err());
    }

    #[test]
    fn heartbeat_encodes_as_bare_tag() {
        let text = ServerMessage::Heartbeat.encode().unwrap();
        assert_eq!(text, r#"{"type":"heartbeat"}"#);
    }

    #[test]
    fn snapshot_encoding() {
        let text = ServerMessage::snapshot(1, json!([["a", 1]])).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "snapshot", "id": 1, "snapshot": [["a", 1]]}));
    }

    #[test]
    fn delta_keys_are_strings_on_the_wire() {
        let mut changes = BTreeMap::new();
        changes.insert(1, json!([["x", 1]]));
        changes.insert(12, json!(null));
        let text = ServerMessage::delta(changes.clone()).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["changes"]["1"], json!([["x", 1]]));
        assert!(value["changes"].get("12").is_some());

        let parsed = ServerMessage::parse(&text).unwrap();
        assert_eq!(parsed, ServerMessage::delta(changes));
    }

    #[test]
    fn negative_ids_are_accepted() {
        let msg = ClientMessage::parse(r#"{"type":"call","id":-4,"name":"addTodo","args":{}}"#)
            .unwrap();
        assert_eq!(msg, ClientMessage::call(-4, "addTodo", Args::new()));

        let parsed = ServerMessage::parse(r#"{"type":"delta","changes":{"-4":1}}"#).unwrap();
        assert_eq!(parsed, ServerMessage::delta(BTreeMap::from([(-4, json!(1))])));
    }

    #[test]
    fn fractional_id_is_rejected() {
        assert!(ClientMessage::parse(r#"{"type":"unsubscribe","id":1.5}"#).is_err());
    }

    #[test]
    fn delta_with_non_numeric_key_is_rejected() {
        let err = ServerMessage::parse(r#"{"type":"delta","changes":{"abc":1}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn result_success_omits_error() {
        let msg = ServerMessage::result(2, MutationResult::Success(json!({"id": 7})));
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "result", "id": 2, "success": true, "value": {"id": 7}})
        );
    }

    #[test]
    fn result_error_omits_value() {
        let msg = ServerMessage::result(5, MutationResult::Error("nope".into()));
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "result", "id": 5, "success": false, "error": "nope"})
        );
    }

    #[test]
    fn mutation_result_into_result() {
        assert_eq!(MutationResult::Success(json!(1)).into_result(), Ok(json!(1)));
        assert!(!MutationResult::Error("e".into()).is_success());
    }
}
