//! The wire message envelope.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ErrorCode, ErrorPayload, ProtocolError, ProtocolResult};
use crate::id::{generate_id, now_millis};

/// Kind of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Fire-and-forget notification.
    Event,
    /// A command that expects a reply.
    Action,
    /// A state push.
    State,
    /// A state synchronisation message.
    Sync,
    /// A request that expects a reply.
    Request,
    /// Successful reply, correlated to a request.
    Response,
    /// Failed reply, correlated to a request.
    Error,
}

impl MessageType {
    /// Whether the sender waits for a correlated reply.
    pub const fn expects_reply(self) -> bool {
        matches!(self, Self::Request | Self::Action)
    }

    /// Whether this message answers an earlier request.
    pub const fn is_reply(self) -> bool {
        matches!(self, Self::Response | Self::Error)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Event => "event",
            Self::Action => "action",
            Self::State => "state",
            Self::Sync => "sync",
            Self::Request => "request",
            Self::Response => "response",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// One logical message on the wire. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID.
    pub id: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Action name the message is addressed to.
    #[serde(default)]
    pub action: String,
    /// Action-specific body.
    #[serde(default)]
    pub payload: Value,
    /// Unix milliseconds; stamped by the sender when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// ID of the request a `response`/`error` answers.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl Message {
    /// Create a message with an explicit ID and no timestamp.
    pub fn create(
        id: impl Into<String>,
        kind: MessageType,
        action: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            action: action.into(),
            payload,
            timestamp: None,
            correlation_id: None,
        }
    }

    /// Create a message with a freshly generated ID, stamped now.
    pub fn new(kind: MessageType, action: impl Into<String>, payload: Value) -> Self {
        let mut message = Self::create(generate_id(), kind, action, payload);
        message.timestamp = Some(now_millis());
        message
    }

    /// Create a `request` message.
    pub fn request(action: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageType::Request, action, payload)
    }

    /// Create an `event` message.
    pub fn event(action: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageType::Event, action, payload)
    }

    /// Create a `response` correlated to `request`.
    pub fn response_to(request: &Self, payload: Value) -> Self {
        let mut message = Self::new(MessageType::Response, request.action.clone(), payload);
        message.correlation_id = Some(request.id.clone());
        message
    }

    /// Create an `error` reply carrying `{success: false, error: {code, message}}`.
    pub fn error_response(
        correlation_id: Option<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        let error = ErrorPayload::new(code, message);
        let mut reply = Self::new(
            MessageType::Error,
            "error",
            json!({ "success": false, "error": error }),
        );
        reply.correlation_id = correlation_id;
        reply
    }

    /// Attach `id` as the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Stamp the message with the current time unless it already has a timestamp.
    pub fn ensure_timestamp(&mut self) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now_millis());
        }
    }

    /// The key used to find the pending request this reply resolves:
    /// `correlationId` when present, otherwise the message's own `id`.
    pub fn reply_key(&self) -> &str {
        self.correlation_id.as_deref().unwrap_or(&self.id)
    }

    /// The error carried by this message, if it is a failed reply.
    ///
    /// Recognises `type: "error"` messages and `response` envelopes with
    /// `success: false`, reading either `payload.error` or a bare `{code, message}`.
    pub fn error_payload(&self) -> Option<ErrorPayload> {
        let failed = self.kind == MessageType::Error
            || self.payload.get("success").and_then(Value::as_bool) == Some(false);
        if !failed {
            return None;
        }

        let body = self.payload.get("error").unwrap_or(&self.payload);
        let parsed = serde_json::from_value::<ErrorPayload>(body.clone()).ok();
        Some(parsed.unwrap_or_else(|| {
            let message = body
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            ErrorPayload::new(ErrorCode::InternalError, message)
        }))
    }

    /// Parse a single framed message.
    pub fn from_json(raw: &str) -> ProtocolResult<Self> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Parse(e.to_string()))
    }

    /// Serialize to the compact wire form.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
