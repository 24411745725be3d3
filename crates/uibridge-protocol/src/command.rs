//! Typed command vocabulary and reply envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{ErrorPayload, ProtocolError, ProtocolResult};
use crate::message::Message;

/// The commands a host can send to the peer, keyed by `action`.
///
/// Serialized adjacently tagged so `action` and `payload` line up with the
/// [`Message`] fields of the same name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum Command {
    /// Liveness check, answered with `pong`.
    Ping {},
    /// Instantiate a component from a configuration object.
    LoadComponent {
        /// Component configuration; `config.state` seeds the component's state.
        #[serde(default)]
        config: Value,
    },
    /// Invoke a method on a loaded component.
    CallMethod {
        /// Component ID returned by `load_component`.
        id: String,
        /// Method name.
        method: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Read a component's state.
    GetState {
        /// Component ID.
        id: String,
    },
    /// Drain the peer's event log.
    GetEvents {},
    /// Acknowledge, then close the connection.
    Shutdown {},
    /// Reply with `data` unchanged.
    Echo {
        /// Value to echo.
        #[serde(default)]
        data: Value,
    },
    /// Reply with `a + b`.
    Add {
        /// Left operand.
        a: f64,
        /// Right operand.
        b: f64,
    },
}

impl Command {
    /// Every action name in the vocabulary.
    pub const ACTIONS: &'static [&'static str] = &[
        "ping",
        "load_component",
        "call_method",
        "get_state",
        "get_events",
        "shutdown",
        "echo",
        "add",
    ];

    /// `ping`
    pub const fn ping() -> Self {
        Self::Ping {}
    }

    /// `get_events`
    pub const fn get_events() -> Self {
        Self::GetEvents {}
    }

    /// `shutdown`
    pub const fn shutdown() -> Self {
        Self::Shutdown {}
    }

    /// The wire action name.
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Ping {} => "ping",
            Self::LoadComponent { .. } => "load_component",
            Self::CallMethod { .. } => "call_method",
            Self::GetState { .. } => "get_state",
            Self::GetEvents {} => "get_events",
            Self::Shutdown {} => "shutdown",
            Self::Echo { .. } => "echo",
            Self::Add { .. } => "add",
        }
    }

    /// The payload object for this command.
    pub fn payload(&self) -> ProtocolResult<Value> {
        let mut value = serde_json::to_value(self)?;
        Ok(value
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    /// Wrap the command in a fresh `request` message.
    pub fn into_message(self) -> ProtocolResult<Message> {
        let payload = self.payload()?;
        Ok(Message::request(self.action(), payload))
    }

    /// Decode the command carried by `message`.
    ///
    /// A `null` payload is read as `{}` so payload-less commands can omit it.
    pub fn from_message(message: &Message) -> ProtocolResult<Self> {
        Self::from_parts(&message.action, &message.payload)
    }

    /// Decode a command from an action name and payload.
    pub fn from_parts(action: &str, payload: &Value) -> ProtocolResult<Self> {
        if !Self::ACTIONS.contains(&action) {
            return Err(ProtocolError::UnknownCommand(action.to_string()));
        }
        let payload = if payload.is_null() {
            json!({})
        } else {
            payload.clone()
        };
        serde_json::from_value(json!({ "action": action, "payload": payload })).map_err(|e| {
            ProtocolError::InvalidPayload {
                action: action.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// The reply envelope: `success` plus whichever fields the action returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Whether the command succeeded.
    pub success: bool,
    /// Generic result value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Component ID (`load_component`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Component state (`get_state`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    /// Drained events (`get_events`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<Value>>,
    /// Echoed data (`echo`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Reply {
    /// A successful, empty reply.
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A failed reply.
    pub fn failure(error: ErrorPayload) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::default()
        }
    }

    /// Set `result`.
    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Set `id`.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set `state`.
    #[must_use]
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Set `events`.
    #[must_use]
    pub fn with_events(mut self, events: Vec<Value>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set `data`.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Read a reply envelope out of a response payload.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        serde_json::from_value(value).map_err(|e| ProtocolError::Parse(e.to_string()))
    }

    /// Serialize into a response payload.
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "success": false }))
    }
}
