//! # uibridge protocol
//!
//! Wire-level types shared by both ends of the bridge: the host process that
//! drives UI state and the embedded interpreter (the *peer*) that hosts it.
//!
//! ## Overview
//!
//! - **Messages**: [`Message`] and [`MessageType`], one JSON object per logical message
//! - **Commands**: [`Command`], a tagged union keyed by `action`, and the [`Reply`] envelope
//! - **Errors**: [`ErrorCode`], [`ErrorPayload`], [`ProtocolError`]
//! - **Framing**: [`JsonFramer`] and [`JsonObjectCodec`], recovering message boundaries
//!   from a raw byte stream with a balanced-brace scan
//!
//! ## Wire format
//!
//! ```text
//! { "id": "…", "type": "request", "action": "ping", "payload": {},
//!   "timestamp": 1718000000000, "correlationId": null }
//! ```
//!
//! Messages are concatenated on the socket without length prefixes or delimiters,
//! so every reader must go through the framer:
//!
//! ```rust
//! use uibridge_protocol::JsonFramer;
//!
//! let mut framer = JsonFramer::new();
//! framer.push(br#"{"a":1}{"b""#);
//! assert_eq!(framer.next_frame().unwrap().as_deref(), Some(r#"{"a":1}"#));
//! assert_eq!(framer.next_frame().unwrap(), None);
//! framer.push(br#":"}"}"#);
//! assert_eq!(framer.next_frame().unwrap().as_deref(), Some(r#"{"b":"}"}"#));
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod command;
mod error;
mod framer;
mod id;
mod message;

pub use command::{Command, Reply};
pub use error::{ErrorCode, ErrorPayload, FramingError, ProtocolError, ProtocolResult};
pub use framer::{JsonFramer, JsonObjectCodec, find_message_end};
pub use id::{generate_id, now_millis};
pub use message::{Message, MessageType};

/// Default loopback host the peer listens on.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default TCP port the peer listens on.
pub const DEFAULT_PORT: u16 = 9999;

/// Upper bound for a single framed message (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
