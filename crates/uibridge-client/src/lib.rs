//! # uibridge client
//!
//! The host side of the bridge. A [`BridgeClient`] sends commands to the peer
//! over one persistent TCP connection and hands back each command's correlated
//! reply.
//!
//! - Commands issued while offline are queued and written in submission order
//!   once the connection is up; the first one triggers the connect
//! - Each written command waits in a correlation table keyed by message ID
//!   until its reply arrives or its timeout fires
//! - When the socket drops, the client reconnects silently within a bounded
//!   budget; when the budget runs out every pending command fails with
//!   [`BridgeError::ConnectionClosed`]
//! - Messages from the peer that are not replies go to [`BridgeClient::subscribe`]
//!
//! All socket I/O, the queue and the correlation table live in a single task,
//! so there are no locks on the hot path.

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

mod client;
mod config;
mod connection;
mod correlation;
mod error;
mod queue;

pub use client::BridgeClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{BridgeError, BridgeResult};

pub use uibridge_protocol::{Command, ErrorCode, Message, MessageType, Reply};
pub use uibridge_transport::{ConnectionState, RetryPolicy, TransportConfig, TransportMetrics};
