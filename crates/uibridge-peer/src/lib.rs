//! # uibridge peer
//!
//! The embedded-interpreter side of the bridge.
//!
//! - [`HandlerRegistry`] maps actions to handlers; global handlers see every
//!   message
//! - [`Bridge`] is the facade: [`Bridge::receive_message`] parses and
//!   dispatches through a non-reentrant FIFO drain, [`Bridge::send_message`]
//!   stamps and delivers replies and events
//! - [`PeerTransport`] abstracts the outbound path: a socket writer
//!   ([`ChannelTransport`]), a named host callback ([`CallbackTransport`]), or
//!   an in-memory buffer ([`BufferTransport`])
//! - [`PeerServer`] listens on TCP and serves the command vocabulary over a
//!   shared [`ComponentStore`]
//!
//! Handlers are synchronous. A failing or panicking handler is logged and
//! skipped; the remaining handlers and queued messages still run.

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

mod bridge;
mod components;
mod config;
mod error;
mod handlers;
mod inbox;
mod server;
mod transport;

pub use bridge::{Ack, Bridge};
pub use components::ComponentStore;
pub use config::PeerConfig;
pub use error::{HandlerError, PeerError, PeerResult};
pub use handlers::{Handler, HandlerId, HandlerRegistry};
pub use server::{PeerServer, ShutdownHandle, register_commands};
pub use transport::{BufferTransport, CallbackTransport, ChannelTransport, HostInvoker, PeerTransport};
