//! # uibridge transport
//!
//! Connection plumbing for the host side of the bridge:
//!
//! - [`TcpConnector`] opens a [`JsonStream`], a TCP socket framed with the
//!   balanced-brace codec, applying a per-attempt timeout and a bounded
//!   [`RetryPolicy`]
//! - [`Backoff`] is the retry state machine, free of timers so it can be
//!   driven by any scheduler
//! - [`ConnectionState`] tracks `Disconnected → Connecting → Connected`
//! - [`AtomicMetrics`] collects lock-free counters with a
//!   serializable [`TransportMetrics`] snapshot
//! - [`TransportConfig`] and [`load_config`] read settings from TOML, YAML or
//!   JSON with `UIBRIDGE_*` environment overrides

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

mod backoff;
mod config;
mod connector;
mod error;
mod metrics;
mod state;

pub use backoff::Backoff;
pub use config::{
    ConfigError, ENV_PREFIX, RetryPolicy, TransportConfig, TransportConfigBuilder, load_config,
    load_config_with_prefix,
};
pub use connector::{JsonStream, TcpConnector, frame_stream};
pub use error::{TransportError, TransportResult};
pub use metrics::{AtomicMetrics, TransportMetrics};
pub use state::ConnectionState;
