//! Data Broker client.
//!
//! Async driver for the [`broker_core::Session`] state machine: it executes
//! the session's actions against a real channel, generates attestation tokens
//! off the async runtime, and serializes concurrent callers onto the single
//! session.
//!
//! # Components
//!
//! - [`BrokerClient`]: `connect`, `get`, `set`, `list_as_map`, `close`
//! - [`Connector`] / [`LineChannel`]: line-framed transport; [`UnixConnector`]
//!   for the broker socket
//! - [`SystemEnv`]: production environment (real time, OS RNG)
//! - [`ClientConfig`] / [`TransportConfig`]: configuration

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod config;
mod error;
mod system_env;
pub mod transport;

pub use broker_core::{
    Environment, KeystoreTokenProvider, SessionState, TokenConfig, TokenProvider,
};
pub use broker_proto::{AuthGrant, AuthLayers, Entries};
pub use client::{BrokerClient, UnixBrokerClient};
pub use config::{ClientConfig, DEFAULT_SOCKET_PATH, TransportConfig};
pub use error::ClientError;
pub use system_env::SystemEnv;
pub use transport::{Connector, LineChannel, TransportError, UnixConnector};
