//! Test harness for the Data Broker client.
//!
//! # Components
//!
//! - [`MockBroker`]: a broker speaking the line protocol, with real layer-1
//!   token verification, a configurable layer-2 [`PermissionPolicy`], an
//!   in-memory store, a wire log, and fault injection
//! - [`MemoryConnector`]: a [`broker_client::Connector`] that wires the client
//!   to a [`MockBroker`] through an in-process pipe
//! - [`SimEnv`]: seeded environment for reproducible nonces and tokens

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod broker;
mod connector;
mod sim_env;

pub use broker::{MockBroker, PermissionPolicy, WireEvent};
pub use connector::MemoryConnector;
pub use sim_env::SimEnv;
