//! `brokerctl`: command-line shell over [`broker_client::BrokerClient`].
//!
//! Runs one `get`, `set`, `list`, or `probe` per invocation and renders the
//! result as text. Exit status is non-zero when the command failed.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod command;
mod error;
pub mod render;

pub use command::{Command, Outcome, run};
pub use error::CliError;
