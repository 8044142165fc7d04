use std::io;

use broker_client::ClientError;
use thiserror::Error;

/// Failures outside command execution.
#[derive(Debug, Error)]
pub enum CliError {
    /// Client could not be built from the arguments
    #[error("invalid client configuration: {0}")]
    Config(#[from] ClientError),

    /// Writing the rendered result failed
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}
