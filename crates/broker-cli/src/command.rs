//! Command execution against a [`BrokerClient`].

use broker_client::{BrokerClient, ClientError, Connector, Environment, TokenProvider};
use broker_proto::Request;
use tracing::{debug, warn};

use crate::render;

/// One `brokerctl` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read one key.
    Get {
        /// Key to read
        key: String,
    },
    /// Store one key.
    Set {
        /// Key to write
        key: String,
        /// Value to store
        value: String,
    },
    /// Read every entry.
    List,
    /// Connect, authenticate, and list; report each layer.
    Probe,
}

/// Rendered result of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Text for stdout
    pub text: String,
    /// False when the command failed; the process exits non-zero
    pub success: bool,
}

impl Outcome {
    fn success(text: String) -> Self {
        Self { text, success: true }
    }

    fn failure(text: String) -> Self {
        Self { text, success: false }
    }
}

/// Run `command` and render the result.
///
/// Argument checks, including the wire framing rules, happen before any
/// connection attempt.
pub async fn run<C, P, E>(client: &BrokerClient<C, P, E>, command: &Command) -> Outcome
where
    C: Connector,
    P: TokenProvider,
    E: Environment,
{
    debug!(?command, "running command");

    match command {
        Command::Get { key } if key.is_empty() => {
            return Outcome::failure(render::missing_key());
        },
        Command::Set { key, value } if key.is_empty() || value.is_empty() => {
            return Outcome::failure(render::missing_key_or_value());
        },
        _ => {},
    }

    let checked = match command {
        Command::Get { key } => Request::get(key.as_str()).map(drop),
        Command::Set { key, value } => Request::set(key.as_str(), value.as_str()).map(drop),
        Command::List | Command::Probe => Ok(()),
    };
    if let Err(err) = checked {
        return Outcome::failure(render::invalid_argument(&err));
    }

    let needs_session = !matches!(command, Command::Probe);
    if needs_session && !client.is_connected() && !client.connect().await {
        return Outcome::failure(render::connect_failed());
    }

    match command {
        Command::Get { key } => match client.try_get(key).await {
            Ok(Some(value)) if !value.is_empty() => Outcome::success(render::value(key, &value)),
            Ok(_) => Outcome::failure(render::not_found(key)),
            Err(ClientError::InvalidArgument(err)) => {
                Outcome::failure(render::invalid_argument(&err))
            },
            Err(err) => {
                warn!(key, error = %err, "GET failed");
                Outcome::failure(render::not_found(key))
            },
        },
        Command::Set { key, value } => match client.try_set(key, value).await {
            Ok(()) => Outcome::success(render::stored(key, value, true)),
            Err(ClientError::InvalidArgument(err)) => {
                Outcome::failure(render::invalid_argument(&err))
            },
            Err(err) => {
                warn!(key, error = %err, "SET failed");
                Outcome::failure(render::stored(key, value, false))
            },
        },
        Command::List => match client.list_as_map().await {
            Some(entries) => Outcome::success(render::entries(&entries)),
            None => Outcome::failure(render::list_failed()),
        },
        Command::Probe => probe(client).await,
    }
}

async fn probe<C, P, E>(client: &BrokerClient<C, P, E>) -> Outcome
where
    C: Connector,
    P: TokenProvider,
    E: Environment,
{
    let grant = match client.try_connect().await {
        Ok(grant) => grant,
        Err(err) => return Outcome::failure(render::probe_failure(&err)),
    };

    match client.try_list().await {
        Ok(entries) => Outcome::success(render::probe_success(&grant, Ok(&entries))),
        Err(err) => Outcome::failure(render::probe_success(&grant, Err(&err))),
    }
}
