//! `brokerctl` entry point.

use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

use broker_cli::{CliError, Command};
use broker_client::{ClientConfig, DEFAULT_SOCKET_PATH, TransportConfig, UnixBrokerClient};
use broker_crypto::FileKeyStore;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Data Broker command-line client
#[derive(Parser, Debug)]
#[command(name = "brokerctl")]
#[command(about = "Query the Data Broker over its local socket")]
#[command(version)]
struct Args {
    /// Broker socket path
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Caller identity presented in AUTH
    #[arg(long)]
    caller: String,

    /// Key directory holding the device seed
    #[arg(long)]
    key_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Connect timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Read one key
    Get {
        /// Key to read
        key: String,
    },
    /// Store one key
    Set {
        /// Key to write
        key: String,
        /// Value to store
        value: String,
    },
    /// List every entry
    List,
    /// Connect, authenticate, and list; report each layer
    Probe,
}

impl From<Cmd> for Command {
    fn from(cmd: Cmd) -> Self {
        match cmd {
            Cmd::Get { key } => Self::Get { key },
            Cmd::Set { key, value } => Self::Set { key, value },
            Cmd::List => Self::List,
            Cmd::Probe => Self::Probe,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, CliError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    let transport = TransportConfig {
        connect_timeout: Duration::from_millis(args.connect_timeout_ms),
        ..TransportConfig::default()
    };
    let config = ClientConfig::new(args.caller)
        .with_socket_path(&args.socket)
        .with_transport(transport);

    let keys = FileKeyStore::open(args.key_dir);
    info!(
        socket = %args.socket.display(),
        caller = %config.caller_id,
        key_dir = %keys.dir().display(),
        "brokerctl starting"
    );

    let client = UnixBrokerClient::with_key_store(config, keys)?;
    let outcome = broker_cli::run(&client, &args.command.into()).await;
    client.close().await;

    writeln!(io::stdout().lock(), "{}", outcome.text)?;

    Ok(if outcome.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
