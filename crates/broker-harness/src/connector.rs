//! In-process connector.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use broker_client::{Connector, LineChannel, TransportConfig, TransportError};
use broker_core::Environment;
use tokio::io::DuplexStream;

use crate::broker::MockBroker;

/// Pipe capacity per direction.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Connects a client to a [`MockBroker`] through `tokio::io::duplex`.
///
/// Each `open` spawns a broker task for the new pipe. Opens can be refused to
/// simulate the broker daemon not running.
pub struct MemoryConnector<E> {
    broker: MockBroker<E>,
    config: TransportConfig,
    opens: Arc<AtomicU64>,
    refuse: Arc<AtomicBool>,
}

impl<E> Clone for MemoryConnector<E> {
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
            config: self.config.clone(),
            opens: Arc::clone(&self.opens),
            refuse: Arc::clone(&self.refuse),
        }
    }
}

impl<E: Environment> MemoryConnector<E> {
    /// Connector to `broker` with development transport settings.
    pub fn new(broker: MockBroker<E>) -> Self {
        Self::with_config(broker, TransportConfig::development())
    }

    /// Connector with explicit transport settings.
    pub fn with_config(broker: MockBroker<E>, config: TransportConfig) -> Self {
        Self {
            broker,
            config,
            opens: Arc::new(AtomicU64::new(0)),
            refuse: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of `open` calls so far, refused ones included.
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Refuse (or accept again) new connections.
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl<E: Environment> Connector for MemoryConnector<E> {
    type Stream = DuplexStream;

    fn open(
        &self,
    ) -> impl Future<Output = Result<LineChannel<DuplexStream>, TransportError>> + Send {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let refuse = self.refuse.load(Ordering::SeqCst);
        let broker = self.broker.clone();
        let config = self.config.clone();

        async move {
            if refuse {
                return Err(TransportError::Refused { endpoint: "memory".to_string() });
            }

            let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
            tokio::spawn(async move { broker.serve(server).await });

            Ok(LineChannel::new(client, &config))
        }
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}
