//! Broker client.
//!
//! Drives one [`Session`] over a [`Connector`]. Every public call takes the
//! session mutex for its whole request/response exchange, so concurrent
//! callers never interleave on the wire.
//!
//! # Reconnect policy
//!
//! A call on a disconnected client connects first. A call on a `Ready` session
//! whose channel turns out to be dead (end-of-stream, broken pipe) tears down,
//! reconnects once, and replays the request once. Rejections, protocol
//! errors, and aborts are never replayed.

use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use broker_core::{
    Environment, KeystoreTokenProvider, Session, SessionAction, SessionState, TokenProvider,
};
use broker_crypto::{AttestationError, AttestationToken, KeyStore};
use broker_proto::{AuthGrant, Entries, Reply, Request};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    error::ClientError,
    system_env::SystemEnv,
    transport::{Connector, LineChannel, TransportError, UnixConnector},
};

/// Client for the broker socket with a key-store token provider.
pub type UnixBrokerClient<K> =
    BrokerClient<UnixConnector, KeystoreTokenProvider<SystemEnv, K>, SystemEnv>;

/// Session plus the channel it drives.
struct Slot<S> {
    session: Session,
    channel: Option<LineChannel<S>>,
}

/// Data Broker client.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct BrokerClient<C, P, E>
where
    C: Connector,
{
    config: ClientConfig,
    connector: C,
    tokens: Arc<P>,
    env: E,
    slot: Mutex<Slot<C::Stream>>,
    /// Mirror of the session state, readable without the mutex
    state: AtomicU8,
    /// Bumped by `close()` to abort in-flight calls
    abort: watch::Sender<u64>,
}

impl<K> UnixBrokerClient<K>
where
    K: KeyStore + 'static,
{
    /// Client for `config.socket_path`, signing tokens with `keys`.
    pub fn with_key_store(config: ClientConfig, keys: K) -> Result<Self, ClientError> {
        let env = SystemEnv::new();
        let connector = UnixConnector::new(&config.socket_path, config.transport.clone());
        let tokens = KeystoreTokenProvider::new(env.clone(), keys);

        BrokerClient::new(config, connector, tokens, env)
    }
}

impl<C, P, E> BrokerClient<C, P, E>
where
    C: Connector,
    P: TokenProvider,
    E: Environment,
{
    /// Create a disconnected client.
    ///
    /// # Errors
    ///
    /// - `ClientError::InvalidArgument` if the caller id cannot be framed
    pub fn new(config: ClientConfig, connector: C, tokens: P, env: E) -> Result<Self, ClientError> {
        let session = Session::new(config.caller_id.clone())?;
        let (abort, _) = watch::channel(0);

        Ok(Self {
            config,
            connector,
            tokens: Arc::new(tokens),
            env,
            slot: Mutex::new(Slot { session, channel: None }),
            state: AtomicU8::new(SessionState::Disconnected.as_u8()),
            abort,
        })
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current session state. Does not wait for an in-flight call.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True when the session is authenticated. Does not wait for an in-flight
    /// call.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Grant from the current session's `AUTH`, if connected.
    pub async fn auth_grant(&self) -> Option<AuthGrant> {
        self.slot.lock().await.session.auth_grant().cloned()
    }

    /// Connect and authenticate. Returns `false` on any failure (logged).
    pub async fn connect(&self) -> bool {
        match self.try_connect().await {
            Ok(_) => true,
            Err(err) => {
                warn!(
                    caller_id = %self.config.caller_id,
                    error = %err,
                    "failed to connect to Data Broker"
                );
                false
            },
        }
    }

    /// Read `key`. `None` if absent or on any failure (logged).
    pub async fn get(&self, key: &str) -> Option<String> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "GET failed");
                None
            },
        }
    }

    /// Write `key`. `false` on any failure (logged).
    pub async fn set(&self, key: &str, value: &str) -> bool {
        match self.try_set(key, value).await {
            Ok(()) => true,
            Err(err) => {
                warn!(key, error = %err, "SET failed");
                false
            },
        }
    }

    /// All entries, ordered by key. `None` on failure (logged); an empty
    /// broker yields `Some` of an empty map.
    pub async fn list_as_map(&self) -> Option<Entries> {
        match self.try_list().await {
            Ok(entries) => Some(entries),
            Err(err) => {
                warn!(error = %err, "LIST failed");
                None
            },
        }
    }

    /// Connect and authenticate, or return the current grant if already
    /// connected.
    pub async fn try_connect(&self) -> Result<AuthGrant, ClientError> {
        let mut abort = self.abort.subscribe();
        let mut slot = self.slot.lock().await;

        let result = match slot.session.auth_grant() {
            Some(grant) => Ok(grant.clone()),
            None => self.establish(&mut slot, &mut abort).await,
        };

        self.publish(&slot.session);
        result
    }

    /// Read `key`; `Ok(None)` if the broker has no value for it.
    pub async fn try_get(&self, key: &str) -> Result<Option<String>, ClientError> {
        let request = Request::get(key).map_err(ClientError::InvalidArgument)?;

        match self.call(request).await? {
            Reply::Value(value) => Ok(value),
            other => Err(unexpected(&other)),
        }
    }

    /// Write `key`.
    pub async fn try_set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let request = Request::set(key, value).map_err(ClientError::InvalidArgument)?;

        match self.call(request).await? {
            Reply::Stored => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// All entries, ordered by key.
    pub async fn try_list(&self) -> Result<Entries, ClientError> {
        match self.call(Request::List).await? {
            Reply::Entries(entries) => Ok(entries),
            other => Err(unexpected(&other)),
        }
    }

    /// Close the session. Idempotent.
    ///
    /// Calls in flight when `close` starts end with `ClientError::Aborted`
    /// and leave the client `Disconnected`. Later calls reconnect.
    pub async fn close(&self) {
        self.abort.send_modify(|epoch| *epoch = epoch.wrapping_add(1));

        let mut slot = self.slot.lock().await;
        let actions = slot.session.close();
        self.release(&mut slot, actions).await;
        debug!(caller_id = %self.config.caller_id, "client closed");
    }

    async fn call(&self, request: Request) -> Result<Reply, ClientError> {
        let mut abort = self.abort.subscribe();
        let mut slot = self.slot.lock().await;

        let result = self.call_locked(&mut slot, request, &mut abort).await;

        self.publish(&slot.session);
        result
    }

    async fn call_locked(
        &self,
        slot: &mut Slot<C::Stream>,
        request: Request,
        abort: &mut watch::Receiver<u64>,
    ) -> Result<Reply, ClientError> {
        let was_ready = slot.session.is_ready();
        if !was_ready {
            self.establish(slot, abort).await?;
        }

        match self.round_trip(slot, request.clone(), abort).await {
            Err(err) if was_ready && err.is_stale_session() => {
                warn!(
                    command = %request.kind(),
                    error = %err,
                    "session went stale, reconnecting once"
                );
                self.establish(slot, abort).await?;
                self.round_trip(slot, request, abort).await
            },
            result => result,
        }
    }

    /// One command exchange on a `Ready` session.
    async fn round_trip(
        &self,
        slot: &mut Slot<C::Stream>,
        request: Request,
        abort: &mut watch::Receiver<u64>,
    ) -> Result<Reply, ClientError> {
        let command = request.kind();
        let actions = slot.session.begin_command(request)?;

        let line = match self.execute(slot, actions, abort).await {
            Ok(line) => line,
            Err(err) => {
                self.drop_session(slot, &err).await;
                return Err(err);
            },
        };

        match slot.session.handle_command_response(line.as_deref()) {
            Ok(reply) => {
                debug!(%command, "command succeeded");
                Ok(reply)
            },
            Err(err) => {
                let err = ClientError::from(err);
                self.drop_session(slot, &err).await;
                Err(err)
            },
        }
    }

    /// Run the full connect sequence from any state.
    async fn establish(
        &self,
        slot: &mut Slot<C::Stream>,
        abort: &mut watch::Receiver<u64>,
    ) -> Result<AuthGrant, ClientError> {
        if slot.session.state() != SessionState::Disconnected || slot.channel.is_some() {
            let actions = slot.session.transport_failed("reconnecting");
            self.release(slot, actions).await;
        }

        slot.session.begin_connect()?;
        self.publish(&slot.session);

        match self.handshake(slot, abort).await {
            Ok(grant) => Ok(grant),
            Err(err) => {
                self.drop_session(slot, &err).await;
                Err(err)
            },
        }
    }

    async fn handshake(
        &self,
        slot: &mut Slot<C::Stream>,
        abort: &mut watch::Receiver<u64>,
    ) -> Result<AuthGrant, ClientError> {
        let started = self.env.now();

        slot.channel = Some(self.open_channel(abort).await?);
        slot.session.channel_opened()?;
        self.publish(&slot.session);

        let token = self.generate_token(slot.session.caller_id(), abort).await?;
        debug!(caller_id = %slot.session.caller_id(), token_len = token.len(), "sending AUTH");

        let actions = slot.session.authenticate(token.as_str())?;
        drop(token);

        let line = self.execute(slot, actions, abort).await?;
        let grant = slot.session.handle_auth_response(line.as_deref())?;

        info!(
            caller_id = %slot.session.caller_id(),
            layers = ?grant.layers.names(),
            elapsed = ?(self.env.now() - started),
            "authenticated with Data Broker"
        );
        if !grant.permission_enforced() {
            debug!("permission layer not enforced, attestation only");
        }

        Ok(grant)
    }

    async fn open_channel(
        &self,
        abort: &mut watch::Receiver<u64>,
    ) -> Result<LineChannel<C::Stream>, ClientError> {
        let transport = &self.config.transport;
        let attempts = transport.connect_attempts.max(1);
        let mut attempt = 1;

        loop {
            let opened = tokio::select! {
                biased;
                _ = abort.changed() => return Err(ClientError::Aborted),
                opened = self.connector.open() => opened,
            };

            match opened {
                Ok(channel) => return Ok(channel),
                Err(err) if attempt < attempts && err.is_retryable() => {
                    debug!(
                        attempt,
                        endpoint = %self.connector.endpoint(),
                        error = %err,
                        "connect attempt failed"
                    );

                    tokio::select! {
                        biased;
                        _ = abort.changed() => return Err(ClientError::Aborted),
                        () = self.env.sleep(transport.connect_backoff * attempt) => {},
                    }
                    attempt += 1;
                },
                Err(err) => return Err(ClientError::Connect(err)),
            }
        }
    }

    /// Generate a token on the blocking pool; signing may touch a key store.
    async fn generate_token(
        &self,
        caller_id: &str,
        abort: &mut watch::Receiver<u64>,
    ) -> Result<AttestationToken, ClientError> {
        let tokens = Arc::clone(&self.tokens);
        let caller_id = caller_id.to_string();
        let task = tokio::task::spawn_blocking(move || tokens.generate_token(&caller_id));

        let joined = tokio::select! {
            biased;
            _ = abort.changed() => return Err(ClientError::Aborted),
            joined = task => joined,
        };

        joined
            .map_err(|e| AttestationError::KeyStoreUnavailable(format!("token task failed: {e}")))?
            .map_err(ClientError::Attestation)
    }

    /// Execute `Send`/`ReadLine` actions. Returns the line read, if any.
    async fn execute(
        &self,
        slot: &mut Slot<C::Stream>,
        actions: Vec<SessionAction>,
        abort: &mut watch::Receiver<u64>,
    ) -> Result<Option<String>, ClientError> {
        let mut reply = None;

        for action in actions {
            match action {
                SessionAction::Send(request) => {
                    // Whole line is built before anything is written
                    let line = request.to_line().map_err(ClientError::InvalidArgument)?;
                    let channel =
                        slot.channel.as_mut().ok_or(ClientError::Io(TransportError::Closed))?;

                    tokio::select! {
                        biased;
                        _ = abort.changed() => return Err(ClientError::Aborted),
                        sent = channel.send_line(&line) => sent.map_err(ClientError::Io)?,
                    }
                },
                SessionAction::ReadLine => {
                    let channel =
                        slot.channel.as_mut().ok_or(ClientError::Io(TransportError::Closed))?;

                    reply = tokio::select! {
                        biased;
                        _ = abort.changed() => return Err(ClientError::Aborted),
                        read = channel.read_line() => read.map_err(ClientError::Io)?,
                    };
                },
                SessionAction::CloseChannel { reason } => {
                    debug!(%reason, "closing broker channel");
                    if let Some(mut channel) = slot.channel.take() {
                        channel.close().await;
                    }
                },
                SessionAction::OpenChannel => {
                    return Err(ClientError::Protocol("unexpected OpenChannel action".to_string()));
                },
            }
        }

        Ok(reply)
    }

    /// Tear the session down after `err` and release the channel.
    async fn drop_session(&self, slot: &mut Slot<C::Stream>, err: &ClientError) {
        debug!(caller_id = %slot.session.caller_id(), error = %err, "dropping session");

        let actions = slot.session.transport_failed(err.to_string());
        self.release(slot, actions).await;
    }

    async fn release(&self, slot: &mut Slot<C::Stream>, actions: Vec<SessionAction>) {
        for action in actions {
            if let SessionAction::CloseChannel { reason } = action {
                debug!(%reason, "closing broker channel");
            }
        }

        // The session may already be torn down (failed AUTH, failure reply)
        // while the channel is still held here
        if let Some(mut channel) = slot.channel.take() {
            channel.close().await;
        }

        self.publish(&slot.session);
    }

    fn publish(&self, session: &Session) {
        self.state.store(session.state().as_u8(), Ordering::Release);
    }
}

fn unexpected(reply: &Reply) -> ClientError {
    ClientError::Protocol(format!("unexpected reply {reply:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;

    struct NoTokens;

    impl TokenProvider for NoTokens {
        fn generate_token(&self, caller_id: &str) -> Result<AttestationToken, AttestationError> {
            Err(AttestationError::NoCertificateChain { caller_id: caller_id.to_string() })
        }
    }

    fn client(socket: &std::path::Path) -> BrokerClient<UnixConnector, NoTokens, SystemEnv> {
        let config = ClientConfig::new("com.example.dbapp")
            .with_socket_path(socket)
            .with_transport(TransportConfig::development());
        let connector = UnixConnector::new(socket, config.transport.clone());

        BrokerClient::new(config, connector, NoTokens, SystemEnv::new()).unwrap()
    }

    #[test]
    fn rejects_unframeable_caller_id() {
        let config = ClientConfig::new("bad caller");
        let connector = UnixConnector::new("/nonexistent", TransportConfig::development());

        let result = BrokerClient::new(config, connector, NoTokens, SystemEnv::new());
        assert!(matches!(result, Err(ClientError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let client = client(std::path::Path::new("/nonexistent/broker.sock"));

        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(!client.is_connected());
        assert_eq!(client.auth_grant().await, None);
    }

    #[tokio::test]
    async fn missing_socket_fails_to_connect() {
        let client = client(std::path::Path::new("/nonexistent/broker.sock"));

        let err = client.try_connect().await.unwrap_err();
        assert!(matches!(err, ClientError::Connect(TransportError::NotFound { .. })));
        assert!(!client.connect().await);
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn invalid_argument_before_any_transport_activity() {
        let client = client(std::path::Path::new("/nonexistent/broker.sock"));

        // A connect attempt would report Connect; InvalidArgument proves none ran
        assert!(matches!(client.try_set("a b", "x").await, Err(ClientError::InvalidArgument(_))));
        assert!(matches!(client.try_get("k\n").await, Err(ClientError::InvalidArgument(_))));
        assert!(!client.set("k", "line\nbreak").await);
    }

    #[tokio::test]
    async fn close_is_idempotent_when_disconnected() {
        let client = client(std::path::Path::new("/nonexistent/broker.sock"));

        client.close().await;
        client.close().await;
        assert_eq!(client.state(), SessionState::Disconnected);
    }
}
