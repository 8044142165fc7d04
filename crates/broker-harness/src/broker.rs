//! Mock Data Broker.
//!
//! Speaks the broker side of the line protocol. Layer 1 is real: tokens are
//! checked with [`TokenVerifier`] against the device authority key. Layer 2 is
//! a [`PermissionPolicy`] standing in for the OS permission lookup.

use std::{
    collections::{BTreeSet, VecDeque},
    io,
    path::Path,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use broker_client::{LineChannel, TransportConfig};
use broker_core::Environment;
use broker_crypto::{TokenVerifier, VerifyingKey};
use broker_proto::{AuthGrant, AuthLayers, Entries, Request, Response, format_entries};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::UnixListener,
    sync::watch,
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Layer-2 permission behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PermissionPolicy {
    /// The permission is not defined in this deployment: attestation alone
    /// authenticates.
    #[default]
    NotDefined,
    /// Only these callers hold the permission.
    Granted(BTreeSet<String>),
}

impl PermissionPolicy {
    /// Policy granting the permission to `callers`.
    pub fn granted<I, S>(callers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Granted(callers.into_iter().map(Into::into).collect())
    }

    /// Layers enforced for `caller_id`, or `None` if permission is denied.
    fn check(&self, caller_id: &str) -> Option<AuthLayers> {
        match self {
            Self::NotDefined => Some(AuthLayers::ATTESTATION),
            Self::Granted(callers) if callers.contains(caller_id) => {
                Some(AuthLayers::ATTESTATION | AuthLayers::PERMISSION)
            },
            Self::Granted(_) => None,
        }
    }
}

/// One request line as the broker received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireEvent {
    /// Connection number (1-based, in accept order)
    pub connection: u64,
    /// Request line; `AUTH` tokens are replaced by `<token>`
    pub line: String,
}

/// Per-connection protocol state: the caller authenticated on it, if any.
#[derive(Debug, Default)]
struct BrokerConnection {
    caller_id: Option<String>,
}

struct BrokerState {
    store: Entries,
    verifier: TokenVerifier,
    policy: PermissionPolicy,
    log: Vec<WireEvent>,
    reply_delay: Option<Duration>,
    silent: bool,
    scripted: VecDeque<String>,
}

struct Inner<E> {
    env: E,
    state: Mutex<BrokerState>,
    connections: AtomicU64,
    shutdown: watch::Sender<u64>,
}

/// Mock broker. Clones share one store and one configuration.
pub struct MockBroker<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for MockBroker<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: Environment> MockBroker<E> {
    /// Broker trusting tokens endorsed by `authority`.
    pub fn new(env: E, authority: VerifyingKey) -> Self {
        let (shutdown, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                env,
                state: Mutex::new(BrokerState {
                    store: Entries::new(),
                    verifier: TokenVerifier::new(authority),
                    policy: PermissionPolicy::NotDefined,
                    log: Vec::new(),
                    reply_delay: None,
                    silent: false,
                    scripted: VecDeque::new(),
                }),
                connections: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the layer-2 policy.
    pub fn set_policy(&self, policy: PermissionPolicy) {
        self.state().policy = policy;
    }

    /// Delay every reply.
    pub fn set_reply_delay(&self, delay: Option<Duration>) {
        self.state().reply_delay = delay;
    }

    /// Read requests but never answer them.
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Answer the next request (any verb) with `line` verbatim.
    pub fn script_reply(&self, line: impl Into<String>) {
        self.state().scripted.push_back(line.into());
    }

    /// Seed the store.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state().store.insert(key.into(), value.into());
    }

    /// Store contents.
    pub fn entries(&self) -> Entries {
        self.state().store.clone()
    }

    /// Every request line received so far.
    pub fn wire_log(&self) -> Vec<WireEvent> {
        self.state().log.clone()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> u64 {
        self.inner.connections.load(Ordering::SeqCst)
    }

    /// Drop every live connection. Clients see end-of-stream.
    pub fn drop_connections(&self) {
        self.inner.shutdown.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Serve one connection until the peer closes or
    /// [`MockBroker::drop_connections`] is called.
    pub async fn serve<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let id = self.inner.connections.fetch_add(1, Ordering::SeqCst) + 1;
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut channel = LineChannel::new(stream, &TransportConfig::default());
        let mut connection = BrokerConnection::default();

        debug!(connection = id, "broker accepted connection");

        loop {
            let line = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                line = channel.read_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    warn!(connection = id, error = %err, "broker read failed");
                    break;
                },
            };

            let (reply, delay) = {
                let mut state = self.state();
                state.log.push(WireEvent { connection: id, line: redact(&line) });

                if state.silent {
                    (None, None)
                } else if let Some(scripted) = state.scripted.pop_front() {
                    (Some(scripted), state.reply_delay)
                } else {
                    let now = self.inner.env.wall_clock_secs();
                    let reply = connection.handle_line(&mut state, &line, now);
                    (Some(reply.to_line()), state.reply_delay)
                }
            };

            let Some(reply) = reply else { continue };

            if let Some(delay) = delay {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    () = self.inner.env.sleep(delay) => {},
                }
            }

            if let Err(err) = channel.send_line(&reply).await {
                debug!(connection = id, error = %err, "broker write failed");
                break;
            }
        }

        channel.close().await;
        debug!(connection = id, "broker closed connection");
    }

    /// Listen on a Unix socket at `path`, serving each connection on its own
    /// task.
    pub fn bind_unix(&self, path: &Path) -> io::Result<JoinHandle<()>> {
        let listener = UnixListener::bind(path)?;
        let broker = self.clone();

        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let broker = broker.clone();
                        tokio::spawn(async move { broker.serve(stream).await });
                    },
                    Err(err) => {
                        warn!(error = %err, "broker accept failed");
                        break;
                    },
                }
            }
        }))
    }
}

impl BrokerConnection {
    fn handle_line(&mut self, state: &mut BrokerState, line: &str, now: u64) -> Response {
        let request = match Request::decode(line) {
            Ok(request) => request,
            Err(err) => return Response::failure(format!("ERR:{err}")),
        };

        match request {
            Request::Auth { caller_id, token } => {
                self.caller_id = None;

                if let Err(err) = state.verifier.verify(&token, &caller_id, now) {
                    return Response::failure(format!("ERR:attestation failed: {err}"));
                }

                let Some(layers) = state.policy.check(&caller_id) else {
                    return Response::failure("ERR:permission denied");
                };

                self.caller_id = Some(caller_id);
                Response::ok(AuthGrant::new(layers).detail)
            },
            _ if self.caller_id.is_none() => Response::failure("ERR:not authenticated"),
            Request::Get { key } => {
                Response::ok(state.store.get(&key).cloned().unwrap_or_default())
            },
            Request::Set { key, value } => {
                state.store.insert(key, value);
                Response::ok("")
            },
            Request::List => Response::ok(format_entries(&state.store)),
        }
    }
}

fn redact(line: &str) -> String {
    match line.strip_prefix("AUTH ") {
        Some(rest) => {
            let caller_id = rest.split(' ').next().unwrap_or_default();
            format!("AUTH {caller_id} <token>")
        },
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use broker_crypto::{KeyStore, MemoryKeyStore, NONCE_SIZE, issue_token};

    use super::*;
    use crate::SimEnv;

    const NOW: u64 = crate::sim_env::SIM_EPOCH_SECS;

    fn fixture() -> (MemoryKeyStore, BrokerState) {
        let keys = MemoryKeyStore::new([3u8; 32]);
        let state = BrokerState {
            store: Entries::new(),
            verifier: TokenVerifier::new(keys.authority().unwrap()),
            policy: PermissionPolicy::NotDefined,
            log: Vec::new(),
            reply_delay: None,
            silent: false,
            scripted: VecDeque::new(),
        };
        (keys, state)
    }

    fn auth_line(keys: &MemoryKeyStore, caller: &str, nonce: u8) -> String {
        let identity = keys.identity(caller).unwrap();
        let token = issue_token(&identity, NOW, 300, [nonce; NONCE_SIZE]).unwrap();
        format!("AUTH {caller} {}", token.as_str())
    }

    #[test]
    fn attestation_only_when_permission_undefined() {
        let (keys, mut state) = fixture();
        let mut conn = BrokerConnection::default();

        let reply = conn.handle_line(&mut state, &auth_line(&keys, "app", 1), NOW);
        assert_eq!(reply, Response::ok("layers=attestation"));
        assert_eq!(conn.caller_id.as_deref(), Some("app"));
    }

    #[test]
    fn permission_layer_grants_and_denies() {
        let (keys, mut state) = fixture();
        state.policy = PermissionPolicy::granted(["granted.app"]);

        let mut granted = BrokerConnection::default();
        let reply = granted.handle_line(&mut state, &auth_line(&keys, "granted.app", 1), NOW);
        assert_eq!(reply, Response::ok("layers=attestation,permission"));

        let mut denied = BrokerConnection::default();
        let reply = denied.handle_line(&mut state, &auth_line(&keys, "other.app", 2), NOW);
        assert_eq!(reply, Response::failure("ERR:permission denied"));
        assert_eq!(denied.caller_id, None);
    }

    #[test]
    fn commands_require_auth() {
        let (_, mut state) = fixture();
        let mut conn = BrokerConnection::default();

        let reply = conn.handle_line(&mut state, "LIST", NOW);
        assert_eq!(reply, Response::failure("ERR:not authenticated"));
    }

    #[test]
    fn store_round_trip() {
        let (keys, mut state) = fixture();
        let mut conn = BrokerConnection::default();
        conn.handle_line(&mut state, &auth_line(&keys, "app", 1), NOW);

        assert_eq!(conn.handle_line(&mut state, "GET k", NOW), Response::ok(""));
        assert_eq!(conn.handle_line(&mut state, "SET k hello world", NOW), Response::ok(""));
        assert_eq!(conn.handle_line(&mut state, "GET k", NOW), Response::ok("hello world"));
        assert_eq!(conn.handle_line(&mut state, "LIST", NOW), Response::ok("k=hello world"));
    }

    #[test]
    fn replayed_token_is_rejected() {
        let (keys, mut state) = fixture();
        let line = auth_line(&keys, "app", 1);

        assert!(matches!(
            BrokerConnection::default().handle_line(&mut state, &line, NOW),
            Response::Ok(_)
        ));
        assert!(matches!(
            BrokerConnection::default().handle_line(&mut state, &line, NOW),
            Response::Failure(_)
        ));
    }

    #[test]
    fn redacts_tokens() {
        assert_eq!(redact("AUTH app deadbeef"), "AUTH app <token>");
        assert_eq!(redact("GET k"), "GET k");
    }

    #[tokio::test]
    async fn serve_answers_over_a_pipe() {
        let (keys, _) = fixture();
        let broker = MockBroker::new(SimEnv::with_seed(1), keys.authority().unwrap());
        broker.insert("k", "v");

        let (client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn({
            let broker = broker.clone();
            async move { broker.serve(server).await }
        });

        let mut channel = LineChannel::new(client, &TransportConfig::development());
        channel.send_line(&auth_line(&keys, "app", 9)).await.unwrap();
        assert_eq!(channel.read_line().await.unwrap().as_deref(), Some("OK:layers=attestation"));
        channel.send_line("GET k").await.unwrap();
        assert_eq!(channel.read_line().await.unwrap().as_deref(), Some("OK:v"));

        channel.close().await;
        task.await.unwrap();

        assert_eq!(broker.connections(), 1);
        assert_eq!(broker.wire_log()[0].line, "AUTH app <token>");
    }

    #[tokio::test]
    async fn bind_unix_serves_each_connection() {
        let (keys, _) = fixture();
        let broker = MockBroker::new(SimEnv::with_seed(2), keys.authority().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("broker.sock");
        let listener = broker.bind_unix(&socket).unwrap();

        let config = TransportConfig::development();
        for _ in 0..2 {
            let mut channel = broker_client::transport::connect(&socket, &config).await.unwrap();
            channel.send_line("LIST").await.unwrap();
            let reply = channel.read_line().await.unwrap();
            assert_eq!(reply.as_deref(), Some("ERR:not authenticated"));
            channel.close().await;
        }

        listener.abort();
        assert_eq!(broker.wire_log().iter().map(|e| e.connection).collect::<Vec<_>>(), [1, 2]);
    }
}
