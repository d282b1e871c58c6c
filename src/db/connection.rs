//! Persistent WebSocket RPC connection to the remote store.
//!
//! One physical link is multiplexed between all callers. Each call registers a
//! one-shot response slot in the link's correlation table, under the same lock
//! that guards the link handle, before its frame is queued for the writer task.
//! A single reader task per link delivers responses to their slots.
//!
//! Each physical link is a *generation*. When the reader hits an error, the
//! link and its correlation table are discarded together, the supervisor task
//! reconnects on a fixed interval, and any frame that still trickles in for an
//! old generation is dropped. Correlation ids are UUIDv7 and never reused.
//!
//! The writer skips a queued frame whose call is no longer waiting (it timed
//! out or its link was replaced before the frame reached the wire). A call
//! that times out after its frame was sent is not recalled; the server may
//! still apply it, and its late response is dropped.
//!
//! Background tasks (reader, writer, supervisor, keep-alive) stop on
//! [`Connection::close`]. Dropping the last [`Connection`] handle does not stop
//! them; call `close` at shutdown.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::protocol::{RpcRequest, RpcResponse};
use crate::error::{MemoryError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Runtime settings for a [`Connection`].
#[derive(Clone)]
pub struct ConnectionConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Deadline applied to every call, including the handshake.
    pub request_timeout: Duration,
    /// Delay between reconnection attempts.
    pub reconnect_interval: Duration,
    /// Period of the liveness probe.
    pub keepalive_interval: Duration,
    /// Fail calls as soon as their link is torn down instead of letting them
    /// run out their deadline.
    pub fail_pending_on_reconnect: bool,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            namespace: "nino".into(),
            database: "memory".into(),
            request_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(30),
            fail_pending_on_reconnect: false,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("request_timeout", &self.request_timeout)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("fail_pending_on_reconnect", &self.fail_pending_on_reconnect)
            .finish()
    }
}

/// Lifecycle of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Reconnecting,
    /// Terminal. Reached only through [`Connection::close`].
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame queued for the writer, tagged with the call it belongs to.
struct Outbound {
    id: String,
    frame: Message,
}

/// The live half of one physical link.
struct Link {
    generation: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: HashMap<String, oneshot::Sender<RpcResponse>>,
}

struct Inner {
    config: ConnectionConfig,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    reconnect: Notify,
}

/// Cloneable handle to the shared connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Connect, authenticate and select the namespace, then start the
    /// supervisor and keep-alive tasks. Fails if the first handshake fails.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let inner = Inner::new(config);
        if let Err(e) = inner.establish().await {
            inner.close();
            return Err(e);
        }

        tokio::spawn(supervise(Arc::clone(&inner)));
        tokio::spawn(keep_alive(Arc::clone(&inner)));
        Ok(Self { inner })
    }

    /// Issue one RPC call. Fails fast unless the connection is `Ready`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        match self.state() {
            ConnectionState::Ready => {}
            ConnectionState::Closed => return Err(MemoryError::Closed),
            other => {
                return Err(MemoryError::Transport(format!("connection is {other}")));
            }
        }
        self.inner
            .request(method, params, self.inner.config.fail_pending_on_reconnect)
            .await
    }

    /// Run one or more statements with bound variables.
    pub async fn query(&self, sql: &str, vars: Value) -> Result<Value> {
        self.call("query", json!([sql, vars])).await
    }

    /// Create a record in `table`.
    pub async fn create(&self, table: &str, data: Value) -> Result<Value> {
        self.call("create", json!([table, data])).await
    }

    /// Select a table or a single record id.
    pub async fn select(&self, thing: &str) -> Result<Value> {
        self.call("select", json!([thing])).await
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<()> {
        self.call("ping", json!([])).await.map(|_| ())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Generation of the most recently established link.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Calls currently waiting for a response on the live link.
    pub fn pending_requests(&self) -> usize {
        self.inner
            .lock_link()
            .as_ref()
            .map_or(0, |link| link.pending.len())
    }

    /// Stop all background tasks and release the link. Pending calls are
    /// abandoned and resolve through their own deadlines.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Inner {
    fn new(config: ConnectionConfig) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
            state,
            shutdown,
            reconnect: Notify::new(),
        })
    }

    fn lock_link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Move to `next` unless already there or closed.
    fn set_state(&self, next: ConnectionState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            tracing::debug!(state = %next, "connection state changed");
        }
        changed
    }

    async fn establish(self: &Arc<Self>) -> Result<()> {
        if self.is_shut_down() {
            return Err(MemoryError::Closed);
        }
        self.set_state(ConnectionState::Connecting);

        let url = self.config.url.as_str();
        let connected =
            tokio::time::timeout(self.config.request_timeout, tokio_tungstenite::connect_async(url)).await;
        let ws = match connected {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Reconnecting);
                return Err(MemoryError::Transport(format!("connect to {url}: {e}")));
            }
            Err(_) => {
                self.set_state(ConnectionState::Reconnecting);
                return Err(MemoryError::Transport(format!("connect to {url} timed out")));
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (sink, stream) = ws.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        *self.lock_link() = Some(Link {
            generation,
            outbound,
            pending: HashMap::new(),
        });
        tokio::spawn(write_loop(Arc::clone(self), generation, sink, outbound_rx));
        tokio::spawn(read_loop(Arc::clone(self), generation, stream));

        self.set_state(ConnectionState::Authenticating);
        if let Err(e) = self.handshake().await {
            self.discard(generation);
            self.set_state(ConnectionState::Reconnecting);
            return Err(e);
        }

        if !self.set_state(ConnectionState::Ready) {
            self.discard(generation);
            return Err(MemoryError::Closed);
        }
        tracing::info!(generation, url = %url, "connected to remote store");
        Ok(())
    }

    async fn handshake(&self) -> Result<()> {
        let credentials = json!([{
            "user": self.config.username,
            "pass": self.config.password,
        }]);
        self.request("signin", credentials, true).await?;

        let scope = json!([self.config.namespace, self.config.database]);
        self.request("use", scope, true).await?;
        Ok(())
    }

    async fn request(&self, method: &str, params: Value, fail_fast: bool) -> Result<Value> {
        let timeout = self.config.request_timeout;
        let deadline = Instant::now() + timeout;
        let id = uuid::Uuid::now_v7().to_string();
        let frame = serde_json::to_string(&RpcRequest {
            id: &id,
            method,
            params: &params,
        })?;

        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut guard = self.lock_link();
            let Some(link) = guard.as_mut() else {
                return Err(MemoryError::Transport("not connected".into()));
            };
            // The slot must be visible before the frame can reach the wire.
            link.pending.insert(id.clone(), tx);
            let outbound = Outbound {
                id: id.clone(),
                frame: Message::Text(frame.into()),
            };
            if link.outbound.send(outbound).is_err() {
                link.pending.remove(&id);
                return Err(MemoryError::Transport("link writer has stopped".into()));
            }
            link.generation
        };

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) if fail_fast => Err(MemoryError::Transport(format!(
                "link dropped while `{method}` was in flight"
            ))),
            Ok(Err(_)) => {
                // Abandoned with its link; it resolves only by its deadline.
                tokio::time::sleep_until(deadline).await;
                Err(MemoryError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                })
            }
            Err(_) => {
                self.forget_waiter(generation, &id);
                tracing::debug!(method, id = %id, generation, "call timed out");
                Err(MemoryError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Whether call `id` on link `generation` still has a waiter.
    fn is_waiting(&self, generation: u64, id: &str) -> bool {
        self.lock_link()
            .as_ref()
            .is_some_and(|link| link.generation == generation && link.pending.contains_key(id))
    }

    fn forget_waiter(&self, generation: u64, id: &str) {
        let mut guard = self.lock_link();
        if let Some(link) = guard.as_mut().filter(|l| l.generation == generation) {
            link.pending.remove(id);
        }
    }

    /// Hand one inbound frame to its waiter, if it still has one.
    fn dispatch(&self, generation: u64, text: &str) {
        let response: RpcResponse = match serde_json::from_str(text) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(generation, error = %e, "unparseable frame dropped");
                return;
            }
        };
        let Some(id) = response.correlation_id() else {
            tracing::debug!(generation, "frame without correlation id dropped");
            return;
        };

        let waiter = {
            let mut guard = self.lock_link();
            match guard.as_mut() {
                Some(link) if link.generation == generation => link.pending.remove(&id),
                _ => None,
            }
        };
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => tracing::debug!(generation, id = %id, "response with no waiter dropped"),
        }
    }

    /// Drop the link for `generation` after a read or write failure and wake
    /// the supervisor if the link had been serving calls.
    fn teardown(&self, generation: u64, reason: &str) {
        let Some(link) = self.take_link(generation) else {
            return;
        };
        let abandoned = link.pending.len();
        drop(link);

        let was_ready = self.state.send_if_modified(|current| {
            if *current == ConnectionState::Ready {
                *current = ConnectionState::Reconnecting;
                true
            } else {
                false
            }
        });
        if was_ready {
            tracing::warn!(generation, abandoned, reason, "connection lost, reconnecting");
            self.reconnect.notify_one();
        } else {
            tracing::debug!(generation, abandoned, reason, "link dropped during handshake");
        }
    }

    /// Drop the link for `generation` without scheduling a reconnect.
    fn discard(&self, generation: u64) {
        drop(self.take_link(generation));
    }

    fn take_link(&self, generation: u64) -> Option<Link> {
        let mut guard = self.lock_link();
        if guard.as_ref().is_some_and(|l| l.generation == generation) {
            guard.take()
        } else {
            None
        }
    }

    fn close(&self) {
        self.shutdown.send_replace(true);
        self.state.send_replace(ConnectionState::Closed);
        if let Some(link) = self.lock_link().take() {
            tracing::info!(
                generation = link.generation,
                abandoned = link.pending.len(),
                "connection closed"
            );
        }
    }
}

/// Resolves once shutdown is signalled. The sender lives in `Inner`, which
/// every task keeps alive, so the channel cannot close underneath us.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn read_loop(inner: Arc<Inner>, generation: u64, mut stream: SplitStream<WsStream>) {
    let mut shutdown = inner.shutdown.subscribe();
    let reason = loop {
        tokio::select! {
            _ = closed(&mut shutdown) => return,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => inner.dispatch(generation, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break "closed by peer".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
            },
        }
    };
    inner.teardown(generation, &reason);
}

async fn write_loop<S>(
    inner: Arc<Inner>,
    generation: u64,
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    while let Some(Outbound { id, frame }) = outbound.recv().await {
        if !inner.is_waiting(generation, &id) {
            tracing::debug!(generation, id = %id, "call abandoned before send, frame skipped");
            continue;
        }
        if let Err(e) = sink.send(frame).await {
            inner.teardown(generation, &e.to_string());
            return;
        }
    }
    // Link dropped: say goodbye so the peer ends the reader too.
    let _ = sink.close().await;
}

async fn supervise(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = closed(&mut shutdown) => return,
            _ = inner.reconnect.notified() => {}
        }

        let mut attempt = 0u32;
        loop {
            tokio::select! {
                _ = closed(&mut shutdown) => return,
                _ = tokio::time::sleep(inner.config.reconnect_interval) => {}
            }
            attempt += 1;
            match inner.establish().await {
                Ok(()) => {
                    tracing::info!(attempt, generation = inner.generation.load(Ordering::SeqCst), "reconnected");
                    break;
                }
                Err(e) => tracing::warn!(attempt, error = %e, "reconnect attempt failed"),
            }
        }
    }
}

/// Probe the link periodically. Failures are only logged: recovery is driven
/// by the reader's error path.
async fn keep_alive(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let period = inner.config.keepalive_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = closed(&mut shutdown) => return,
            _ = ticker.tick() => {}
        }
        if inner.current_state() != ConnectionState::Ready {
            continue;
        }
        match inner.request("ping", json!([]), true).await {
            Ok(_) => tracing::trace!("keep-alive ok"),
            Err(e) => tracing::warn!(error = %e, "keep-alive probe failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let config = ConnectionConfig::new("ws://localhost:8000/rpc", "root", "hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn default_timings() {
        let config = ConnectionConfig::new("ws://x/rpc", "u", "p");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert!(!config.fail_pending_on_reconnect);
    }

    fn install_link(
        inner: &Inner,
        generation: u64,
        waiting: &[&str],
    ) -> (
        mpsc::UnboundedSender<Outbound>,
        mpsc::UnboundedReceiver<Outbound>,
        Vec<oneshot::Receiver<RpcResponse>>,
    ) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let mut pending = HashMap::new();
        let mut receivers = Vec::new();
        for id in waiting {
            let (tx, rx) = oneshot::channel();
            pending.insert(id.to_string(), tx);
            receivers.push(rx);
        }
        *inner.lock_link() = Some(Link {
            generation,
            outbound: outbound.clone(),
            pending,
        });
        (outbound, outbound_rx, receivers)
    }

    #[tokio::test]
    async fn responses_from_an_older_generation_are_dropped() {
        let inner = Inner::new(ConnectionConfig::new("ws://x/rpc", "u", "p"));
        let (_outbound, _outbound_rx, mut receivers) = install_link(&inner, 2, &["call-1"]);
        let mut rx = receivers.remove(0);

        inner.dispatch(1, r#"{"id":"call-1","result":"stale"}"#);
        assert!(rx.try_recv().is_err());
        assert!(inner.is_waiting(2, "call-1"));

        inner.dispatch(2, r#"{"id":"call-1","result":"fresh"}"#);
        let response = rx.try_recv().expect("current generation is delivered");
        assert_eq!(response.into_result().unwrap(), json!("fresh"));
        assert!(!inner.is_waiting(2, "call-1"));
    }

    #[tokio::test]
    async fn unknown_ids_and_garbage_frames_are_ignored() {
        let inner = Inner::new(ConnectionConfig::new("ws://x/rpc", "u", "p"));
        let (_outbound, _outbound_rx, _receivers) = install_link(&inner, 1, &["call-1"]);

        inner.dispatch(1, r#"{"id":"other","result":1}"#);
        inner.dispatch(1, "not json");
        inner.dispatch(1, r#"{"result":1}"#);
        assert!(inner.is_waiting(1, "call-1"));
    }

    #[tokio::test]
    async fn writer_skips_frames_of_calls_no_longer_waiting() {
        let inner = Inner::new(ConnectionConfig::new("ws://x/rpc", "u", "p"));
        let (outbound, outbound_rx, _receivers) = install_link(&inner, 1, &["live"]);
        let (sink, mut wire) = futures::channel::mpsc::unbounded::<Message>();
        let writer = tokio::spawn(write_loop(Arc::clone(&inner), 1, sink, outbound_rx));

        for (id, text) in [("timed-out", "stale"), ("live", "fresh")] {
            let frame = Message::Text(text.into());
            outbound.send(Outbound { id: id.into(), frame }).unwrap();
        }
        assert_eq!(wire.next().await, Some(Message::Text("fresh".into())));

        drop(outbound);
        inner.discard(1);
        writer.await.unwrap();
        assert_eq!(wire.next().await, None);
    }

    #[tokio::test]
    async fn connect_to_unreachable_host_fails() {
        let mut config = ConnectionConfig::new("ws://127.0.0.1:1/rpc", "u", "p");
        config.request_timeout = Duration::from_millis(500);
        let err = Connection::connect(config).await.err().expect("connect should fail");
        assert!(err.is_transport(), "unexpected error: {err}");
    }
}
