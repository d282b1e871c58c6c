#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use nino_memory::db::{Connection, ConnectionConfig, ConnectionState};
use nino_memory::embedding::EmbeddingProvider;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

/// How the fake server answers one request.
pub enum Reply {
    Ok(Value),
    Err(i64, String),
    /// Answer after a delay without blocking later requests.
    Delayed(Duration, Value),
    /// Never answer.
    Silent,
}

type Handler = dyn Fn(&str, &Value) -> Reply + Send + Sync;

/// A WebSocket RPC server on 127.0.0.1 speaking `{id, method, params}`.
///
/// `signin` and `use` are answered automatically unless the handler is asked
/// first via [`FakeServer::start_raw`].
pub struct FakeServer {
    port: u16,
    connections: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    drop_tx: broadcast::Sender<()>,
}

impl FakeServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        Self::start_raw(move |method, params| match method {
            "signin" => Reply::Ok(json!("token")),
            "use" | "ping" => Reply::Ok(Value::Null),
            _ => handler(method, params),
        })
        .await
    }

    pub async fn start_raw<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handler: Arc<Handler> = Arc::new(handler);
        let connections = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (drop_tx, _) = broadcast::channel(4);

        let server = Self {
            port,
            connections: Arc::clone(&connections),
            calls: Arc::clone(&calls),
            drop_tx: drop_tx.clone(),
        };

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(
                    ws,
                    Arc::clone(&handler),
                    Arc::clone(&calls),
                    drop_tx.subscribe(),
                ));
            }
        });

        server
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/rpc", self.port)
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Close every open connection from the server side.
    pub fn drop_connections(&self) {
        let _ = self.drop_tx.send(());
    }

    /// Params of every received call to `method`, in arrival order.
    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Every received call as `(method, params)`, in arrival order.
    pub fn all_calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.url(), "root", "secret");
        config.request_timeout = Duration::from_millis(500);
        config.reconnect_interval = Duration::from_millis(50);
        config.keepalive_interval = Duration::from_secs(60);
        config
    }

    pub async fn connect(&self) -> Connection {
        Connection::connect(self.config()).await.unwrap()
    }
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    handler: Arc<Handler>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    mut drop_rx: broadcast::Receiver<()>,
) {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            _ = drop_rx.recv() => {
                let _ = out_tx.send(Message::Close(None));
                break;
            }
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let request: Value = serde_json::from_str(text.as_str()).unwrap();
                let id = request["id"].clone();
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let params = request["params"].clone();
                calls.lock().unwrap().push((method.clone(), params.clone()));

                match handler(&method, &params) {
                    Reply::Ok(result) => {
                        let _ = out_tx.send(frame_text(json!({"id": id, "result": result})));
                    }
                    Reply::Err(code, message) => {
                        let body = json!({"id": id, "error": {"code": code, "message": message}});
                        let _ = out_tx.send(frame_text(body));
                    }
                    Reply::Delayed(delay, result) => {
                        let out_tx = out_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = out_tx.send(frame_text(json!({"id": id, "result": result})));
                        });
                    }
                    Reply::Silent => {}
                }
            }
        }
    }

    drop(out_tx);
    let _ = writer.await;
}

fn frame_text(body: Value) -> Message {
    Message::Text(body.to_string().into())
}

/// Wait until the connection reports `target`, or panic after two seconds.
pub async fn wait_for_state(conn: &Connection, target: ConnectionState) {
    let mut rx = conn.subscribe_state();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("connection never reached {target}, stuck at {}", conn.state()))
        .unwrap();
}

/// A unit vector with a spike at `seed`.
pub fn spike(dim: usize, seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim];
    v[seed % dim] = 1.0;
    v
}

/// Deterministic embedder backed by a fixed text-to-vector table.
pub struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    pub calls: AtomicUsize,
}

impl TableEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no embedding for {text:?}"))
    }
}
