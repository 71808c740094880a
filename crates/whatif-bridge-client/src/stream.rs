//! Stream transport: subscriptions over one lazily opened WebSocket.
//!
//! A background task owns the socket. Replies are routed to callers by
//! JSON-RPC id through the pending table. A reconnect notification from the
//! server fails everything in flight with [`BridgeError::ReconnectRequested`]
//! and is re-published on [`StreamTransport::reconnects`]; the next operation
//! opens a fresh connection.

use crate::link::{Link, OperationOutput};
use crate::subscription::{StopFn, Subscription};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;
use whatif_core::config::RouteConfig;
use whatif_core::protocol::ResultPayload;
use whatif_core::{
    BridgeError, Operation, ProcedureKind, Result, RichValue, RpcRequest, RpcResponse, ServerFrame,
    Transformer,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Pending {
    Call(oneshot::Sender<Result<RichValue>>),
    Stream {
        started: Option<oneshot::Sender<Result<()>>>,
        events: mpsc::UnboundedSender<Result<RichValue>>,
    },
}

impl Pending {
    fn fail(self, err: BridgeError) {
        match self {
            Pending::Call(tx) => {
                let _ = tx.send(Err(err));
            }
            Pending::Stream {
                started: Some(tx), ..
            } => {
                let _ = tx.send(Err(err));
            }
            Pending::Stream { events, .. } => {
                let _ = events.send(Err(err));
            }
        }
    }
}

type PendingMap = Arc<StdMutex<HashMap<u64, Pending>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, Pending>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fail_all(pending: &PendingMap, make_err: impl Fn() -> BridgeError) {
    let drained: Vec<_> = lock(pending).drain().collect();
    for (_, entry) in drained {
        entry.fail(make_err());
    }
}

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    task: JoinHandle<()>,
}

/// Carries subscriptions (and, if asked, one-shot calls) over `GET /ws`.
pub struct StreamTransport {
    url: Url,
    transformer: Arc<dyn Transformer>,
    timeout: Option<Duration>,
    connection: Mutex<Option<Connection>>,
    reconnects: broadcast::Sender<()>,
}

impl StreamTransport {
    /// `base` is the server origin; `http` becomes `ws` and `https` becomes `wss`.
    pub fn new(base: &Url, transformer: Arc<dyn Transformer>, timeout: Option<Duration>) -> Result<Self> {
        let url = stream_url(base)?;
        let (reconnects, _) = broadcast::channel(16);
        Ok(Self {
            url,
            transformer,
            timeout,
            connection: Mutex::new(None),
            reconnects,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fires once per reconnect notification received from the server.
    pub fn reconnects(&self) -> broadcast::Receiver<()> {
        self.reconnects.subscribe()
    }

    /// True while a socket is open.
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| !c.task.is_finished())
    }

    /// Close the socket. In-flight operations fail; the next one reconnects.
    pub async fn disconnect(&self) {
        if let Some(conn) = self.connection.lock().await.take() {
            conn.task.abort();
            fail_all(&conn.pending, || BridgeError::SubscriptionClosed {
                reason: "transport disconnected".to_string(),
            });
        }
    }

    async fn connection(&self) -> Result<(mpsc::UnboundedSender<Message>, PendingMap)> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            if !conn.task.is_finished() {
                return Ok((conn.outbound.clone(), Arc::clone(&conn.pending)));
            }
        }

        let connect = connect_async(self.url.as_str());
        let connected = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| BridgeError::Timeout(timeout))?,
            None => connect.await,
        };
        let (ws, _) = connected.map_err(|e| BridgeError::Transport {
            message: format!("Failed to connect to {}: {}", self.url, e),
        })?;
        info!("Stream transport connected to {}", self.url);

        let (outbound, rx) = mpsc::unbounded_channel();
        let pending = PendingMap::default();
        let task = tokio::spawn(run_connection(
            ws,
            rx,
            Arc::clone(&pending),
            Arc::clone(&self.transformer),
            self.reconnects.clone(),
        ));

        *guard = Some(Connection {
            outbound: outbound.clone(),
            pending: Arc::clone(&pending),
            task,
        });
        Ok((outbound, pending))
    }

    async fn await_reply<T>(
        &self,
        id: u64,
        pending: &PendingMap,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        let reply = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    lock(pending).remove(&id);
                    return Err(BridgeError::Timeout(timeout));
                }
            },
            None => rx.await,
        };
        reply.map_err(|_| BridgeError::SubscriptionClosed {
            reason: "connection closed before reply".to_string(),
        })?
    }
}

fn stream_url(base: &Url) -> Result<Url> {
    let invalid = |message: String| BridgeError::Config { message };
    let mut url = base
        .join(RouteConfig::STREAM_PATH)
        .map_err(|e| invalid(format!("Invalid bridge URL {}: {}", base, e)))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("Unsupported bridge URL scheme {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("Cannot use scheme {} for {}", scheme, base)))?;
    Ok(url)
}

fn send(outbound: &mpsc::UnboundedSender<Message>, pending: &PendingMap, id: u64, text: String) -> Result<()> {
    outbound.send(Message::text(text)).map_err(|_| {
        lock(pending).remove(&id);
        BridgeError::Transport {
            message: "stream connection closed".to_string(),
        }
    })
}

#[async_trait]
impl Link for StreamTransport {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn execute(&self, op: Operation) -> Result<OperationOutput> {
        let (outbound, pending) = self.connection().await?;

        let input = if op.input.is_undefined() {
            None
        } else {
            Some(self.transformer.serialize(&op.input)?)
        };
        let text = serde_json::to_string(&RpcRequest::call(op.id, op.kind, op.path.as_str(), input))?;
        debug!("WS {} {} (id {})", op.kind, op.path, op.id);

        if op.kind != ProcedureKind::Subscription {
            let (tx, rx) = oneshot::channel();
            lock(&pending).insert(op.id, Pending::Call(tx));
            send(&outbound, &pending, op.id, text)?;
            let value = self.await_reply(op.id, &pending, rx).await?;
            return Ok(OperationOutput::Value(value));
        }

        let (started_tx, started_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        lock(&pending).insert(
            op.id,
            Pending::Stream {
                started: Some(started_tx),
                events: events_tx,
            },
        );
        send(&outbound, &pending, op.id, text)?;
        self.await_reply(op.id, &pending, started_rx).await?;

        let stop: StopFn = Box::new(move |id| {
            if let Ok(text) = serde_json::to_string(&RpcRequest::stop(id)) {
                let _ = outbound.send(Message::text(text));
            }
        });
        Ok(OperationOutput::Stream(Subscription::new(op.id, events_rx, stop)))
    }
}

async fn run_connection(
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    pending: PendingMap,
    transformer: Arc<dyn Transformer>,
    reconnects: broadcast::Sender<()>,
) {
    let (mut sink, mut incoming) = ws.split();

    let reason = loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        break format!("write failed: {}", e);
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break "transport dropped".to_string();
                }
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    on_frame(text.as_str(), &pending, transformer.as_ref(), &reconnects);
                }
                Some(Ok(Message::Close(_))) | None => break "connection closed".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("read failed: {}", e),
            }
        }
    };

    debug!("Stream transport connection ended: {}", reason);
    // Closed before the drain: a send that races it fails instead of waiting.
    outbound.close();
    fail_all(&pending, || BridgeError::SubscriptionClosed {
        reason: reason.clone(),
    });
}

fn on_frame(
    text: &str,
    pending: &PendingMap,
    transformer: &dyn Transformer,
    reconnects: &broadcast::Sender<()>,
) {
    match ServerFrame::parse(text) {
        Ok(ServerFrame::Reconnect) => {
            info!("Bridge requested reconnect");
            fail_all(pending, || BridgeError::ReconnectRequested);
            let _ = reconnects.send(());
        }
        Ok(ServerFrame::Response(response)) => route(response, pending, transformer),
        Err(e) => warn!("Ignoring unparseable frame from bridge: {}", e),
    }
}

fn route(response: RpcResponse, pending: &PendingMap, transformer: &dyn Transformer) {
    let Some(id) = response.numeric_id() else {
        warn!("Ignoring bridge response without a numeric id");
        return;
    };
    let mut table = lock(pending);
    let Some(entry) = table.remove(&id) else {
        debug!("Ignoring response for unknown id {}", id);
        return;
    };

    match entry {
        Pending::Call(tx) => {
            let result = response
                .into_data()
                .and_then(|data| transformer.deserialize(data));
            let _ = tx.send(result);
        }
        Pending::Stream { started, events } => {
            if let Some(err) = response.error {
                Pending::Stream { started, events }.fail(BridgeError::from_rpc(err.code, err.message));
                return;
            }
            match response.result {
                Some(ResultPayload::Started) => {
                    if let Some(tx) = started {
                        let _ = tx.send(Ok(()));
                    }
                    table.insert(id, Pending::Stream { started: None, events });
                }
                Some(ResultPayload::Data { data }) => {
                    let _ = events.send(transformer.deserialize(data));
                    table.insert(id, Pending::Stream { started, events });
                }
                Some(ResultPayload::Stopped) | None => {
                    if let Some(tx) = started {
                        let _ = tx.send(Err(BridgeError::SubscriptionClosed {
                            reason: "stopped before it started".to_string(),
                        }));
                    }
                }
            }
        }
    }
}
