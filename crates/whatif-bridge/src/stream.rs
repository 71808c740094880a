//! Stream transport: one task per WebSocket connection.
//!
//! The task selects over the reconnect flag, the acceptor shutdown signal,
//! incoming frames and the connection's outbound queue, in that order.
//! Replies and subscription data go through the outbound queue, so they reach
//! the client in the order they were queued. On shutdown the subscriptions are
//! dropped along with anything still queued, and the connection writes one
//! reconnect notification before the close frame.

use crate::connections::Registration;
use crate::handler::{call_target, dispatch_call, parse_request, AppState};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use whatif_core::protocol::METHOD_SUBSCRIPTION_STOP;
use whatif_core::{BridgeError, ProcedureKind, RichValue, RpcRequest, RpcResponse, ServerFrame};

type Subscriptions = HashMap<String, JoinHandle<()>>;

/// WebSocket upgrade handler.
pub async fn handle_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_connection(socket, state))
}

async fn serve_connection(socket: WebSocket, state: AppState) {
    let Registration {
        id,
        tx,
        mut rx,
        mut reconnect,
    } = state.connections.register().await;
    let mut shutdown = state.shutdown.clone();
    let (mut sink, mut incoming) = socket.split();
    let mut subscriptions = Subscriptions::new();

    let mut closing = *shutdown.borrow_and_update() || *reconnect.borrow_and_update();
    while !closing {
        tokio::select! {
            biased;
            _ = reconnect.changed() => {
                closing = true;
            }
            _ = shutdown.changed() => {
                closing = true;
            }
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    on_text(&state, &tx, &mut subscriptions, &text);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Stream connection {} read error: {}", id, e);
                    break;
                }
            },
            Some(frame) = rx.recv() => {
                if let Err(e) = send_frame(&mut sink, &frame).await {
                    debug!("Stream connection {} write error: {}", id, e);
                    break;
                }
            }
        }
    }

    for (_, task) in subscriptions.drain() {
        task.abort();
    }
    drop(rx);

    if closing {
        match send_frame(&mut sink, &ServerFrame::Reconnect).await {
            Ok(()) => debug!("Stream connection {} told to reconnect", id),
            Err(e) => debug!("Stream connection {} missed reconnect: {}", id, e),
        }
        let _ = sink.send(Message::Close(None)).await;
    }

    state.connections.unregister(&id).await;
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), String> {
    let text = frame.to_text().map_err(|e| e.to_string())?;
    sink.send(Message::Text(text)).await.map_err(|e| e.to_string())
}

/// Queue a reply without waiting; the caller is the queue's only consumer.
fn reply(tx: &mpsc::Sender<ServerFrame>, response: RpcResponse) {
    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(ServerFrame::Response(response)) {
        warn!("Outbound queue full, reply dropped");
    }
}

fn subscription_key(id: &Option<Value>) -> String {
    id.as_ref().map(Value::to_string).unwrap_or_default()
}

fn on_text(
    state: &AppState,
    tx: &mpsc::Sender<ServerFrame>,
    subscriptions: &mut Subscriptions,
    text: &str,
) {
    let request = match parse_request(text) {
        Ok(request) => request,
        Err(response) => return reply(tx, response),
    };

    if request.method == METHOD_SUBSCRIPTION_STOP {
        if let Some(task) = subscriptions.remove(&subscription_key(&request.id)) {
            task.abort();
        }
        return reply(tx, RpcResponse::stopped(request.id));
    }

    if request.kind() == Some(ProcedureKind::Subscription) {
        return start_subscription(state, tx, subscriptions, request);
    }

    let state = state.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let response = dispatch_call(&state, request).await;
        let _ = tx.send(ServerFrame::Response(response)).await;
    });
}

fn start_subscription(
    state: &AppState,
    tx: &mpsc::Sender<ServerFrame>,
    subscriptions: &mut Subscriptions,
    request: RpcRequest,
) {
    let id = request.id.clone();
    let key = subscription_key(&id);
    subscriptions.retain(|_, task| !task.is_finished());

    let prepared = if subscriptions.contains_key(&key) {
        Err(BridgeError::InvalidRequest {
            message: format!("subscription id {} is already active", key),
        })
    } else {
        call_target(&request).and_then(|(_, params)| {
            let input = state.decode_input(params.input)?;
            Ok((params.path, input))
        })
    };

    match prepared {
        Ok((path, input)) => {
            let task = tokio::spawn(run_subscription(state.clone(), tx.clone(), id, path, input));
            subscriptions.insert(key, task);
        }
        Err(e) => {
            error!("RPC error for subscription: {}", e);
            reply(tx, RpcResponse::from_error(id, &e));
        }
    }
}

async fn run_subscription(
    state: AppState,
    tx: mpsc::Sender<ServerFrame>,
    id: Option<Value>,
    path: String,
    input: RichValue,
) {
    let mut events = match state.router.subscribe(&path, input).await {
        Ok(events) => events,
        Err(e) => {
            error!("Subscription {} rejected: {}", path, e);
            let _ = tx.send(ServerFrame::Response(RpcResponse::from_error(id, &e))).await;
            return;
        }
    };

    if tx.send(ServerFrame::Response(RpcResponse::started(id.clone()))).await.is_err() {
        return;
    }

    while let Some(event) = events.next().await {
        let response = match event.and_then(|value| state.encode_output(&value)) {
            Ok(data) => RpcResponse::data(id.clone(), data),
            Err(e) => {
                error!("Subscription {} failed: {}", path, e);
                let _ = tx.send(ServerFrame::Response(RpcResponse::from_error(id, &e))).await;
                return;
            }
        };
        if tx.send(ServerFrame::Response(response)).await.is_err() {
            return;
        }
    }

    debug!("Subscription {} completed", path);
    let _ = tx.send(ServerFrame::Response(RpcResponse::stopped(id))).await;
}
