//! Bridge server lifecycle.
//!
//! One TCP listener serves the request routes and the WebSocket acceptor.
//! The server is an owned value: `start` binds and spawns the accept loop,
//! `stop` tears it down in order (stream connections with their reconnect
//! notification, then the request listener). `start` and `stop` never
//! interleave. An accept loop that fails or panics is a transport fault.

use crate::accept::{self, Acceptor};
use crate::connections::ConnectionRegistry;
use crate::handler::{handle_health, handle_rpc, AppState};
use crate::stream::handle_stream;
use axum::{
    routing::{get, post},
    Router,
};
use futures::FutureExt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use whatif_core::config::RouteConfig;
use whatif_core::{
    default_transformer, BridgeError, ProcedureRouter, Result, ServerOptions, Transformer,
};

/// Interval at which `stop` polls for stream connections to finish closing.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Lifecycle state of a [`BridgeServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
}

struct Running {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    shutdown_timeout: Duration,
}

struct Inner {
    router: ProcedureRouter,
    transformer: Arc<dyn Transformer>,
    connections: Arc<ConnectionRegistry>,
    state: watch::Sender<ServerState>,
    /// Held for the whole of `start` and `stop`.
    lifecycle: Mutex<()>,
    running: Mutex<Option<Running>>,
}

impl Inner {
    fn set_state(&self, state: ServerState) {
        self.state.send_replace(state);
    }

    /// Binding failed: the server never reached `Listening`.
    async fn fail_start(&self, addr: SocketAddr, err: &std::io::Error) {
        error!("Failed to bind {}: {}", addr, err);
        self.connections.broadcast_reconnect().await;
        self.set_state(ServerState::Stopped);
    }

    async fn transport_fault(&self, message: &str) {
        let mut guard = self.running.lock().await;
        let Some(mut running) = guard.take() else {
            debug!("Transport fault while not listening: {}", message);
            return;
        };
        error!("Bridge transport fault on {}: {}", running.addr, message);
        running.conn_shutdown_tx.send_replace(true);
        self.connections.broadcast_reconnect().await;
        if let Some(tx) = running.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.set_state(ServerState::Stopped);
    }
}

/// The desktop bridge server.
pub struct BridgeServer {
    inner: Arc<Inner>,
}

impl BridgeServer {
    /// Create a stopped server with the default transformer.
    pub fn new(router: ProcedureRouter) -> Self {
        Self::with_transformer(router, default_transformer())
    }

    pub fn with_transformer(router: ProcedureRouter, transformer: Arc<dyn Transformer>) -> Self {
        let (state, _) = watch::channel(ServerState::Stopped);
        Self {
            inner: Arc::new(Inner {
                router,
                transformer,
                connections: Arc::new(ConnectionRegistry::default()),
                state,
                lifecycle: Mutex::new(()),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.borrow()
    }

    /// Subscribe to lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<ServerState> {
        self.inner.state.subscribe()
    }

    /// Number of open stream connections.
    pub fn open_connections(&self) -> usize {
        self.inner.connections.count()
    }

    /// Bound address while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.running.lock().await.as_ref().map(|r| r.addr)
    }

    /// Validate `options`, bind, and start serving.
    ///
    /// Configuration errors are returned before any socket is opened. Returns
    /// the bound address, which differs from the requested one for port `0`.
    pub async fn start(&self, options: &ServerOptions) -> Result<SocketAddr> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let mut running = self.inner.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Err(BridgeError::AlreadyRunning { addr: current.addr });
        }

        let config = options.validate()?;
        let addr = config.bind_addr()?;

        self.inner.set_state(ServerState::Starting);
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.inner.fail_start(addr, &e).await;
                return Err(BridgeError::Bind {
                    addr: addr.to_string(),
                    message: e.to_string(),
                    source: Some(e),
                });
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local) => local,
            Err(e) => {
                self.inner.fail_start(addr, &e).await;
                return Err(e.into());
            }
        };

        self.launch(&mut running, listener, local_addr, config.shutdown_timeout);
        info!(
            "Bridge server listening on {} ({} procedures, {} codec)",
            local_addr,
            self.inner.router.len(),
            self.inner.transformer.name()
        );
        Ok(local_addr)
    }

    /// Spawn the accept loop on `acceptor` and publish `Listening`.
    ///
    /// The caller holds the `running` lock, so a fault raised by the new loop
    /// waits until the session is recorded.
    fn launch<A: Acceptor>(
        &self,
        running: &mut Option<Running>,
        acceptor: A,
        addr: SocketAddr,
        shutdown_timeout: Duration,
    ) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);

        let app = build_router(AppState {
            router: self.inner.router.clone(),
            transformer: Arc::clone(&self.inner.transformer),
            connections: Arc::clone(&self.inner.connections),
            shutdown: conn_shutdown_rx,
        });

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(accept::serve(acceptor, app, shutdown_rx))
                .catch_unwind()
                .await;
            let message = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => format!("accept failed: {}", e),
                Err(_) => "accept loop panicked".to_string(),
            };
            inner.transport_fault(&message).await;
        });

        *running = Some(Running {
            addr,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task,
            shutdown_timeout,
        });
        self.inner.set_state(ServerState::Listening);
    }

    /// Stop serving. Safe to call in any state; always ends `Stopped`.
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let running = self.inner.running.lock().await.take();

        let Some(mut running) = running else {
            debug!("Bridge server stop requested while not running");
            self.inner.connections.broadcast_reconnect().await;
            self.inner.set_state(ServerState::Stopped);
            return;
        };

        info!("Stopping bridge server on {}", running.addr);

        running.conn_shutdown_tx.send_replace(true);
        self.inner.connections.broadcast_reconnect().await;
        if !self.wait_for_streams(running.shutdown_timeout).await {
            warn!(
                "{} stream connections still open after {:?}",
                self.open_connections(),
                running.shutdown_timeout
            );
        }

        if let Some(tx) = running.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(running.shutdown_timeout, &mut running.task)
            .await
            .is_err()
        {
            warn!(
                "Graceful shutdown timed out after {:?}, aborting",
                running.shutdown_timeout
            );
            running.task.abort();
            let _ = (&mut running.task).await;
        }

        self.inner.set_state(ServerState::Stopped);
        info!("Bridge server stopped");
    }

    /// Handle a fault of the underlying transport: broadcast reconnect, close
    /// every stream connection and stop. No restart is attempted.
    pub async fn on_transport_fault(&self, message: &str) {
        self.inner.transport_fault(message).await;
    }

    async fn wait_for_streams(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.inner.connections.count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
        true
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        if let Ok(mut running) = self.inner.running.try_lock() {
            if let Some(mut running) = running.take() {
                running.conn_shutdown_tx.send_replace(true);
                if let Some(tx) = running.shutdown_tx.take() {
                    let _ = tx.send(());
                }
                running.task.abort();
            }
        }
    }
}

/// Build the HTTP router for one listening session.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(RouteConfig::HEALTH_PATH, get(handle_health))
        .route(RouteConfig::RPC_PATH, post(handle_rpc))
        .route(RouteConfig::STREAM_PATH, get(handle_stream))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
