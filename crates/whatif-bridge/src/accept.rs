//! Accept loop for the bridge listener.
//!
//! Each accepted socket is served by hyper with upgrades enabled, so the
//! WebSocket route works on the same listener as the request routes. Errors
//! that belong to a single peer are skipped. Any other accept error ends the
//! loop and is returned to the caller as a transport fault.

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Source of incoming connections.
pub(crate) trait Acceptor: Send + 'static {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Errors that end one pending connection but leave the listener usable.
fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

/// Serve `app` on every connection from `acceptor` until `shutdown` fires.
///
/// A dropped `shutdown` sender counts as a shutdown request. After the loop
/// ends, open HTTP connections finish their in-flight requests before this
/// returns. Upgraded WebSocket connections are not waited for; they close on
/// their own shutdown signal.
pub(crate) async fn serve<A: Acceptor>(
    mut acceptor: A,
    app: Router,
    mut shutdown: oneshot::Receiver<()>,
) -> io::Result<()> {
    let (drain_tx, drain_rx) = watch::channel(false);
    let (close_tx, close_rx) = watch::channel(());

    let result = loop {
        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => {
                info!("Bridge listener shutting down");
                break Ok(());
            }
            accepted = acceptor.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) if is_connection_error(&e) => {
                    debug!("Incoming connection dropped: {}", e);
                    continue;
                }
                Err(e) => break Err(e),
            },
        };

        let service = TowerToHyperService::new(app.clone());
        let mut drain = drain_rx.clone();
        let close = close_rx.clone();

        tokio::spawn(async move {
            let builder = Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let mut draining = false;
            loop {
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(e) = result {
                            debug!("Connection from {} ended: {}", peer, e);
                        }
                        break;
                    }
                    _ = drain.changed(), if !draining => {
                        draining = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }
            drop(close);
        });
    };

    drain_tx.send_replace(true);
    drop(close_rx);
    if close_tx.receiver_count() > 0 {
        debug!("Waiting for {} connections to finish", close_tx.receiver_count());
    }
    close_tx.closed().await;

    if let Err(e) = &result {
        warn!("Bridge listener failed: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_errors_are_not_fatal() {
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
        ] {
            assert!(is_connection_error(&io::Error::from(kind)));
        }
        assert!(!is_connection_error(&io::Error::other("listener socket lost")));
        assert!(!is_connection_error(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    /// Fails every accept with a transient error first, then shuts down.
    struct Flaky {
        remaining: usize,
    }

    impl Acceptor for Flaky {
        fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
            let fail = self.remaining > 0;
            self.remaining = self.remaining.saturating_sub(1);
            async move {
                if fail {
                    Err(io::Error::from(io::ErrorKind::ConnectionAborted))
                } else {
                    std::future::pending().await
                }
            }
        }
    }

    #[tokio::test]
    async fn test_transient_errors_keep_serving() {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(serve(Flaky { remaining: 3 }, Router::new(), shutdown_rx));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    struct Broken;

    impl Acceptor for Broken {
        fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
            async { Err(io::Error::other("listener socket lost")) }
        }
    }

    #[tokio::test]
    async fn test_listener_error_ends_loop() {
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        let err = serve(Broken, Router::new(), shutdown_rx).await.unwrap_err();
        assert_eq!(err.to_string(), "listener socket lost");
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_loop() {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        drop(shutdown_tx);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        serve(listener, Router::new(), shutdown_rx).await.unwrap();
    }
}
