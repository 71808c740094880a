//! Registry of open stream connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info};
use uuid::Uuid;
use whatif_core::config::StreamConfig;
use whatif_core::ServerFrame;

/// Identifier of one stream connection.
pub type ConnectionId = Uuid;

/// Endpoints handed to a newly registered connection.
pub struct Registration {
    pub id: ConnectionId,
    /// Queue into this connection, shared with its subscription tasks.
    pub tx: mpsc::Sender<ServerFrame>,
    pub rx: mpsc::Receiver<ServerFrame>,
    /// Flips to `true` once the connection has been told to reconnect.
    pub reconnect: watch::Receiver<bool>,
}

/// Currently open stream connections and their reconnect flags.
///
/// The flag is separate from the outbound queue: a connection whose queue is
/// full still learns that it must reconnect.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, watch::Sender<bool>>>,
    count: AtomicUsize,
    buffer: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(StreamConfig::OUTBOUND_BUFFER)
    }
}

impl ConnectionRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            count: AtomicUsize::new(0),
            buffer,
        }
    }

    /// Number of open connections.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub async fn register(&self) -> Registration {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        let (flag, reconnect) = watch::channel(false);
        self.connections.write().await.insert(id, flag);
        let open = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        info!("Stream connection {} opened ({} open)", id, open);
        Registration { id, tx, rx, reconnect }
    }

    pub async fn unregister(&self, id: &ConnectionId) {
        if self.connections.write().await.remove(id).is_some() {
            let open = self.count.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
            info!("Stream connection {} closed ({} open)", id, open);
        }
    }

    /// Tell every open connection to reconnect.
    ///
    /// Returns how many connections were newly flagged; a connection already
    /// told is not counted again.
    pub async fn broadcast_reconnect(&self) -> usize {
        let connections = self.connections.read().await;
        let flagged = connections
            .values()
            .filter(|flag| flag.send_if_modified(|told| !std::mem::replace(told, true)))
            .count();
        debug!("Reconnect broadcast to {} connections", flagged);
        flagged
    }
}
