//! Client-side readiness flag driven by the health check.

use crate::client::BridgeClient;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Whether a ready flag may go back to `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadinessPolicy {
    /// Once ready, always ready.
    #[default]
    Sticky,
    /// A reconnect notification clears the flag until the next successful check.
    ResetOnDisconnect,
}

/// Tracks whether the bridge has answered a health check.
pub struct ReadinessCheck {
    client: Arc<BridgeClient>,
    policy: ReadinessPolicy,
    ready: watch::Sender<bool>,
}

impl ReadinessCheck {
    pub fn new(client: Arc<BridgeClient>, policy: ReadinessPolicy) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            client,
            policy,
            ready,
        }
    }

    pub fn policy(&self) -> ReadinessPolicy {
        self.policy
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Receiver that sees every transition of the flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Run the health check unless already ready. Returns the flag.
    ///
    /// A failure is logged and leaves the flag untouched; nothing retries.
    pub async fn check(&self) -> bool {
        if self.is_ready() {
            return true;
        }

        match self.client.health_check().await {
            Ok(()) => {
                let changed = self.ready.send_if_modified(|ready| !std::mem::replace(ready, true));
                if changed {
                    info!("Bridge is ready");
                }
                true
            }
            Err(e) => {
                warn!("Bridge readiness check failed: {}", e);
                false
            }
        }
    }

    /// Called when the stream connection was told to reconnect.
    pub fn on_disconnect(&self) {
        if self.policy != ReadinessPolicy::ResetOnDisconnect {
            return;
        }
        if self.ready.send_if_modified(|ready| std::mem::replace(ready, false)) {
            info!("Bridge readiness reset after reconnect request");
        }
    }

    /// Feed the client's reconnect notifications into [`Self::on_disconnect`].
    ///
    /// Returns `None` when the client has no stream transport.
    pub fn watch_disconnects(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut reconnects = self.client.reconnects()?;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                match reconnects.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => this.on_disconnect(),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}
