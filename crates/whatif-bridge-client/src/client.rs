//! Typed entry point over the transport selector.

use crate::link::{Link, OperationOutput, SplitLink};
use crate::request::RequestTransport;
use crate::stream::StreamTransport;
use crate::subscription::Subscription;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use url::Url;
use whatif_core::config::BridgeDefaults;
use whatif_core::{default_transformer, BridgeError, Operation, ProcedureKind, Result, RichValue, Transformer};

/// Client construction options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Per-call timeout for both transports. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Shared by both transports.
    pub transformer: Arc<dyn Transformer>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(10)),
            transformer: default_transformer(),
        }
    }
}

/// Calls bridge procedures by path.
pub struct BridgeClient {
    link: Arc<dyn Link>,
    stream: Option<Arc<StreamTransport>>,
    next_id: AtomicU64,
}

impl BridgeClient {
    /// Client over an arbitrary link.
    pub fn new(link: Arc<dyn Link>) -> Self {
        Self {
            link,
            stream: None,
            next_id: AtomicU64::new(1),
        }
    }

    /// Client for the bridge at `base_url` (e.g. `http://127.0.0.1:3232`).
    ///
    /// Subscriptions go over the stream transport, everything else over the
    /// request transport. Nothing is connected until the first call.
    pub fn connect(base_url: &str, options: ClientOptions) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| BridgeError::Config {
            message: format!("Invalid bridge URL {}: {}", base_url, e),
        })?;

        let request = Arc::new(RequestTransport::new(
            &base,
            Arc::clone(&options.transformer),
            options.request_timeout,
        )?);
        let stream = Arc::new(StreamTransport::new(
            &base,
            Arc::clone(&options.transformer),
            options.request_timeout,
        )?);

        let split = SplitLink::by_kind(stream.clone(), request);
        Ok(Self {
            link: Arc::new(split),
            stream: Some(stream),
            next_id: AtomicU64::new(1),
        })
    }

    /// Reconnect notifications seen by the stream transport, if there is one.
    pub fn reconnects(&self) -> Option<broadcast::Receiver<()>> {
        self.stream.as_ref().map(|s| s.reconnects())
    }

    pub async fn query(&self, path: &str, input: impl Into<RichValue>) -> Result<RichValue> {
        self.call(ProcedureKind::Query, path, input.into()).await
    }

    pub async fn mutation(&self, path: &str, input: impl Into<RichValue>) -> Result<RichValue> {
        self.call(ProcedureKind::Mutation, path, input.into()).await
    }

    pub async fn subscribe(&self, path: &str, input: impl Into<RichValue>) -> Result<Subscription> {
        match self.execute(ProcedureKind::Subscription, path, input.into()).await? {
            OperationOutput::Stream(sub) => Ok(sub),
            OperationOutput::Value(_) => Err(BridgeError::Codec {
                message: format!("{} returned a value instead of a stream", path),
            }),
        }
    }

    /// Zero-argument health-check query; `Ok` means the bridge is reachable.
    pub async fn health_check(&self) -> Result<()> {
        self.query(BridgeDefaults::HEALTH_CHECK_PROCEDURE, RichValue::Undefined)
            .await
            .map(|_| ())
    }

    async fn call(&self, kind: ProcedureKind, path: &str, input: RichValue) -> Result<RichValue> {
        match self.execute(kind, path, input).await? {
            OperationOutput::Value(value) => Ok(value),
            OperationOutput::Stream(_) => Err(BridgeError::Codec {
                message: format!("{} returned a stream instead of a value", path),
            }),
        }
    }

    async fn execute(&self, kind: ProcedureKind, path: &str, input: RichValue) -> Result<OperationOutput> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.link.execute(Operation::new(id, kind, path, input)).await
    }
}
