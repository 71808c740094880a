//! Request transport: one HTTP POST per query or mutation.

use crate::link::{Link, OperationOutput};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;
use whatif_core::config::RouteConfig;
use whatif_core::{BridgeError, Operation, ProcedureKind, Result, RpcRequest, RpcResponse, Transformer};

/// Sends one-shot calls to `POST /rpc`.
pub struct RequestTransport {
    client: reqwest::Client,
    endpoint: Url,
    transformer: Arc<dyn Transformer>,
    timeout: Option<Duration>,
}

impl RequestTransport {
    /// `base` is the server origin, e.g. `http://127.0.0.1:3232`.
    pub fn new(base: &Url, transformer: Arc<dyn Transformer>, timeout: Option<Duration>) -> Result<Self> {
        let endpoint = base.join(RouteConfig::RPC_PATH).map_err(|e| BridgeError::Config {
            message: format!("Invalid bridge URL {}: {}", base, e),
        })?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| BridgeError::Transport {
            message: format!("Failed to create HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            endpoint,
            transformer,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn map_error(&self, err: reqwest::Error) -> BridgeError {
        match self.timeout {
            Some(timeout) if err.is_timeout() => BridgeError::Timeout(timeout),
            _ => BridgeError::Transport {
                message: err.to_string(),
            },
        }
    }
}

#[async_trait]
impl Link for RequestTransport {
    fn name(&self) -> &'static str {
        "request"
    }

    async fn execute(&self, op: Operation) -> Result<OperationOutput> {
        if op.kind == ProcedureKind::Subscription {
            return Err(BridgeError::InvalidRequest {
                message: format!("{} is a subscription; use the stream transport", op.path),
            });
        }

        let input = if op.input.is_undefined() {
            None
        } else {
            Some(self.transformer.serialize(&op.input)?)
        };
        let request = RpcRequest::call(op.id, op.kind, op.path.as_str(), input);

        debug!("POST {} {} {}", self.endpoint, op.kind, op.path);
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(BridgeError::Transport {
                message: format!("HTTP {} from {}", response.status(), self.endpoint),
            });
        }

        let body: RpcResponse = response.json().await.map_err(|e| self.map_error(e))?;
        let data = body.into_data()?;
        Ok(OperationOutput::Value(self.transformer.deserialize(data)?))
    }
}
