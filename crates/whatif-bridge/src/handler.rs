//! One-shot request handling shared by `POST /rpc` and the stream socket.

use crate::connections::ConnectionRegistry;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};
use whatif_core::protocol::CallParams;
use whatif_core::{
    BridgeError, ProcedureKind, ProcedureRouter, Result, RichValue, RpcRequest, RpcResponse,
    Transformer,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: ProcedureRouter,
    pub transformer: Arc<dyn Transformer>,
    pub connections: Arc<ConnectionRegistry>,
    /// Flips to `true` when the stream acceptor is closing.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    /// Decode a wire input. An absent input is `undefined`.
    pub fn decode_input(&self, input: Option<Value>) -> Result<RichValue> {
        match input {
            None => Ok(RichValue::Undefined),
            Some(wire) => self.transformer.deserialize(wire),
        }
    }

    /// Encode a handler result. Failures are internal errors (-32603).
    pub fn encode_output(&self, output: &RichValue) -> Result<Value> {
        self.transformer
            .serialize(output)
            .map_err(|e| BridgeError::Encode {
                message: e.to_string(),
            })
    }
}

/// Parse a raw request body.
pub fn parse_request(raw: &str) -> std::result::Result<RpcRequest, RpcResponse> {
    serde_json::from_str(raw).map_err(|e| {
        RpcResponse::error(None, -32700, format!("Parse error: {}", e))
    })
}

/// Validate a call request and return its kind and params.
pub fn call_target(request: &RpcRequest) -> Result<(ProcedureKind, CallParams)> {
    request.check_version()?;
    let kind = request.kind().ok_or_else(|| BridgeError::ProcedureNotFound {
        path: request.method.clone(),
    })?;
    Ok((kind, request.call_params()?))
}

/// Run a query or mutation and build its response.
pub async fn dispatch_call(state: &AppState, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.clone();

    match run_call(state, &request).await {
        Ok(data) => RpcResponse::data(id, data),
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            RpcResponse::from_error(id, &e)
        }
    }
}

async fn run_call(state: &AppState, request: &RpcRequest) -> Result<Value> {
    let (kind, params) = call_target(request)?;
    if kind == ProcedureKind::Subscription {
        return Err(BridgeError::InvalidRequest {
            message: format!("{} is a subscription; use the stream transport", params.path),
        });
    }

    debug!("RPC call: {} {}", kind, params.path);
    let input = state.decode_input(params.input)?;
    let output = state.router.call(kind, &params.path, input).await?;
    state.encode_output(&output)
}

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Request transport endpoint.
pub async fn handle_rpc(State(state): State<AppState>, body: String) -> impl IntoResponse {
    let response = match parse_request(&body) {
        Ok(request) => dispatch_call(&state, request).await,
        Err(response) => response,
    };
    (StatusCode::OK, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use whatif_core::default_transformer;

    async fn double(n: i64) -> Result<i64> {
        Ok(n * 2)
    }

    fn state() -> AppState {
        let router = ProcedureRouter::builder()
            .query("double", double)
            .subscription("never", |_: ()| async {
                Ok::<_, BridgeError>(futures::stream::empty::<Result<i64>>())
            })
            .build()
            .unwrap();
        let (_tx, shutdown) = watch::channel(false);
        AppState {
            router,
            transformer: default_transformer(),
            connections: Arc::new(ConnectionRegistry::default()),
            shutdown,
        }
    }

    fn request(method: &str, path: &str, input: Option<Value>) -> RpcRequest {
        let mut params = json!({"path": path});
        if let Some(input) = input {
            params["input"] = input;
        }
        RpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(1)),
            method: method.into(),
            params: Some(params),
        }
    }

    #[tokio::test]
    async fn test_dispatch_query() {
        let response = dispatch_call(&state(), request("query", "double", Some(json!({"json": 21})))).await;
        assert_eq!(response.into_data().unwrap(), json!({"json": 42}));
    }

    #[tokio::test]
    async fn test_subscription_rejected_on_request_transport() {
        let response = dispatch_call(&state(), request("subscription", "never", None)).await;
        assert_eq!(response.error.unwrap().code, -32600);
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_found() {
        let response = dispatch_call(&state(), request("explode", "double", None)).await;
        assert_eq!(response.error.unwrap().code, -32601);
    }

    /// Reads anything, writes nothing.
    #[derive(Debug)]
    struct WriteOnlyFails;

    impl Transformer for WriteOnlyFails {
        fn name(&self) -> &'static str {
            "write-only-fails"
        }

        fn serialize(&self, _value: &RichValue) -> Result<Value> {
            Err(BridgeError::Codec {
                message: "cannot encode".into(),
            })
        }

        fn deserialize(&self, wire: Value) -> Result<RichValue> {
            default_transformer().deserialize(wire)
        }
    }

    #[tokio::test]
    async fn test_output_encoding_failure_is_internal_error() {
        let state = AppState {
            transformer: Arc::new(WriteOnlyFails),
            ..state()
        };
        let response = dispatch_call(&state, request("query", "double", Some(json!({"json": 1})))).await;
        assert_eq!(response.error.unwrap().code, -32603);
    }

    #[test]
    fn test_parse_error_response() {
        let response = parse_request("{not json").unwrap_err();
        assert_eq!(response.error.unwrap().code, -32700);
        assert!(response.id.is_none());
    }
}
