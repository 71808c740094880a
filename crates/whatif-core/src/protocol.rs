//! Wire messages shared by the request and stream transports.
//!
//! Both transports speak JSON-RPC 2.0. A call names its kind in `method`
//! and carries `{path, input}` in `params`; `input` and result `data` are
//! codec envelopes.
//!
//! ```text
//! -> {"jsonrpc":"2.0","id":1,"method":"query","params":{"path":"apps.get","input":{...}}}
//! <- {"jsonrpc":"2.0","id":1,"result":{"type":"data","data":{...}}}
//! <- {"jsonrpc":"2.0","id":null,"method":"reconnect"}
//! ```

use crate::error::{BridgeError, Result};
use crate::procedure::ProcedureKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const METHOD_SUBSCRIPTION_STOP: &str = "subscription.stop";
pub const METHOD_RECONNECT: &str = "reconnect";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// `params` of a query, mutation or subscription request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallParams {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

impl RpcRequest {
    /// Create a call request. `input` is an already-encoded envelope.
    pub fn call(id: u64, kind: ProcedureKind, path: impl Into<String>, input: Option<Value>) -> Self {
        let params = CallParams {
            path: path.into(),
            input,
        };
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::Number(id.into())),
            method: kind.as_str().to_string(),
            params: serde_json::to_value(params).ok(),
        }
    }

    /// Create a `subscription.stop` request for an earlier subscription id.
    pub fn stop(id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::Number(id.into())),
            method: METHOD_SUBSCRIPTION_STOP.to_string(),
            params: None,
        }
    }

    /// The procedure kind named by `method`, if it is one.
    pub fn kind(&self) -> Option<ProcedureKind> {
        self.method.parse().ok()
    }

    /// Parse `params` as call parameters.
    pub fn call_params(&self) -> Result<CallParams> {
        let params = self.params.clone().ok_or_else(|| BridgeError::InvalidInput {
            path: self.method.clone(),
            message: "missing params".to_string(),
        })?;
        serde_json::from_value(params).map_err(|e| BridgeError::InvalidInput {
            path: self.method.clone(),
            message: e.to_string(),
        })
    }

    /// Validate the envelope fields common to every request.
    pub fn check_version(&self) -> Result<()> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(BridgeError::InvalidRequest {
                message: format!("expected jsonrpc {}, got {:?}", JSONRPC_VERSION, self.jsonrpc),
            });
        }
        Ok(())
    }
}

/// Result payload variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResultPayload {
    Started,
    Data { data: Value },
    Stopped,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    fn with_result(id: Option<Value>, result: ResultPayload) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn data(id: Option<Value>, data: Value) -> Self {
        Self::with_result(id, ResultPayload::Data { data })
    }

    pub fn started(id: Option<Value>) -> Self {
        Self::with_result(id, ResultPayload::Started)
    }

    pub fn stopped(id: Option<Value>) -> Self {
        Self::with_result(id, ResultPayload::Stopped)
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
        }
    }

    pub fn from_error(id: Option<Value>, err: &BridgeError) -> Self {
        Self::error(id, err.to_rpc_error_code(), err.to_string())
    }

    /// Numeric id, when the peer used one.
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    /// Collapse into the data payload, turning an error object into `Err`.
    pub fn into_data(self) -> Result<Value> {
        if let Some(err) = self.error {
            return Err(BridgeError::from_rpc(err.code, err.message));
        }
        match self.result {
            Some(ResultPayload::Data { data }) => Ok(data),
            Some(other) => Err(BridgeError::Codec {
                message: format!("expected data result, got {:?}", other),
            }),
            None => Err(BridgeError::Codec {
                message: "response has neither result nor error".to_string(),
            }),
        }
    }
}

/// Server-initiated reconnect notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectNotification {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
}

impl Default for ReconnectNotification {
    fn default() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: METHOD_RECONNECT.to_string(),
        }
    }
}

/// Anything the server can push down a stream connection.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Response(RpcResponse),
    Reconnect,
}

impl ServerFrame {
    /// Parse a text frame received from the server.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("method").and_then(Value::as_str) == Some(METHOD_RECONNECT) {
            return Ok(ServerFrame::Reconnect);
        }
        Ok(ServerFrame::Response(serde_json::from_value(value)?))
    }

    /// Render as a text frame.
    pub fn to_text(&self) -> Result<String> {
        Ok(match self {
            ServerFrame::Response(response) => serde_json::to_string(response)?,
            ServerFrame::Reconnect => serde_json::to_string(&ReconnectNotification::default())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_request_shape() {
        let req = RpcRequest::call(7, ProcedureKind::Subscription, "system.ticks", None);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 7, "method": "subscription", "params": {"path": "system.ticks"}})
        );
        assert_eq!(req.kind(), Some(ProcedureKind::Subscription));
    }

    #[test]
    fn test_stop_is_not_a_kind() {
        let req = RpcRequest::stop(3);
        assert_eq!(req.kind(), None);
        assert_eq!(req.method, METHOD_SUBSCRIPTION_STOP);
    }

    #[test]
    fn test_reconnect_frame() {
        let text = ServerFrame::Reconnect.to_text().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&text).unwrap(),
            json!({"jsonrpc": "2.0", "id": null, "method": "reconnect"})
        );
        assert!(matches!(ServerFrame::parse(&text).unwrap(), ServerFrame::Reconnect));
    }

    #[test]
    fn test_result_payload_tags() {
        let text = ServerFrame::Response(RpcResponse::started(Some(json!(1))))
            .to_text()
            .unwrap();
        assert!(text.contains(r#""type":"started""#));

        let response = RpcResponse::data(Some(json!(2)), json!({"json": 1}));
        assert_eq!(response.numeric_id(), Some(2));
        assert_eq!(response.into_data().unwrap(), json!({"json": 1}));
    }

    #[test]
    fn test_error_response_into_data() {
        let err = BridgeError::ProcedureNotFound { path: "x".into() };
        let response = RpcResponse::from_error(Some(json!(1)), &err);
        let back = response.into_data().unwrap_err();
        assert_eq!(back.to_rpc_error_code(), -32601);
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut req = RpcRequest::call(1, ProcedureKind::Query, "healthCheck", None);
        req.jsonrpc = "1.0".into();
        assert!(req.check_version().is_err());
    }
}
