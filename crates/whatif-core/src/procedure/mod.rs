//! Procedure kinds, call descriptors and the static procedure table.
//!
//! A procedure is a named remote operation. Its kind decides which transport
//! carries it: subscriptions ride the stream transport, everything else the
//! request transport.

mod manifest;
mod router;

pub use manifest::{declared_kind, paths, ProcedureSpec, DESKTOP_MANIFEST};
pub use router::{CallFuture, EventStream, ProcedureRouter, RouterBuilder};

use crate::codec::RichValue;
use crate::error::BridgeError;
use serde::{Deserialize, Serialize};

/// How a procedure is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureKind {
    Query,
    Mutation,
    Subscription,
}

impl ProcedureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureKind::Query => "query",
            ProcedureKind::Mutation => "mutation",
            ProcedureKind::Subscription => "subscription",
        }
    }
}

impl std::str::FromStr for ProcedureKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(ProcedureKind::Query),
            "mutation" => Ok(ProcedureKind::Mutation),
            "subscription" => Ok(ProcedureKind::Subscription),
            other => Err(BridgeError::InvalidRequest {
                message: format!("Unknown procedure kind: {}", other),
            }),
        }
    }
}

impl std::fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An outgoing call as seen by the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: u64,
    pub kind: ProcedureKind,
    pub path: String,
    pub input: RichValue,
}

impl Operation {
    pub fn new(id: u64, kind: ProcedureKind, path: impl Into<String>, input: RichValue) -> Self {
        Self {
            id,
            kind,
            path: path.into(),
            input,
        }
    }
}

/// Transport selection condition: true routes to the stream transport.
pub fn is_subscription(op: &Operation) -> bool {
    op.kind == ProcedureKind::Subscription
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip_names() {
        for kind in [
            ProcedureKind::Query,
            ProcedureKind::Mutation,
            ProcedureKind::Subscription,
        ] {
            assert_eq!(kind.as_str().parse::<ProcedureKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::json!(kind.as_str())
            );
        }
        let err = "Subscription".parse::<ProcedureKind>().unwrap_err();
        assert!(matches!(err, BridgeError::InvalidRequest { .. }));
    }

    #[test]
    fn test_only_subscriptions_select_stream() {
        let op = |kind| Operation::new(1, kind, "x", RichValue::Undefined);
        assert!(is_subscription(&op(ProcedureKind::Subscription)));
        assert!(!is_subscription(&op(ProcedureKind::Query)));
        assert!(!is_subscription(&op(ProcedureKind::Mutation)));
    }
}
