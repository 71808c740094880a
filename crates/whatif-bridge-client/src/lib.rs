//! Client side of the What If Store desktop bridge.
//!
//! [`BridgeClient::connect`] builds both transports around one shared
//! [`whatif_core::Transformer`] and routes each call with a [`SplitLink`]:
//! subscriptions over the WebSocket stream transport, queries and mutations
//! over HTTP. [`ReadinessCheck`] turns the health-check procedure into a
//! watchable ready flag.

pub mod client;
pub mod link;
pub mod readiness;
pub mod request;
pub mod stream;
pub mod subscription;

pub use client::{BridgeClient, ClientOptions};
pub use link::{Condition, Link, OperationOutput, SplitLink};
pub use readiness::{ReadinessCheck, ReadinessPolicy};
pub use request::RequestTransport;
pub use stream::StreamTransport;
pub use subscription::Subscription;
