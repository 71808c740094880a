//! Payload codec shared by the request and stream transports.
//!
//! Both transports must run every input and output through the same
//! [`Transformer`]; a payload encoded by one and decoded by another would lose
//! its rich types.

mod tagged;
mod value;

pub use tagged::{Envelope, Meta, TaggedJson};
pub use value::{format_date, parse_date, RichValue};

use crate::error::Result;
use serde_json::Value;
use std::sync::Arc;

/// Converts [`RichValue`]s to and from their wire JSON.
pub trait Transformer: Send + Sync + std::fmt::Debug + 'static {
    /// Short identifier, logged at startup.
    fn name(&self) -> &'static str;

    fn serialize(&self, value: &RichValue) -> Result<Value>;

    fn deserialize(&self, wire: Value) -> Result<RichValue>;
}

/// The transformer both ends use unless told otherwise.
pub fn default_transformer() -> Arc<dyn Transformer> {
    Arc::new(TaggedJson)
}
