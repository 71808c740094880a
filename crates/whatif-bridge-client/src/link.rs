//! Links and the transport selector.
//!
//! A [`Link`] carries an [`Operation`] to the server. [`SplitLink`] picks one
//! of two links per operation with a predicate; the default predicate sends
//! subscriptions down the stream transport and everything else down the
//! request transport. There is no fallback: a failure of the chosen link is
//! returned to the caller unchanged.

use crate::subscription::Subscription;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use whatif_core::procedure::is_subscription;
use whatif_core::{Operation, Result, RichValue};

/// What an operation produced.
pub enum OperationOutput {
    /// Result of a query or mutation.
    Value(RichValue),
    /// A started subscription.
    Stream(Subscription),
}

impl std::fmt::Debug for OperationOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationOutput::Value(v) => f.debug_tuple("Value").field(v).finish(),
            OperationOutput::Stream(s) => f.debug_tuple("Stream").field(&s.id()).finish(),
        }
    }
}

/// A transport that can execute operations.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn execute(&self, op: Operation) -> Result<OperationOutput>;
}

/// Routing predicate for [`SplitLink`]: `true` selects the first link.
pub type Condition = Arc<dyn Fn(&Operation) -> bool + Send + Sync>;

/// Chooses between two links per operation.
pub struct SplitLink {
    condition: Condition,
    when_true: Arc<dyn Link>,
    when_false: Arc<dyn Link>,
}

impl SplitLink {
    pub fn new(condition: Condition, when_true: Arc<dyn Link>, when_false: Arc<dyn Link>) -> Self {
        Self {
            condition,
            when_true,
            when_false,
        }
    }

    /// Subscriptions to `stream`, everything else to `request`.
    pub fn by_kind(stream: Arc<dyn Link>, request: Arc<dyn Link>) -> Self {
        Self::new(Arc::new(is_subscription), stream, request)
    }

    /// The link `op` would be sent to.
    pub fn select(&self, op: &Operation) -> &Arc<dyn Link> {
        if (self.condition)(op) {
            &self.when_true
        } else {
            &self.when_false
        }
    }
}

#[async_trait]
impl Link for SplitLink {
    fn name(&self) -> &'static str {
        "split"
    }

    async fn execute(&self, op: Operation) -> Result<OperationOutput> {
        let link = self.select(&op);
        debug!("{} {} -> {} transport", op.kind, op.path, link.name());
        link.execute(op).await
    }
}
