//! Static procedure table.
//!
//! Handlers are registered once at boot through [`RouterBuilder`] with their
//! concrete input and output types. The built [`ProcedureRouter`] is checked
//! against a manifest before the server accepts traffic, so a missing or
//! misclassified procedure fails startup rather than the first call.

use super::{ProcedureKind, ProcedureSpec};
use crate::codec::RichValue;
use crate::error::{BridgeError, Result};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Future returned by a query or mutation handler.
pub type CallFuture = BoxFuture<'static, Result<RichValue>>;

/// Event stream returned by a subscription handler.
pub type EventStream = BoxStream<'static, Result<RichValue>>;

type CallHandler = Arc<dyn Fn(RichValue) -> CallFuture + Send + Sync>;
type StreamHandler = Arc<dyn Fn(RichValue) -> BoxFuture<'static, Result<EventStream>> + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Call(CallHandler),
    Stream(StreamHandler),
}

#[derive(Clone)]
struct Entry {
    kind: ProcedureKind,
    handler: Handler,
}

/// Decode a procedure input.
///
/// An absent input is offered first as `null` (unit and `Option` inputs) and
/// then as `{}` (structs whose fields are all optional).
fn decode_input<I: DeserializeOwned>(path: &str, input: RichValue) -> Result<I> {
    let invalid = |e: BridgeError| BridgeError::InvalidInput {
        path: path.to_string(),
        message: match e {
            BridgeError::Codec { message } => message,
            other => other.to_string(),
        },
    };

    match input {
        RichValue::Undefined | RichValue::Null => RichValue::Null
            .deserialize_into::<I>()
            .or_else(|_| RichValue::Object(Default::default()).deserialize_into::<I>())
            .map_err(invalid),
        other => other.deserialize_into::<I>().map_err(invalid),
    }
}

/// Collects handlers before the router is frozen.
#[derive(Default)]
pub struct RouterBuilder {
    entries: HashMap<String, Entry>,
    duplicates: Vec<String>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(mut self, path: &str, entry: Entry) -> Self {
        if self.entries.insert(path.to_string(), entry).is_some() {
            self.duplicates.push(path.to_string());
        }
        self
    }

    fn call_entry<I, O, F, Fut>(path: &str, kind: ProcedureKind, handler: F) -> Entry
    where
        I: DeserializeOwned + Send + 'static,
        O: Into<RichValue> + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let path = path.to_string();
        let handler = Arc::new(handler);
        let call: CallHandler = Arc::new(move |input: RichValue| {
            let decoded = decode_input::<I>(&path, input);
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let output = handler(decoded?).await?;
                Ok(output.into())
            })
        });
        Entry {
            kind,
            handler: Handler::Call(call),
        }
    }

    /// Register a query.
    pub fn query<I, O, F, Fut>(self, path: &str, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Into<RichValue> + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let entry = Self::call_entry(path, ProcedureKind::Query, handler);
        self.insert(path, entry)
    }

    /// Register a mutation.
    pub fn mutation<I, O, F, Fut>(self, path: &str, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Into<RichValue> + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let entry = Self::call_entry(path, ProcedureKind::Mutation, handler);
        self.insert(path, entry)
    }

    /// Register a subscription. The handler resolves to the event stream; an
    /// error from the handler itself rejects the subscription before it starts.
    pub fn subscription<I, O, F, Fut, S>(self, path: &str, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Into<RichValue> + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S>> + Send + 'static,
        S: Stream<Item = Result<O>> + Send + 'static,
    {
        let owned_path = path.to_string();
        let handler = Arc::new(handler);
        let stream: StreamHandler = Arc::new(move |input: RichValue| {
            let decoded = decode_input::<I>(&owned_path, input);
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let events = handler(decoded?).await?;
                Ok(events.map(|item| item.map(Into::into)).boxed())
            })
        });
        self.insert(
            path,
            Entry {
                kind: ProcedureKind::Subscription,
                handler: Handler::Stream(stream),
            },
        )
    }

    /// Freeze the table. Fails if any path was registered twice.
    pub fn build(self) -> Result<ProcedureRouter> {
        if !self.duplicates.is_empty() {
            return Err(BridgeError::Router {
                message: format!("duplicate procedures: {}", self.duplicates.join(", ")),
            });
        }
        Ok(ProcedureRouter {
            entries: Arc::new(self.entries),
        })
    }
}

/// Immutable procedure table. Cheap to clone.
#[derive(Clone)]
pub struct ProcedureRouter {
    entries: Arc<HashMap<String, Entry>>,
}

impl std::fmt::Debug for ProcedureRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureRouter")
            .field("procedures", &self.procedures())
            .finish()
    }
}

impl ProcedureRouter {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Registered procedures, sorted by path.
    pub fn procedures(&self) -> Vec<(String, ProcedureKind)> {
        let mut specs: Vec<_> = self
            .entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.kind))
            .collect();
        specs.sort_by(|a, b| a.0.cmp(&b.0));
        specs
    }

    pub fn kind_of(&self, path: &str) -> Option<ProcedureKind> {
        self.entries.get(path).map(|e| e.kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the table against a manifest: every declared procedure must be
    /// registered with the declared kind, and nothing undeclared may be served.
    pub fn validate(&self, manifest: &[ProcedureSpec]) -> Result<()> {
        let mut problems = Vec::new();

        for spec in manifest {
            match self.kind_of(spec.path) {
                None => problems.push(format!("missing {} {}", spec.kind, spec.path)),
                Some(kind) if kind != spec.kind => problems.push(format!(
                    "{} registered as {}, declared as {}",
                    spec.path, kind, spec.kind
                )),
                Some(_) => {}
            }
        }

        let mut undeclared: Vec<_> = self
            .entries
            .keys()
            .filter(|path| !manifest.iter().any(|spec| spec.path == path.as_str()))
            .cloned()
            .collect();
        undeclared.sort();
        for path in undeclared {
            problems.push(format!("undeclared procedure {}", path));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Router {
                message: problems.join("; "),
            })
        }
    }

    fn lookup(&self, path: &str) -> Result<&Entry> {
        self.entries
            .get(path)
            .ok_or_else(|| BridgeError::ProcedureNotFound {
                path: path.to_string(),
            })
    }

    /// Invoke a query or mutation. The requested kind must match the
    /// registered one.
    pub async fn call(&self, kind: ProcedureKind, path: &str, input: RichValue) -> Result<RichValue> {
        let entry = self.lookup(path)?;
        if entry.kind != kind {
            return Err(BridgeError::KindMismatch {
                path: path.to_string(),
                expected: kind.to_string(),
                actual: entry.kind.to_string(),
            });
        }
        let Handler::Call(handler) = &entry.handler else {
            return Err(BridgeError::KindMismatch {
                path: path.to_string(),
                expected: kind.to_string(),
                actual: ProcedureKind::Subscription.to_string(),
            });
        };
        debug!("Procedure call: {} {}", kind, path);
        handler(input).await
    }

    /// Start a subscription and return its event stream.
    pub async fn subscribe(&self, path: &str, input: RichValue) -> Result<EventStream> {
        let entry = self.lookup(path)?;
        let Handler::Stream(handler) = &entry.handler else {
            return Err(BridgeError::KindMismatch {
                path: path.to_string(),
                expected: ProcedureKind::Subscription.to_string(),
                actual: entry.kind.to_string(),
            });
        };
        debug!("Procedure subscribe: {}", path);
        handler(input).await
    }
}
