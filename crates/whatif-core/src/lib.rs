//! What If Store Core - shared building blocks for the desktop bridge.
//!
//! The storefront UI talks to the local desktop shell over a typed procedure
//! bridge. This crate holds everything both ends agree on: the payload codec,
//! the procedure table and its manifest, the JSON-RPC wire messages, the error
//! type, configuration, and the local-machine procedures (installed apps,
//! system info).
//!
//! The HTTP/WebSocket server lives in `whatif-bridge`; the client-side
//! transports and selector live in `whatif-bridge-client`.
//!
//! # Example
//!
//! ```rust,ignore
//! use whatif_core::{ProcedureRouter, DESKTOP_MANIFEST};
//!
//! let router = ProcedureRouter::builder()
//!     .query("healthCheck", |_: ()| async { Ok("ok") })
//!     .build()?;
//! router.validate(&DESKTOP_MANIFEST)?;
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod platform;
pub mod procedure;
pub mod protocol;
pub mod system;

// Re-export commonly used types
pub use codec::{default_transformer, RichValue, TaggedJson, Transformer};
pub use config::{BridgeConfig, BridgeDefaults, RouteConfig, ServerOptions, StreamConfig};
pub use error::{BridgeError, Result};
pub use platform::{AppDirWatcher, AppSource, InstalledApp, LaunchOutcome};
pub use procedure::{
    is_subscription, Operation, ProcedureKind, ProcedureRouter, ProcedureSpec, RouterBuilder,
    DESKTOP_MANIFEST,
};
pub use protocol::{RpcRequest, RpcResponse, ServerFrame};
pub use system::{SystemInfo, Tick};
