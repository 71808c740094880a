//! What If Store desktop bridge server.
//!
//! Serves the desktop procedure table to the storefront renderer:
//!
//! - `POST /rpc` - queries and mutations (request transport)
//! - `GET /ws` - subscriptions over a WebSocket (stream transport)
//! - `GET /health` - liveness check
//!
//! Stopping the server, or a transport fault, pushes a reconnect notification
//! down every open stream connection.

mod accept;
pub mod connections;
pub mod handler;
pub mod procedures;
pub mod server;
pub mod stream;

pub use connections::ConnectionRegistry;
pub use procedures::desktop_router;
pub use server::{BridgeServer, ServerState};
