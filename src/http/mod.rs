//! HTTP handling subsystem.
//!
//! # Data Flow
//! ```text
//! raw TCP connection (hijacked: no server framework owns it)
//!     → request.rs (parse head + body off the buffered stream)
//!     → handler.rs (classify via the upgrade handshaker)
//!         plain:   outbound.rs → forward.rs (pooled client) → response.rs
//!         upgrade: outbound.rs → upgrade::client → upgrade::handshake → upgrade::tunnel
//!     → connection closed
//! ```

pub mod forward;
pub mod handler;
pub mod outbound;
pub mod request;
pub mod response;
pub mod server;

pub use handler::{Completion, GatewayHandler, HandlerState};
pub use request::{HijackedConnection, InboundRequest};
pub use server::GatewayServer;
