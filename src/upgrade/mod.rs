//! Protocol-upgrade subsystem.
//!
//! # Data Flow
//! ```text
//! inbound headers
//!     → handshake.rs (classify: Upgrade / NotUpgrade)
//!     → client.rs (upgrade round-trip with the upstream)
//!     → handshake.rs (101 Switching Protocols + upstream headers to the client)
//!     → tunnel.rs (byte pump until either side is done)
//! ```
//!
//! # Design Decisions
//! - The tunnel is byte-transparent and does not care which protocol was negotiated
//! - The client never sees a 101 before the upstream has sent one

pub mod client;
pub mod handshake;
pub mod tunnel;

pub use client::{UpgradeOutcome, UpstreamConnection, UpstreamUpgradeClient};
pub use handshake::{classify, ServerHandshaker, SwitchingProtocols, UpgradeDecision};
pub use tunnel::{ClosedBy, Direction, DirectionEnd, DirectionReport, TunnelPump, TunnelReport};
