//! Forwarding gateway with protocol-upgrade tunnelling.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────┐
//!                         │                     GATEWAY                      │
//!                         │                                                  │
//!    Client connection    │  ┌──────────┐   ┌──────────┐   ┌─────────────┐   │
//!    ─────────────────────┼─▶│   net    │──▶│  http    │──▶│ handshake   │   │
//!                         │  │ listener │   │ request  │   │ classify    │   │
//!                         │  └──────────┘   └──────────┘   └──────┬──────┘   │
//!                         │                       plain ┌─────────┴───┐      │
//!                         │                             ▼     upgrade ▼      │
//!                         │                    ┌──────────┐   ┌──────────┐   │
//!                         │                    │ forward  │   │ upgrade  │───┼──▶ Upstream
//!                         │                    │ (client) │   │ client   │   │    API server
//!                         │                    └────┬─────┘   └────┬─────┘   │
//!                         │                         ▼              ▼         │
//!    ◀────────────────────┼──────────────── response.rs    101 + tunnel ◀────┼──▶
//!                         │                                                  │
//!                         │   config · observability · lifecycle             │
//!                         └──────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod upgrade;

pub use crate::config::GatewayConfig;
pub use crate::error::GatewayError;
pub use crate::http::{GatewayHandler, GatewayServer};
pub use crate::lifecycle::Shutdown;
