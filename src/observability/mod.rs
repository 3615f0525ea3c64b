//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway handler and tunnel produce:
//!     → logging.rs (structured log events, per-connection span)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape), when enabled
//! ```
//!
//! # Design Decisions
//! - Connection ID flows through every event via the connection span
//! - Metrics are cheap no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
