//! Entitlement telemetry.
//!
//! Every admission decision is emitted as a structured `tracing` event and
//! counted in [`EntitlementMetrics`]. The observer also keeps two pieces of
//! per-tenant state: a latch so the utilization warning fires once, and a
//! deny counter that raises an alert on every Nth denial.

mod metrics;
mod observer;
#[cfg(feature = "tracing-subscriber")]
mod subscriber;

pub use metrics::{Counter, EntitlementMetrics, MetricsSummary};
pub use observer::{DenyReason, EntitlementObserver, ObserverConfig};
#[cfg(feature = "tracing-subscriber")]
pub use subscriber::init_tracing;
