//! Background repair of usage counters and idle-tenant period rollover.
//!
//! The sweep shares nothing with the request path except the ledger: it has
//! its own clock and ledger handle, so it can run in-process on a
//! [`ReconcileScheduler`] or as the standalone `entitlement-reconcile` binary.

mod scheduler;
mod service;

pub use scheduler::ReconcileScheduler;
pub use service::{ReconcileReport, ReconcileService};
