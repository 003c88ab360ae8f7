//! Usage ledger: entitlement rows, period counters, and the append-only event log.
//!
//! The ledger is the persistence contract the entitlement service and the
//! reconciliation sweep depend on. Request-path writes go through a
//! tenant-scoped [`TenantLedger`] obtained from [`UsageLedger::begin`]; the
//! scope commits atomically or, when dropped uncommitted, rolls back.
//!
//! Backends:
//! - [`MemoryLedger`]: always available, for single-process deployments and tests.
//! - `PostgresLedger`: enable the `postgres` feature.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod store;

pub use memory::{MemoryLedger, MemoryTenantLedger};
#[cfg(feature = "postgres")]
pub use postgres::{PgTenantLedger, PostgresConfig, PostgresLedger};
pub use store::{TenantLedger, UsageLedger};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Tenant scope violation: scope '{scope}' cannot access tenant '{requested}'")]
    TenantMismatch { scope: String, requested: String },

    #[error("Missing tenant id")]
    MissingTenant,

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl LedgerError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Rejects any scoped call naming a tenant other than the one the scope was opened for.
pub(crate) fn ensure_tenant(scope: &str, requested: &str) -> LedgerResult<()> {
    if scope == requested {
        Ok(())
    } else {
        Err(LedgerError::TenantMismatch {
            scope: scope.to_string(),
            requested: requested.to_string(),
        })
    }
}

#[cfg(feature = "postgres")]
pub(crate) trait StorageResultExt<T> {
    fn storage_err(self) -> LedgerResult<T>;
    fn storage_err_ctx(self, context: &str) -> LedgerResult<T>;
}

#[cfg(feature = "postgres")]
impl<T, E: std::fmt::Display> StorageResultExt<T> for std::result::Result<T, E> {
    fn storage_err(self) -> LedgerResult<T> {
        self.map_err(|e| LedgerError::Storage {
            message: e.to_string(),
        })
    }

    fn storage_err_ctx(self, context: &str) -> LedgerResult<T> {
        self.map_err(|e| LedgerError::Storage {
            message: format!("{}: {}", context, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_tenant() {
        assert!(ensure_tenant("tenant-a", "tenant-a").is_ok());
        let err = ensure_tenant("tenant-a", "tenant-b").unwrap_err();
        assert!(matches!(err, LedgerError::TenantMismatch { .. }));
        assert!(err.to_string().contains("tenant-b"));
    }

    #[test]
    fn test_not_found_display() {
        let err = LedgerError::not_found("entitlement tenant-x");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("tenant-x"));
    }
}
