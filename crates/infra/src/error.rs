//! Error taxonomy of the persistence layer.
//!
//! - [`BackendError`]: anything the storage backend reports (query, commit,
//!   connection). Carries the driver error as its nested `source`.
//! - [`StoreError`]: what [`TenantScopedStore`](crate::store::TenantScopedStore)
//!   callers see. Tenant-guard rejections are caller bugs and are never retried.

use std::error::Error as StdError;

use strike_core::TenantId;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Coarse classification of backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Unique-key or concurrent-write conflict.
    Conflict,
    /// The row targeted by an update does not exist.
    NotFound,
    /// Connection, pool or I/O failure.
    Unavailable,
    /// A stored row could not be decoded into a record.
    Decode,
    Other,
}

/// Storage backend failure with an optional nested cause.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackendError {
    kind: BackendErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: BackendErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Conflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unavailable, message)
    }

    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Message of the nested cause, if any.
    pub fn inner_message(&self) -> Option<String> {
        self.source.as_ref().map(|e| e.to_string())
    }
}

/// Error returned by tenant-scoped store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The bound tenant id is blank.
    #[error("tenant id is not set, cannot perform any database operation")]
    Precondition,

    /// The write would touch a record owned by another tenant.
    #[error(
        "the updated entity doesn't belong to this tenant ({entity_tenant} vs. {bound_tenant}), cannot continue"
    )]
    CrossTenant {
        entity_tenant: TenantId,
        bound_tenant: TenantId,
    },

    #[error("storage failure: {0}")]
    Storage(#[from] BackendError),

    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Message of the innermost cause below this error, if there is one.
    pub fn inner_message(&self) -> Option<String> {
        let mut cause = self.source()?;
        while let Some(next) = cause.source() {
            cause = next;
        }
        Some(cause.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("connection reset by peer")]
    struct DriverError;

    #[test]
    fn backend_error_keeps_nested_cause() {
        let err = BackendError::with_source(BackendErrorKind::Unavailable, "commit failed", DriverError);

        assert_eq!(err.kind(), BackendErrorKind::Unavailable);
        assert_eq!(err.to_string(), "commit failed");
        assert_eq!(err.inner_message().as_deref(), Some("connection reset by peer"));
        assert!(err.source().is_some());
    }

    #[test]
    fn store_error_reports_innermost_cause() {
        let err: StoreError =
            BackendError::with_source(BackendErrorKind::Other, "commit failed", DriverError).into();

        assert_eq!(err.to_string(), "storage failure: commit failed");
        assert_eq!(err.inner_message().as_deref(), Some("connection reset by peer"));
    }

    #[test]
    fn guard_errors_have_no_cause() {
        assert_eq!(StoreError::Precondition.inner_message(), None);

        let err = StoreError::CrossTenant {
            entity_tenant: TenantId::from("t1"),
            bound_tenant: TenantId::from("t2"),
        };
        assert!(err.to_string().contains("(t1 vs. t2)"));
        assert_eq!(err.inner_message(), None);
    }
}
