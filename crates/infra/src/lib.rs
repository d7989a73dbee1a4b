//! Persistence layer for Strike quotes and payments.
//!
//! - [`backend`]: storage contract plus in-memory and Postgres implementations.
//! - [`store`]: [`TenantScopedStore`], the only supported way to read or write records.
//! - [`config`]: database connection settings.

pub mod backend;
pub mod config;
pub mod error;
pub mod store;

pub use backend::{InMemoryStorage, PostgresStorage, StorageProvider, StorageSession};
pub use config::{ConfigError, DatabaseConfig};
pub use error::{BackendError, BackendErrorKind, StoreError, StoreResult};
pub use store::TenantScopedStore;

pub use tokio_util::sync::CancellationToken;
