//! Persistence backend boundary.
//!
//! The store never talks to a database directly. It acquires a
//! [`StorageSession`] from a [`StorageProvider`] and drives it through three
//! capabilities:
//!
//! - **Filtered reads** over quotes and payments ([`QuoteQuery`], [`PaymentQuery`])
//!   with ordering and offset pagination.
//! - **Entry state**: whether a record id is already persisted, and by which tenant.
//! - **Atomic commit** of a batch of [`Change`]s (all or nothing).
//!
//! Implementations: [`InMemoryStorage`] (tests/dev) and [`PostgresStorage`].

pub mod in_memory;
pub mod postgres;
pub mod query;

pub use in_memory::{InMemorySession, InMemoryStorage};
pub use postgres::{PostgresSession, PostgresStorage};
pub use query::{PaymentQuery, QuoteQuery};

use strike_core::{Payment, Quote, RecordId, TenantId, TenantOwned};

use crate::error::BackendError;

/// Kind of record a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Quote,
    Payment,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Payment => "payment",
        }
    }
}

/// A record as handed to the backend for writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Quote(Quote),
    Payment(Payment),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Quote(_) => RecordKind::Quote,
            Self::Payment(_) => RecordKind::Payment,
        }
    }

    pub fn id(&self) -> RecordId {
        match self {
            Self::Quote(q) => *strike_core::Entity::id(q),
            Self::Payment(p) => *strike_core::Entity::id(p),
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        match self {
            Self::Quote(q) => q.tenant_id(),
            Self::Payment(p) => p.tenant_id(),
        }
    }
}

/// A pending write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Add a record that is not yet persisted.
    Insert(Record),
    /// Overwrite the mutable fields of a persisted record. The stored tenant is never changed.
    Update(Record),
}

impl Change {
    pub fn record(&self) -> &Record {
        match self {
            Self::Insert(r) | Self::Update(r) => r,
        }
    }
}

/// Whether a record id is known to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Not persisted yet.
    New,
    /// Persisted and owned by `tenant_id`.
    Persisted { tenant_id: TenantId },
}

/// Entity that can be written through the store.
pub trait Persistable: TenantOwned<Id = RecordId> + Clone + Send + Sync {
    const KIND: RecordKind;

    fn to_record(&self) -> Record;
}

impl Persistable for Quote {
    const KIND: RecordKind = RecordKind::Quote;

    fn to_record(&self) -> Record {
        Record::Quote(self.clone())
    }
}

impl Persistable for Payment {
    const KIND: RecordKind = RecordKind::Payment;

    fn to_record(&self) -> Record {
        Record::Payment(self.clone())
    }
}

/// Source of backend sessions (connection pool, in-memory database, ...).
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    type Session: StorageSession;

    /// Acquire a session scoped to one logical operation.
    async fn open(&self) -> Result<Self::Session, BackendError>;
}

/// One acquired backend handle.
///
/// Dropping a session releases it; [`StorageSession::close`] does the same
/// explicitly and reports release failures.
#[async_trait::async_trait]
pub trait StorageSession: Send {
    /// Quotes matching `query`, in no particular order.
    async fn fetch_quotes(&mut self, query: &QuoteQuery) -> Result<Vec<Quote>, BackendError>;

    /// Payments matching `query`, newest `created_at` first, after skipping `query.offset`.
    async fn fetch_payments(&mut self, query: &PaymentQuery) -> Result<Vec<Payment>, BackendError>;

    async fn entry_state(&mut self, kind: RecordKind, id: RecordId) -> Result<EntryState, BackendError>;

    /// Durably apply all `changes` atomically.
    async fn commit(&mut self, changes: Vec<Change>) -> Result<(), BackendError>;

    async fn close(self) -> Result<(), BackendError>;
}
