//! In-memory storage backend.
//!
//! Intended for tests/dev. Not optimized for performance.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use strike_core::{Payment, Quote, RecordId, TenantOwned};

use super::{Change, EntryState, PaymentQuery, QuoteQuery, Record, RecordKind, StorageProvider, StorageSession};
use crate::error::BackendError;

#[derive(Debug, Default)]
struct Tables {
    quotes: BTreeMap<RecordId, Quote>,
    payments: BTreeMap<RecordId, Payment>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    queries: AtomicUsize,
    open_sessions: AtomicUsize,
    fail_next_commit: Mutex<Option<BackendError>>,
}

/// In-memory quote/payment storage shared by every session opened from it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    shared: Arc<Shared>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read calls that reached the backend.
    pub fn query_count(&self) -> usize {
        self.shared.queries.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet released.
    pub fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::SeqCst)
    }

    /// Make the next commit fail with `error` without applying anything.
    pub fn fail_next_commit(&self, error: BackendError) {
        // The slot is a plain Option, so a poisoned lock leaves nothing half-written.
        *self
            .shared
            .fail_next_commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Snapshot of every stored quote, across tenants.
    pub fn all_quotes(&self) -> Vec<Quote> {
        self.shared
            .tables
            .read()
            .map(|t| t.quotes.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every stored payment, across tenants.
    pub fn all_payments(&self) -> Vec<Payment> {
        self.shared
            .tables
            .read()
            .map(|t| t.payments.values().cloned().collect())
            .unwrap_or_default()
    }

    fn session(&self) -> InMemorySession {
        self.shared.open_sessions.fetch_add(1, Ordering::SeqCst);
        InMemorySession {
            storage: self.clone(),
        }
    }
}

#[async_trait::async_trait]
impl StorageProvider for InMemoryStorage {
    type Session = InMemorySession;

    async fn open(&self) -> Result<InMemorySession, BackendError> {
        Ok(self.session())
    }
}

/// Session over an [`InMemoryStorage`]; released on drop.
#[derive(Debug)]
pub struct InMemorySession {
    storage: InMemoryStorage,
}

impl InMemorySession {
    fn shared(&self) -> &Shared {
        &self.storage.shared
    }

    fn poisoned() -> BackendError {
        BackendError::unavailable("in-memory storage lock poisoned")
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.shared().open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

fn validate(tables: &Tables, change: &Change) -> Result<(), BackendError> {
    let record = change.record();
    let id = record.id();
    let exists = match record.kind() {
        RecordKind::Quote => tables.quotes.contains_key(&id),
        RecordKind::Payment => tables.payments.contains_key(&id),
    };

    match (change, exists) {
        (Change::Insert(_), true) => Err(BackendError::conflict(format!(
            "{} {id} already exists",
            record.kind().as_str()
        ))),
        (Change::Update(_), false) => Err(BackendError::not_found(format!(
            "{} {id} does not exist",
            record.kind().as_str()
        ))),
        _ => Ok(()),
    }
}

fn apply(tables: &mut Tables, change: Change) {
    match change {
        Change::Insert(Record::Quote(q)) => {
            tables.quotes.insert(*strike_core::Entity::id(&q), q);
        }
        Change::Insert(Record::Payment(p)) => {
            tables.payments.insert(*strike_core::Entity::id(&p), p);
        }
        Change::Update(Record::Quote(mut q)) => {
            if let Some(stored) = tables.quotes.get_mut(strike_core::Entity::id(&q)) {
                // Ownership is fixed at insert time.
                q.assign_tenant(stored.tenant_id().clone());
                *stored = q;
            }
        }
        Change::Update(Record::Payment(mut p)) => {
            if let Some(stored) = tables.payments.get_mut(strike_core::Entity::id(&p)) {
                p.assign_tenant(stored.tenant_id().clone());
                *stored = p;
            }
        }
    }
}

#[async_trait::async_trait]
impl StorageSession for InMemorySession {
    async fn fetch_quotes(&mut self, query: &QuoteQuery) -> Result<Vec<Quote>, BackendError> {
        self.shared().queries.fetch_add(1, Ordering::SeqCst);
        let tables = self.shared().tables.read().map_err(|_| Self::poisoned())?;

        Ok(tables
            .quotes
            .values()
            .filter(|q| query.matches(q))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn fetch_payments(&mut self, query: &PaymentQuery) -> Result<Vec<Payment>, BackendError> {
        self.shared().queries.fetch_add(1, Ordering::SeqCst);
        let tables = self.shared().tables.read().map_err(|_| Self::poisoned())?;

        Ok(query.apply(tables.payments.values()))
    }

    async fn entry_state(&mut self, kind: RecordKind, id: RecordId) -> Result<EntryState, BackendError> {
        let tables = self.shared().tables.read().map_err(|_| Self::poisoned())?;

        let tenant_id = match kind {
            RecordKind::Quote => tables.quotes.get(&id).map(|q| q.tenant_id().clone()),
            RecordKind::Payment => tables.payments.get(&id).map(|p| p.tenant_id().clone()),
        };

        Ok(match tenant_id {
            Some(tenant_id) => EntryState::Persisted { tenant_id },
            None => EntryState::New,
        })
    }

    async fn commit(&mut self, changes: Vec<Change>) -> Result<(), BackendError> {
        let injected = self
            .shared()
            .fail_next_commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(err) = injected {
            return Err(err);
        }

        let mut tables = self.shared().tables.write().map_err(|_| Self::poisoned())?;

        // Validate the whole batch before touching anything.
        for change in &changes {
            validate(&tables, change)?;
        }
        for change in changes {
            apply(&mut tables, change);
        }

        Ok(())
    }

    async fn close(self) -> Result<(), BackendError> {
        Ok(())
    }
}
