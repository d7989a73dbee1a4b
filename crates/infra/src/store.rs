//! Tenant-scoped access to quotes and payments.
//!
//! A [`TenantScopedStore`] is opened per logical request with the tenant it
//! serves. The binding is fixed for the store's lifetime, so a store can
//! never be rebound to another tenant while in use. Every read is filtered by
//! that tenant, and [`TenantScopedStore::store`] refuses to touch records
//! owned by anybody else.
//!
//! The store owns one backend session. It is released by
//! [`TenantScopedStore::close`] or, failing that, when the store is dropped,
//! whether the work succeeded or not.

use std::future::Future;

use strike_core::{Payment, Quote, TenantId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use crate::backend::{
    Change, EntryState, PaymentQuery, Persistable, QuoteQuery, StorageProvider, StorageSession,
};
use crate::error::{BackendError, StoreError, StoreResult};

#[derive(Debug)]
pub struct TenantScopedStore<S: StorageSession> {
    tenant_id: TenantId,
    session: S,
}

impl<S: StorageSession> TenantScopedStore<S> {
    /// Acquire a session from `provider` and bind it to `tenant_id`.
    pub async fn open<P>(provider: &P, tenant_id: TenantId) -> StoreResult<Self>
    where
        P: StorageProvider<Session = S>,
    {
        let session = provider.open().await?;
        Ok(Self::with_session(session, tenant_id))
    }

    /// Bind an already-acquired session to `tenant_id`.
    pub fn with_session(session: S, tenant_id: TenantId) -> Self {
        Self { tenant_id, session }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Release the backend session.
    pub async fn close(self) -> StoreResult<()> {
        self.session.close().await?;
        Ok(())
    }

    /// Quotes of this tenant not yet reconciled against the provider.
    #[instrument(skip(self, cancel), fields(tenant_id = %self.tenant_id))]
    pub async fn get_unobserved(&mut self, cancel: &CancellationToken) -> StoreResult<Vec<Quote>> {
        self.ensure_tenant()?;

        let query = QuoteQuery::unobserved(self.tenant_id.clone());
        cancellable(cancel, self.session.fetch_quotes(&query)).await
    }

    /// Observed, paid quotes of this tenant that still need converting.
    #[instrument(skip(self, cancel), fields(tenant_id = %self.tenant_id))]
    pub async fn get_paid_quotes_to_convert(
        &mut self,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Quote>> {
        self.ensure_tenant()?;

        let query = QuoteQuery::paid_to_convert(self.tenant_id.clone());
        cancellable(cancel, self.session.fetch_quotes(&query)).await
    }

    // The single-record lookups filter by tenant in the query only; with a
    // blank tenant they simply find nothing.

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn find_quote_by_invoice_id(&mut self, invoice_id: &str) -> StoreResult<Option<Quote>> {
        let query = QuoteQuery::by_invoice_id(self.tenant_id.clone(), invoice_id);
        Ok(self.session.fetch_quotes(&query).await?.into_iter().next())
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn find_quote_by_payment_hash(
        &mut self,
        payment_hash: &str,
    ) -> StoreResult<Option<Quote>> {
        let query = QuoteQuery::by_payment_hash(self.tenant_id.clone(), payment_hash);
        Ok(self.session.fetch_quotes(&query).await?.into_iter().next())
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn find_payment_by_payment_hash(
        &mut self,
        payment_hash: &str,
    ) -> StoreResult<Option<Payment>> {
        let query = PaymentQuery::by_payment_hash(self.tenant_id.clone(), payment_hash);
        Ok(self.session.fetch_payments(&query).await?.into_iter().next())
    }

    /// Payments of this tenant, newest first, skipping the first `offset`.
    ///
    /// With `only_completed`, payments without a completion timestamp are left out.
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn get_payments(&mut self, only_completed: bool, offset: usize) -> StoreResult<Vec<Payment>> {
        let query = PaymentQuery::page(self.tenant_id.clone(), only_completed, offset);
        Ok(self.session.fetch_payments(&query).await?)
    }

    /// Insert or update `entity` on behalf of the bound tenant.
    ///
    /// A record the backend does not know yet is stamped with the bound tenant
    /// and inserted. A known record is updated only if it is owned by the bound
    /// tenant, both in storage and in `entity` itself; otherwise
    /// [`StoreError::CrossTenant`] is returned and nothing is written.
    ///
    /// Failures are logged together with their nested cause and returned unchanged.
    #[instrument(skip(self, entity), fields(tenant_id = %self.tenant_id, kind = E::KIND.as_str(), id = %entity.id()))]
    pub async fn store<E: Persistable>(&mut self, entity: &mut E) -> StoreResult<()> {
        let result = self.upsert(entity).await;

        if let Err(err) = &result {
            error!(
                error = %err,
                inner = err.inner_message().as_deref().unwrap_or(""),
                "failed to store entity into the database"
            );
        }
        result
    }

    async fn upsert<E: Persistable>(&mut self, entity: &mut E) -> StoreResult<()> {
        self.ensure_tenant()?;

        let change = match self.session.entry_state(E::KIND, *entity.id()).await? {
            EntryState::New => {
                entity.assign_tenant(self.tenant_id.clone());
                Change::Insert(entity.to_record())
            }
            EntryState::Persisted { tenant_id } => {
                self.ensure_owned(&tenant_id)?;
                self.ensure_owned(entity.tenant_id())?;
                Change::Update(entity.to_record())
            }
        };

        let inserted = matches!(change, Change::Insert(_));
        self.session.commit(vec![change]).await?;

        debug!(inserted, "entity stored");
        Ok(())
    }

    fn ensure_tenant(&self) -> StoreResult<()> {
        if self.tenant_id.is_blank() {
            return Err(StoreError::Precondition);
        }
        Ok(())
    }

    fn ensure_owned(&self, owner: &TenantId) -> StoreResult<()> {
        if owner != &self.tenant_id {
            return Err(StoreError::CrossTenant {
                entity_tenant: owner.clone(),
                bound_tenant: self.tenant_id.clone(),
            });
        }
        Ok(())
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, BackendError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        res = fut => res.map_err(StoreError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryStorage;
    use strike_core::TenantOwned;

    async fn open(storage: &InMemoryStorage, tenant: &str) -> TenantScopedStore<crate::backend::InMemorySession> {
        TenantScopedStore::open(storage, TenantId::from(tenant)).await.unwrap()
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_reads() {
        let storage = InMemoryStorage::new();
        let mut store = open(&storage, "t1").await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store.get_unobserved(&cancel).await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
        let err = store.get_paid_quotes_to_convert(&cancel).await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }

    #[tokio::test]
    async fn new_entity_is_restamped_with_bound_tenant() {
        let storage = InMemoryStorage::new();
        let mut store = open(&storage, "t1").await;

        let mut payment = Payment::new("hash-1");
        payment.assign_tenant(TenantId::from("somebody-else"));
        store.store(&mut payment).await.unwrap();

        assert_eq!(payment.tenant_id(), &TenantId::from("t1"));
        assert_eq!(storage.all_payments()[0].tenant_id(), &TenantId::from("t1"));
    }

    #[tokio::test]
    async fn entity_claiming_foreign_tenant_cannot_update_own_record() {
        let storage = InMemoryStorage::new();
        let mut store = open(&storage, "t1").await;

        let mut quote = Quote::new("inv-1", "hash-1");
        store.store(&mut quote).await.unwrap();

        quote.assign_tenant(TenantId::from("t2"));
        quote.observed = true;
        let err = store.store(&mut quote).await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::CrossTenant { ref entity_tenant, .. } if entity_tenant.as_str() == "t2"
        ));
        assert!(!storage.all_quotes()[0].observed);
    }

    #[tokio::test]
    async fn open_failure_surfaces_as_storage_error() {
        struct Unreachable;

        #[async_trait::async_trait]
        impl StorageProvider for Unreachable {
            type Session = crate::backend::InMemorySession;

            async fn open(&self) -> Result<Self::Session, BackendError> {
                Err(BackendError::unavailable("database is down"))
            }
        }

        let err = TenantScopedStore::open(&Unreachable, TenantId::from("t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }
}
