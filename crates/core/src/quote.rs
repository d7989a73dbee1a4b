//! Quote record: a price commitment tied to an invoice, awaiting payment.

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, TenantOwned};
use crate::error::{DomainError, DomainResult};
use crate::id::{RecordId, TenantId};

/// Quote requested from the payment provider for a given invoice.
///
/// Created when a quote is requested, mutated when the provider confirms
/// payment or when a reconciliation pass marks it observed. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    id: RecordId,
    tenant_id: TenantId,
    pub invoice_id: String,
    pub payment_hash: String,
    /// Reconciled against the provider's state at least once.
    pub observed: bool,
    pub paid: bool,
    /// Asset the paid amount should be converted to, if any (e.g. `"USD"`).
    pub paid_convert_to: Option<String>,
}

impl Quote {
    /// New, not-yet-persisted quote. The tenant is stamped on first store.
    pub fn new(invoice_id: impl Into<String>, payment_hash: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            tenant_id: TenantId::default(),
            invoice_id: invoice_id.into(),
            payment_hash: payment_hash.into(),
            observed: false,
            paid: false,
            paid_convert_to: None,
        }
    }

    pub fn with_paid_convert_to(mut self, asset: impl Into<String>) -> Self {
        self.paid_convert_to = Some(asset.into());
        self
    }

    /// Rebuild a quote loaded from storage.
    pub fn restore(
        id: RecordId,
        tenant_id: TenantId,
        invoice_id: String,
        payment_hash: String,
        observed: bool,
        paid: bool,
        paid_convert_to: Option<String>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            invoice_id,
            payment_hash,
            observed,
            paid,
            paid_convert_to,
        }
    }

    pub fn mark_observed(&mut self) {
        self.observed = true;
    }

    /// Record the provider's payment confirmation.
    pub fn mark_paid(&mut self) -> DomainResult<()> {
        if self.paid {
            return Err(DomainError::invariant(format!(
                "quote for invoice {} is already paid",
                self.invoice_id
            )));
        }
        self.paid = true;
        Ok(())
    }

    /// Paid, observed and waiting for conversion into `paid_convert_to`.
    pub fn is_awaiting_conversion(&self) -> bool {
        self.paid_convert_to.is_some() && self.observed && self.paid
    }
}

impl Entity for Quote {
    type Id = RecordId;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

impl TenantOwned for Quote {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    fn assign_tenant(&mut self, tenant_id: TenantId) {
        self.tenant_id = tenant_id;
    }
}
