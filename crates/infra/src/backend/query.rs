//! Read predicates understood by every backend.
//!
//! Each query carries the tenant it is scoped to; there is no way to express
//! an unscoped read. `matches` is the reference semantics: SQL backends must
//! produce exactly the rows for which it returns `true`.

use serde::{Deserialize, Serialize};
use strike_core::{Payment, Quote, TenantId, TenantOwned};

/// Filter over quotes. `None` fields do not constrain the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteQuery {
    pub tenant_id: TenantId,
    pub observed: Option<bool>,
    pub paid: Option<bool>,
    /// `Some(true)` keeps only quotes with a conversion target.
    pub has_paid_convert_to: Option<bool>,
    pub invoice_id: Option<String>,
    pub payment_hash: Option<String>,
    pub limit: Option<usize>,
}

impl QuoteQuery {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            observed: None,
            paid: None,
            has_paid_convert_to: None,
            invoice_id: None,
            payment_hash: None,
            limit: None,
        }
    }

    pub fn unobserved(tenant_id: TenantId) -> Self {
        Self {
            observed: Some(false),
            ..Self::for_tenant(tenant_id)
        }
    }

    pub fn paid_to_convert(tenant_id: TenantId) -> Self {
        Self {
            observed: Some(true),
            paid: Some(true),
            has_paid_convert_to: Some(true),
            ..Self::for_tenant(tenant_id)
        }
    }

    pub fn by_invoice_id(tenant_id: TenantId, invoice_id: impl Into<String>) -> Self {
        Self {
            invoice_id: Some(invoice_id.into()),
            limit: Some(1),
            ..Self::for_tenant(tenant_id)
        }
    }

    pub fn by_payment_hash(tenant_id: TenantId, payment_hash: impl Into<String>) -> Self {
        Self {
            payment_hash: Some(payment_hash.into()),
            limit: Some(1),
            ..Self::for_tenant(tenant_id)
        }
    }

    pub fn matches(&self, quote: &Quote) -> bool {
        quote.tenant_id() == &self.tenant_id
            && self.observed.is_none_or(|o| quote.observed == o)
            && self.paid.is_none_or(|p| quote.paid == p)
            && self
                .has_paid_convert_to
                .is_none_or(|c| quote.paid_convert_to.is_some() == c)
            && self
                .invoice_id
                .as_deref()
                .is_none_or(|id| quote.invoice_id == id)
            && self
                .payment_hash
                .as_deref()
                .is_none_or(|h| quote.payment_hash == h)
    }
}

/// Filter + page over payments, always ordered by `created_at` descending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentQuery {
    pub tenant_id: TenantId,
    pub payment_hash: Option<String>,
    /// When `true`, only payments with a completion timestamp are returned.
    pub only_completed: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl PaymentQuery {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            payment_hash: None,
            only_completed: false,
            offset: 0,
            limit: None,
        }
    }

    pub fn page(tenant_id: TenantId, only_completed: bool, offset: usize) -> Self {
        Self {
            only_completed,
            offset,
            ..Self::for_tenant(tenant_id)
        }
    }

    pub fn by_payment_hash(tenant_id: TenantId, payment_hash: impl Into<String>) -> Self {
        Self {
            payment_hash: Some(payment_hash.into()),
            limit: Some(1),
            ..Self::for_tenant(tenant_id)
        }
    }

    /// `tenant matches AND (only_completed IMPLIES completed)`.
    pub fn matches(&self, payment: &Payment) -> bool {
        payment.tenant_id() == &self.tenant_id
            && (!self.only_completed || payment.is_completed())
            && self
                .payment_hash
                .as_deref()
                .is_none_or(|h| payment.payment_hash == h)
    }

    /// Filter, order newest first, skip `offset`, then cap at `limit`.
    pub fn apply<'a>(&self, payments: impl IntoIterator<Item = &'a Payment>) -> Vec<Payment> {
        let mut selected: Vec<&Payment> = payments.into_iter().filter(|p| self.matches(p)).collect();
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        selected
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}
