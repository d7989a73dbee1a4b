//! Payment record: an in-flight or completed transfer tied to a payment hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, TenantOwned};
use crate::error::{DomainError, DomainResult};
use crate::id::{RecordId, TenantId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    id: RecordId,
    tenant_id: TenantId,
    pub payment_hash: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// New payment initiated now.
    pub fn new(payment_hash: impl Into<String>) -> Self {
        Self::new_at(payment_hash, Utc::now())
    }

    /// New payment with an explicit creation time.
    pub fn new_at(payment_hash: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(),
            tenant_id: TenantId::default(),
            payment_hash: payment_hash.into(),
            created_at,
            completed_at: None,
        }
    }

    /// Rebuild a payment loaded from storage.
    pub fn restore(
        id: RecordId,
        tenant_id: TenantId,
        payment_hash: String,
        created_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            payment_hash,
            created_at,
            completed_at,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Mark the payment as completed at `at`.
    pub fn complete(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if let Some(done) = self.completed_at {
            return Err(DomainError::invariant(format!(
                "payment {} already completed at {done}",
                self.payment_hash
            )));
        }
        if at < self.created_at {
            return Err(DomainError::invariant(format!(
                "completion time {at} precedes creation time {}",
                self.created_at
            )));
        }
        self.completed_at = Some(at);
        Ok(())
    }
}

impl Entity for Payment {
    type Id = RecordId;

    fn id(&self) -> &RecordId {
        &self.id
    }
}

impl TenantOwned for Payment {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    fn assign_tenant(&mut self, tenant_id: TenantId) {
        self.tenant_id = tenant_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    #[test]
    fn complete_sets_timestamp_once() {
        let created = Utc::now();
        let mut p = Payment::new_at("hash-1", created);
        assert!(!p.is_completed());

        p.complete(created + Duration::seconds(5)).unwrap();
        assert!(p.is_completed());

        let err = p.complete(created + Duration::seconds(10)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(p.completed_at, Some(created + Duration::seconds(5)));
    }

    #[test]
    fn completion_before_creation_is_rejected() {
        let created = Utc::now();
        let mut p = Payment::new_at("hash-1", created);

        let err = p.complete(created - Duration::seconds(1)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert!(!p.is_completed());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: completing at or after creation always succeeds and is recorded verbatim.
        #[test]
        fn completion_after_creation_is_accepted(delay_secs in 0i64..1_000_000i64) {
            let created = Utc::now();
            let mut p = Payment::new_at("hash", created);
            let at = created + Duration::seconds(delay_secs);

            prop_assert!(p.complete(at).is_ok());
            prop_assert_eq!(p.completed_at, Some(at));
        }
    }
}
