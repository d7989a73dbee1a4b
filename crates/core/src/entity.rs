//! Entity traits: identity and tenant ownership.

use crate::id::TenantId;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Entity owned by exactly one tenant.
///
/// The tenant of a freshly constructed record is blank until the persistence
/// layer stamps it on first insert. Once persisted, the owning tenant never
/// changes.
pub trait TenantOwned: Entity {
    fn tenant_id(&self) -> &TenantId;

    /// Stamp the owning tenant. Intended for the persistence layer only.
    fn assign_tenant(&mut self, tenant_id: TenantId);
}
