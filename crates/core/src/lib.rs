//! `strike-core` — domain building blocks for the Strike payment integration.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! tenant and record identifiers, the `Quote` and `Payment` records, and the
//! traits the persistence layer relies on to enforce tenant ownership.

pub mod entity;
pub mod error;
pub mod id;
pub mod payment;
pub mod quote;

pub use entity::{Entity, TenantOwned};
pub use error::{DomainError, DomainResult};
pub use id::{RecordId, TenantId};
pub use payment::Payment;
pub use quote::Quote;
