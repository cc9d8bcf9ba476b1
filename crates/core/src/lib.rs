//! `windcms-core`: identity-core foundation building blocks.
//!
//! This crate contains **pure** primitives (no infrastructure concerns):
//! identifiers, the error model, audit columns and the topology flag.

pub mod entity;
pub mod error;
pub mod id;
mod macros;
pub mod relation;

pub use entity::{AuditFields, Entity, FieldMask};
pub use error::{DomainError, DomainResult, ErrorCode};
pub use id::{
    ApiId, CredentialId, LoginPolicyId, MembershipId, MenuId, OrgUnitId, PermissionId,
    PositionId, RoleId, TenantId, UserId,
};
pub use relation::UserTenantRelation;

/// Deduplicate and sort ascending. Resolver outputs are always in this shape.
pub fn sorted_unique<T: Ord>(mut ids: Vec<T>) -> Vec<T> {
    ids.sort();
    ids.dedup();
    ids
}
