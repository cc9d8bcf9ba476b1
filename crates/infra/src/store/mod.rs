//! Persistence boundary: one trait per aggregate.
//!
//! Multi-row writes that must be atomic (role + metadata + permission set,
//! membership + edges, tenant bootstrap, subtree path rewrites) are single
//! trait methods so each backend can run them inside one transaction.
//!
//! Secrets reach [`CredentialStore`] already prepared (hashed when the
//! credential type demands it); stores never hash.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use windcms_auth::{
    Credential, IdentityType, LoginPolicy, Membership, MembershipStatus, NewCredential,
    NewLoginPolicy, NewPermission, NewTenant, NewUser, OrgUnit, OrgUnitDraft, Permission,
    PermissionCode, Position, PositionDraft, RelationEdge, RelationKind, Role, RoleDraft,
    RoleMetadata, Tenant, User, Window,
};
use windcms_core::{
    ApiId, CredentialId, DomainError, LoginPolicyId, MenuId, OrgUnitId, PermissionId, PositionId,
    RoleId, TenantId, UserId, UserTenantRelation,
};

pub use in_memory::InMemoryIdentityStore;
pub use postgres::PostgresIdentityStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid operation: {0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    Backend(String),
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => DomainError::not_found(format!("{what} not found")),
            StoreError::Conflict(msg) | StoreError::Invalid(msg) => DomainError::bad_request(msg),
            StoreError::Backend(msg) => DomainError::internal(msg),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Write models
// ─────────────────────────────────────────────────────────────────────────────

/// A role with its metadata and initial permission set.
#[derive(Debug, Clone)]
pub struct NewRoleRecord {
    pub draft: RoleDraft,
    /// `role_id` is assigned by the store.
    pub metadata: RoleMetadata,
    pub permission_ids: Vec<PermissionId>,
}

/// Target set written for one user (direct edges) or one membership.
#[derive(Debug, Clone)]
pub struct EdgeSet {
    pub tenant_id: TenantId,
    /// `(kind, target id, is_primary)`.
    pub targets: Vec<(RelationKind, u32, bool)>,
    pub status: MembershipStatus,
    pub window: Window,
    pub operator: Option<UserId>,
}

/// Upsert payload for a membership row keyed by `(tenant_id, user_id)`.
#[derive(Debug, Clone)]
pub struct MembershipUpsert {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role_id: Option<RoleId>,
    pub position_id: Option<PositionId>,
    pub org_unit_id: Option<OrgUnitId>,
    pub status: MembershipStatus,
    pub is_primary: bool,
    pub window: Window,
    pub operator: Option<UserId>,
}

/// Everything created when a tenant is opened with its administrator.
#[derive(Debug, Clone)]
pub struct TenantBootstrap {
    pub tenant: NewTenant,
    /// `tenant_id` is assigned by the store.
    pub admin: NewUser,
    /// Prepared secret; `user_id`/`tenant_id` are assigned by the store.
    pub credential: NewCredential,
    /// Clone of the admin template; `tenant_id` is assigned by the store.
    pub admin_role: RoleDraft,
    pub admin_role_metadata: RoleMetadata,
    /// Permissions are copied from this role.
    pub template_role_id: RoleId,
    /// Which edge topology receives the admin's role assignment.
    pub relation: UserTenantRelation,
}

#[derive(Debug, Clone)]
pub struct BootstrappedTenant {
    pub tenant: Tenant,
    pub admin: User,
    pub role: Role,
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate stores
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    /// User plus its primary credential, atomically.
    async fn create_user_with_credential(
        &self,
        user: NewUser,
        credential: NewCredential,
    ) -> StoreResult<(User, Credential)>;

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn find_user_by_username(&self, tenant_id: TenantId, username: &str) -> StoreResult<Option<User>>;

    /// Whether any tenant already has `username`.
    async fn username_taken(&self, username: &str) -> StoreResult<bool>;

    async fn record_login(&self, id: UserId, at: DateTime<Utc>, ip: Option<String>) -> StoreResult<()>;

    /// Delete the user with its credentials and every relation edge.
    async fn delete_user(&self, id: UserId) -> StoreResult<bool>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create_credential(&self, credential: NewCredential) -> StoreResult<Credential>;

    async fn get_credential(&self, id: CredentialId) -> StoreResult<Option<Credential>>;

    async fn find_credential(
        &self,
        identity_type: IdentityType,
        identifier: &str,
    ) -> StoreResult<Option<Credential>>;

    async fn list_credentials_by_user(&self, user_id: UserId) -> StoreResult<Vec<Credential>>;

    /// Overwrite every column of an existing row.
    async fn update_credential(&self, credential: Credential) -> StoreResult<Credential>;

    async fn set_credential_secret(&self, id: CredentialId, prepared: String) -> StoreResult<()>;

    async fn delete_credential_by_identifier(
        &self,
        identity_type: IdentityType,
        identifier: &str,
    ) -> StoreResult<bool>;

    async fn delete_credentials_by_user(&self, user_id: UserId) -> StoreResult<u64>;
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn create_tenant(&self, tenant: NewTenant) -> StoreResult<Tenant>;

    async fn get_tenant(&self, id: TenantId) -> StoreResult<Option<Tenant>>;

    async fn find_tenant_by_code(&self, code: &str) -> StoreResult<Option<Tenant>>;

    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>>;

    /// Tenant, cloned admin role (with the template's permissions), admin
    /// user, primary credential, role edge and `admin_user_id`, atomically.
    async fn bootstrap_tenant(&self, bootstrap: TenantBootstrap) -> StoreResult<BootstrappedTenant>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Role, metadata and permission set, atomically.
    async fn create_role(&self, record: NewRoleRecord) -> StoreResult<(Role, RoleMetadata)>;

    async fn get_role(&self, id: RoleId) -> StoreResult<Option<Role>>;

    async fn find_role_by_code(&self, tenant_id: TenantId, code: &str) -> StoreResult<Option<Role>>;

    /// Platform-scoped, protected, enabled role with `code`.
    async fn find_template_role(&self, code: &str) -> StoreResult<Option<Role>>;

    async fn list_roles(&self, tenant_id: TenantId) -> StoreResult<Vec<Role>>;

    async fn get_role_metadata(&self, role_id: RoleId) -> StoreResult<Option<RoleMetadata>>;

    /// Overwrite the row; bump `template_version` when the metadata marks a
    /// template; replace the permission set when given. One transaction.
    async fn update_role(
        &self,
        role: Role,
        permission_ids: Option<Vec<PermissionId>>,
    ) -> StoreResult<(Role, Option<RoleMetadata>)>;

    async fn delete_role(&self, id: RoleId) -> StoreResult<bool>;

    async fn role_codes_by_ids(&self, ids: &[RoleId]) -> StoreResult<Vec<String>>;

    async fn role_ids_by_codes(&self, tenant_id: TenantId, codes: &[String]) -> StoreResult<Vec<RoleId>>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn create_permission(&self, permission: NewPermission) -> StoreResult<Permission>;

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>>;

    /// Delete the role's rows, then insert `ids`. One transaction.
    async fn replace_role_permissions(&self, role_id: RoleId, ids: &[PermissionId]) -> StoreResult<()>;

    async fn permission_ids_for_roles(&self, role_ids: &[RoleId]) -> StoreResult<Vec<PermissionId>>;

    async fn permission_codes(&self, ids: &[PermissionId]) -> StoreResult<Vec<PermissionCode>>;

    async fn set_permission_apis(&self, id: PermissionId, api_ids: &[ApiId]) -> StoreResult<()>;

    async fn set_permission_menus(&self, id: PermissionId, menu_ids: &[MenuId]) -> StoreResult<()>;

    async fn api_ids_for_permissions(&self, ids: &[PermissionId]) -> StoreResult<Vec<ApiId>>;

    async fn menu_ids_for_permissions(&self, ids: &[PermissionId]) -> StoreResult<Vec<MenuId>>;
}

/// User-keyed edges (one-to-one and single-tenant topologies).
#[async_trait]
pub trait DirectEdgeStore: Send + Sync {
    /// Clean the user's edges and insert `edges`. One transaction.
    async fn replace_user_edges(&self, user_id: UserId, edges: EdgeSet) -> StoreResult<()>;

    async fn user_edges(&self, user_id: UserId) -> StoreResult<Vec<RelationEdge>>;

    async fn clean_user_edges(&self, user_id: UserId) -> StoreResult<()>;

    async fn set_user_edge_status(&self, user_id: UserId, status: MembershipStatus) -> StoreResult<()>;

    async fn set_user_edge_end_at(&self, user_id: UserId, end_at: Option<DateTime<Utc>>) -> StoreResult<()>;

    /// Users holding any of `ids`; with `effective_at`, only active edges
    /// whose window is open at that instant.
    async fn users_by_direct_edge(
        &self,
        kind: RelationKind,
        ids: &[u32],
        effective_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<UserId>>;
}

/// Membership rows and their edges (one-to-many topology).
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Upsert on `(tenant_id, user_id)` and replace all three edge sets.
    /// One transaction. On conflict only audit and assignment columns change.
    async fn assign_membership(&self, membership: MembershipUpsert, edges: EdgeSet) -> StoreResult<Membership>;

    async fn get_membership(&self, tenant_id: TenantId, user_id: UserId) -> StoreResult<Option<Membership>>;

    async fn list_memberships(&self, user_id: UserId) -> StoreResult<Vec<Membership>>;

    async fn membership_edges(&self, tenant_id: TenantId, user_id: UserId) -> StoreResult<Vec<RelationEdge>>;

    async fn set_membership_status(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        status: MembershipStatus,
    ) -> StoreResult<()>;

    async fn set_membership_end_at(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        end_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    /// Delete every membership of the user and their edges.
    async fn clean_memberships(&self, user_id: UserId) -> StoreResult<()>;

    /// Users whose membership edges reach any of `ids`.
    async fn users_by_membership_edge(
        &self,
        kind: RelationKind,
        ids: &[u32],
        tenant_id: Option<TenantId>,
        effective_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<UserId>>;
}

#[async_trait]
pub trait OrgUnitStore: Send + Sync {
    /// Insert and write `path` from the parent's path. One transaction.
    async fn create_org_unit(&self, draft: OrgUnitDraft) -> StoreResult<OrgUnit>;

    async fn get_org_unit(&self, id: OrgUnitId) -> StoreResult<Option<OrgUnit>>;

    async fn list_org_units(&self, tenant_id: TenantId) -> StoreResult<Vec<OrgUnit>>;

    /// Overwrite attribute columns; never `parent_id` or `path`.
    async fn update_org_unit(&self, unit: OrgUnit) -> StoreResult<OrgUnit>;

    /// Re-parent and rewrite every descendant path by prefix. One transaction.
    async fn move_org_unit(&self, id: OrgUnitId, new_parent: Option<OrgUnitId>) -> StoreResult<OrgUnit>;

    /// Delete the node and its subtree; returns the number of rows removed.
    async fn delete_org_unit_subtree(&self, id: OrgUnitId) -> StoreResult<u64>;
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn create_position(&self, draft: PositionDraft) -> StoreResult<Position>;

    async fn get_position(&self, id: PositionId) -> StoreResult<Option<Position>>;

    async fn find_position_by_code(&self, tenant_id: TenantId, code: &str) -> StoreResult<Option<Position>>;

    async fn list_positions(&self, tenant_id: TenantId) -> StoreResult<Vec<Position>>;

    async fn update_position(&self, position: Position) -> StoreResult<Position>;

    async fn delete_position(&self, id: PositionId) -> StoreResult<bool>;
}

#[async_trait]
pub trait LoginPolicyStore: Send + Sync {
    async fn create_login_policy(&self, policy: NewLoginPolicy) -> StoreResult<LoginPolicy>;

    async fn list_login_policies(&self, tenant_id: TenantId) -> StoreResult<Vec<LoginPolicy>>;

    async fn delete_login_policy(&self, id: LoginPolicyId) -> StoreResult<bool>;
}

/// Every aggregate store behind one handle.
pub trait IdentityStore:
    UserStore
    + CredentialStore
    + TenantStore
    + RoleStore
    + PermissionStore
    + DirectEdgeStore
    + MembershipStore
    + OrgUnitStore
    + PositionStore
    + LoginPolicyStore
{
}

impl<T> IdentityStore for T where
    T: UserStore
        + CredentialStore
        + TenantStore
        + RoleStore
        + PermissionStore
        + DirectEdgeStore
        + MembershipStore
        + OrgUnitStore
        + PositionStore
        + LoginPolicyStore
{
}

#[cfg(test)]
mod tests {
    use windcms_core::ErrorCode;

    use super::*;

    #[test]
    fn store_errors_map_to_wire_codes() {
        let code = |e: StoreError| DomainError::from(e).code();
        assert_eq!(code(StoreError::NotFound("role 7".into())), ErrorCode::NotFound);
        assert_eq!(code(StoreError::Conflict("dup".into())), ErrorCode::BadRequest);
        assert_eq!(code(StoreError::Invalid("cycle".into())), ErrorCode::BadRequest);
        assert_eq!(code(StoreError::Backend("io".into())), ErrorCode::InternalServerError);
    }
}
