//! In-memory identity store for tests and development.
//!
//! Every table lives behind one `RwLock`. Multi-row writes run against a
//! copy of the tables that replaces the original only on success, so a
//! failed write leaves nothing behind.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use windcms_auth::org::{ensure_valid_reparent, is_within, rebase_path};
use windcms_auth::{
    Credential, IdentityType, LoginPolicy, Membership, MembershipStatus, NewCredential,
    NewLoginPolicy, NewPermission, NewTenant, NewUser, OrgUnit, OrgUnitDraft, Permission,
    PermissionCode, Position, PositionDraft, RelationEdge, RelationKind, Role, RoleMetadata,
    Tenant, User, Window,
};
use windcms_core::{
    ApiId, AuditFields, CredentialId, LoginPolicyId, MembershipId, MenuId, OrgUnitId,
    PermissionId, PositionId, RoleId, TenantId, UserId, sorted_unique,
};

use super::{
    BootstrappedTenant, CredentialStore, DirectEdgeStore, EdgeSet, LoginPolicyStore,
    MembershipStore, MembershipUpsert, NewRoleRecord, OrgUnitStore, PermissionStore,
    PositionStore, RoleStore, StoreError, StoreResult, TenantBootstrap, TenantStore, UserStore,
};

#[derive(Debug, Clone, Default)]
struct Sequences {
    user: u32,
    credential: u32,
    tenant: u32,
    role: u32,
    permission: u32,
    membership: u32,
    org_unit: u32,
    position: u32,
    policy: u32,
}

fn next(counter: &mut u32) -> u32 {
    *counter += 1;
    *counter
}

#[derive(Debug, Clone, Default)]
struct Tables {
    seq: Sequences,
    users: BTreeMap<UserId, User>,
    credentials: BTreeMap<CredentialId, Credential>,
    tenants: BTreeMap<TenantId, Tenant>,
    roles: BTreeMap<RoleId, Role>,
    role_metadata: BTreeMap<RoleId, RoleMetadata>,
    permissions: BTreeMap<PermissionId, Permission>,
    role_permissions: BTreeSet<(RoleId, PermissionId)>,
    permission_apis: BTreeSet<(PermissionId, ApiId)>,
    permission_menus: BTreeSet<(PermissionId, MenuId)>,
    user_edges: Vec<RelationEdge>,
    memberships: BTreeMap<MembershipId, Membership>,
    membership_edges: Vec<RelationEdge>,
    org_units: BTreeMap<OrgUnitId, OrgUnit>,
    positions: BTreeMap<PositionId, Position>,
    policies: BTreeMap<LoginPolicyId, LoginPolicy>,
}

impl Tables {
    fn insert_user(&mut self, user: NewUser, now: DateTime<Utc>) -> StoreResult<User> {
        let username = user.username.trim();
        if self
            .users
            .values()
            .any(|u| u.tenant_id == user.tenant_id && u.username == username)
        {
            return Err(StoreError::Conflict(format!("username '{username}' already exists")));
        }
        let id = UserId::new(next(&mut self.seq.user));
        let user = user.into_user(id, now);
        self.users.insert(id, user.clone());
        Ok(user)
    }

    fn insert_credential(&mut self, credential: NewCredential, now: DateTime<Utc>) -> StoreResult<Credential> {
        let id = CredentialId::new(next(&mut self.seq.credential));
        let credential = credential
            .into_credential(id, now)
            .map_err(|e| StoreError::Invalid(e.message().to_string()))?;
        if self.find_credential(credential.identity_type, &credential.identifier).is_some() {
            return Err(StoreError::Conflict(format!(
                "credential {} '{}' already exists",
                credential.identity_type, credential.identifier
            )));
        }
        self.credentials.insert(id, credential.clone());
        Ok(credential)
    }

    fn find_credential(&self, identity_type: IdentityType, identifier: &str) -> Option<&Credential> {
        self.credentials
            .values()
            .find(|c| c.identity_type == identity_type && c.identifier == identifier)
    }

    fn insert_tenant(&mut self, tenant: NewTenant, now: DateTime<Utc>) -> StoreResult<Tenant> {
        let code = tenant.code.trim();
        if self.tenants.values().any(|t| t.code == code) {
            return Err(StoreError::Conflict(format!("tenant code '{code}' already exists")));
        }
        let id = TenantId::new(next(&mut self.seq.tenant));
        let tenant = tenant.into_tenant(id, now);
        self.tenants.insert(id, tenant.clone());
        Ok(tenant)
    }

    fn insert_role(&mut self, record: NewRoleRecord, now: DateTime<Utc>) -> StoreResult<(Role, RoleMetadata)> {
        let NewRoleRecord {
            draft,
            mut metadata,
            permission_ids,
        } = record;
        if self
            .roles
            .values()
            .any(|r| r.tenant_id == draft.tenant_id && r.code == draft.code)
        {
            return Err(StoreError::Conflict(format!("role code '{}' already exists", draft.code)));
        }
        let id = RoleId::new(next(&mut self.seq.role));
        let role = draft.into_role(id, now);
        metadata.role_id = id;
        self.roles.insert(id, role.clone());
        self.role_metadata.insert(id, metadata.clone());
        self.replace_role_permissions(id, &permission_ids);
        Ok((role, metadata))
    }

    fn replace_role_permissions(&mut self, role_id: RoleId, ids: &[PermissionId]) {
        self.role_permissions.retain(|(r, _)| *r != role_id);
        self.role_permissions.extend(ids.iter().map(|p| (role_id, *p)));
    }

    fn replace_user_edges(&mut self, user_id: UserId, edges: EdgeSet, now: DateTime<Utc>) {
        self.user_edges.retain(|e| e.user_id != user_id);
        self.user_edges
            .extend(build_edges(user_id, None, &edges, now));
    }

    fn upsert_membership(
        &mut self,
        upsert: MembershipUpsert,
        edges: EdgeSet,
        now: DateTime<Utc>,
    ) -> Membership {
        let existing = self
            .memberships
            .values_mut()
            .find(|m| m.tenant_id == upsert.tenant_id && m.user_id == upsert.user_id);

        let membership = match existing {
            Some(m) => {
                m.role_id = upsert.role_id;
                m.position_id = upsert.position_id;
                m.org_unit_id = upsert.org_unit_id;
                m.status = upsert.status;
                m.is_primary = upsert.is_primary;
                m.window = upsert.window;
                m.audit.touch(now, upsert.operator);
                m.clone()
            }
            None => {
                let id = MembershipId::new(next(&mut self.seq.membership));
                let m = Membership {
                    id,
                    tenant_id: upsert.tenant_id,
                    user_id: upsert.user_id,
                    role_id: upsert.role_id,
                    position_id: upsert.position_id,
                    org_unit_id: upsert.org_unit_id,
                    status: upsert.status,
                    is_primary: upsert.is_primary,
                    window: upsert.window,
                    audit: AuditFields::created(now, upsert.operator),
                };
                self.memberships.insert(id, m.clone());
                m
            }
        };

        self.membership_edges
            .retain(|e| e.membership_id != Some(membership.id));
        self.membership_edges
            .extend(build_edges(membership.user_id, Some(membership.id), &edges, now));
        membership
    }

    fn effective_memberships(&self, effective_at: Option<DateTime<Utc>>) -> BTreeSet<MembershipId> {
        self.memberships
            .values()
            .filter(|m| effective_at.is_none_or(|now| m.is_effective(now)))
            .map(|m| m.id)
            .collect()
    }
}

fn build_edges(
    user_id: UserId,
    membership_id: Option<MembershipId>,
    edges: &EdgeSet,
    now: DateTime<Utc>,
) -> Vec<RelationEdge> {
    edges
        .targets
        .iter()
        .map(|(kind, target_id, is_primary)| RelationEdge {
            user_id,
            tenant_id: edges.tenant_id,
            membership_id,
            kind: *kind,
            target_id: *target_id,
            status: edges.status,
            is_primary: *is_primary,
            window: edges.window,
            audit: AuditFields::created(now, edges.operator),
        })
        .collect()
}

fn edge_matches(edge: &RelationEdge, kind: RelationKind, ids: &[u32], effective_at: Option<DateTime<Utc>>) -> bool {
    edge.kind == kind
        && ids.contains(&edge.target_id)
        && effective_at.is_none_or(|now| edge.is_effective(now))
}

/// Identity store held entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    tables: RwLock<Tables>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("store lock poisoned".into()))
    }

    /// Run `f` against a copy of the tables; commit the copy only on `Ok`.
    fn transact<R>(&self, f: impl FnOnce(&mut Tables) -> StoreResult<R>) -> StoreResult<R> {
        let mut guard = self.write()?;
        let mut working = guard.clone();
        let out = f(&mut working)?;
        *guard = working;
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl UserStore for InMemoryIdentityStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.write()?.insert_user(user, Utc::now())
    }

    async fn create_user_with_credential(
        &self,
        user: NewUser,
        mut credential: NewCredential,
    ) -> StoreResult<(User, Credential)> {
        let now = Utc::now();
        self.transact(|t| {
            let user = t.insert_user(user, now)?;
            credential.user_id = user.id;
            credential.tenant_id = user.tenant_id;
            let credential = t.insert_credential(credential, now)?;
            Ok((user, credential))
        })
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, tenant_id: TenantId, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.tenant_id == tenant_id && u.username == username)
            .cloned())
    }

    async fn username_taken(&self, username: &str) -> StoreResult<bool> {
        Ok(self.read()?.users.values().any(|u| u.username == username))
    }

    async fn record_login(&self, id: UserId, at: DateTime<Utc>, ip: Option<String>) -> StoreResult<()> {
        let mut tables = self.write()?;
        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        user.last_login_at = Some(at);
        user.last_login_ip = ip;
        Ok(())
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<bool> {
        let mut tables = self.write()?;
        if tables.users.remove(&id).is_none() {
            return Ok(false);
        }
        tables.credentials.retain(|_, c| c.user_id != id);
        tables.user_edges.retain(|e| e.user_id != id);
        tables.memberships.retain(|_, m| m.user_id != id);
        tables.membership_edges.retain(|e| e.user_id != id);
        Ok(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl CredentialStore for InMemoryIdentityStore {
    async fn create_credential(&self, credential: NewCredential) -> StoreResult<Credential> {
        self.write()?.insert_credential(credential, Utc::now())
    }

    async fn get_credential(&self, id: CredentialId) -> StoreResult<Option<Credential>> {
        Ok(self.read()?.credentials.get(&id).cloned())
    }

    async fn find_credential(
        &self,
        identity_type: IdentityType,
        identifier: &str,
    ) -> StoreResult<Option<Credential>> {
        Ok(self.read()?.find_credential(identity_type, identifier).cloned())
    }

    async fn list_credentials_by_user(&self, user_id: UserId) -> StoreResult<Vec<Credential>> {
        Ok(self
            .read()?
            .credentials
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_credential(&self, credential: Credential) -> StoreResult<Credential> {
        let mut tables = self.write()?;
        let clash = tables.credentials.values().any(|c| {
            c.id != credential.id
                && c.identity_type == credential.identity_type
                && c.identifier == credential.identifier
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "credential {} '{}' already exists",
                credential.identity_type, credential.identifier
            )));
        }
        let slot = tables
            .credentials
            .get_mut(&credential.id)
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", credential.id)))?;
        *slot = credential.clone();
        Ok(credential)
    }

    async fn set_credential_secret(&self, id: CredentialId, prepared: String) -> StoreResult<()> {
        let mut tables = self.write()?;
        let credential = tables
            .credentials
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("credential {id}")))?;
        credential.credential = prepared;
        credential.audit.touch(Utc::now(), None);
        Ok(())
    }

    async fn delete_credential_by_identifier(
        &self,
        identity_type: IdentityType,
        identifier: &str,
    ) -> StoreResult<bool> {
        let mut tables = self.write()?;
        let before = tables.credentials.len();
        tables
            .credentials
            .retain(|_, c| !(c.identity_type == identity_type && c.identifier == identifier));
        Ok(tables.credentials.len() < before)
    }

    async fn delete_credentials_by_user(&self, user_id: UserId) -> StoreResult<u64> {
        let mut tables = self.write()?;
        let before = tables.credentials.len();
        tables.credentials.retain(|_, c| c.user_id != user_id);
        Ok((before - tables.credentials.len()) as u64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenants
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl TenantStore for InMemoryIdentityStore {
    async fn create_tenant(&self, tenant: NewTenant) -> StoreResult<Tenant> {
        self.write()?.insert_tenant(tenant, Utc::now())
    }

    async fn get_tenant(&self, id: TenantId) -> StoreResult<Option<Tenant>> {
        Ok(self.read()?.tenants.get(&id).cloned())
    }

    async fn find_tenant_by_code(&self, code: &str) -> StoreResult<Option<Tenant>> {
        Ok(self.read()?.tenants.values().find(|t| t.code == code).cloned())
    }

    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>> {
        Ok(self.read()?.tenants.values().cloned().collect())
    }

    async fn bootstrap_tenant(&self, bootstrap: TenantBootstrap) -> StoreResult<BootstrappedTenant> {
        let now = Utc::now();
        self.transact(|t| {
            let TenantBootstrap {
                tenant,
                mut admin,
                mut credential,
                mut admin_role,
                admin_role_metadata,
                template_role_id,
                relation,
            } = bootstrap;

            let mut tenant = t.insert_tenant(tenant, now)?;

            let template_permissions: Vec<PermissionId> = t
                .role_permissions
                .iter()
                .filter(|(r, _)| *r == template_role_id)
                .map(|(_, p)| *p)
                .collect();
            admin_role.tenant_id = tenant.id;
            let (role, _) = t.insert_role(
                NewRoleRecord {
                    draft: admin_role,
                    metadata: admin_role_metadata,
                    permission_ids: template_permissions,
                },
                now,
            )?;

            admin.tenant_id = tenant.id;
            let user = t.insert_user(admin, now)?;

            credential.user_id = user.id;
            credential.tenant_id = tenant.id;
            t.insert_credential(credential, now)?;

            let edges = EdgeSet {
                tenant_id: tenant.id,
                targets: vec![(RelationKind::Role, role.id.get(), true)],
                status: MembershipStatus::Active,
                window: Window::open(now),
                operator: user.audit.created_by,
            };
            if relation.uses_memberships() {
                let upsert = MembershipUpsert {
                    tenant_id: tenant.id,
                    user_id: user.id,
                    role_id: Some(role.id),
                    position_id: None,
                    org_unit_id: None,
                    status: MembershipStatus::Active,
                    is_primary: true,
                    window: Window::open(now),
                    operator: user.audit.created_by,
                };
                t.upsert_membership(upsert, edges, now);
            } else {
                t.replace_user_edges(user.id, edges, now);
            }

            tenant.admin_user_id = Some(user.id);
            t.tenants.insert(tenant.id, tenant.clone());

            Ok(BootstrappedTenant {
                tenant,
                admin: user,
                role,
            })
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl RoleStore for InMemoryIdentityStore {
    async fn create_role(&self, record: NewRoleRecord) -> StoreResult<(Role, RoleMetadata)> {
        let now = Utc::now();
        self.transact(|t| t.insert_role(record, now))
    }

    async fn get_role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn find_role_by_code(&self, tenant_id: TenantId, code: &str) -> StoreResult<Option<Role>> {
        Ok(self
            .read()?
            .roles
            .values()
            .find(|r| r.tenant_id == tenant_id && r.code == code)
            .cloned())
    }

    async fn find_template_role(&self, code: &str) -> StoreResult<Option<Role>> {
        Ok(self
            .read()?
            .roles
            .values()
            .find(|r| {
                r.code == code
                    && r.tenant_id.is_platform()
                    && r.is_protected
                    && r.status == windcms_auth::RoleStatus::On
            })
            .cloned())
    }

    async fn list_roles(&self, tenant_id: TenantId) -> StoreResult<Vec<Role>> {
        let mut roles: Vec<Role> = self
            .read()?
            .roles
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        roles.sort_by_key(|r| (r.sort_order, r.id));
        Ok(roles)
    }

    async fn get_role_metadata(&self, role_id: RoleId) -> StoreResult<Option<RoleMetadata>> {
        Ok(self.read()?.role_metadata.get(&role_id).cloned())
    }

    async fn update_role(
        &self,
        role: Role,
        permission_ids: Option<Vec<PermissionId>>,
    ) -> StoreResult<(Role, Option<RoleMetadata>)> {
        self.transact(|t| {
            if !t.roles.contains_key(&role.id) {
                return Err(StoreError::NotFound(format!("role {}", role.id)));
            }
            if t
                .roles
                .values()
                .any(|r| r.id != role.id && r.tenant_id == role.tenant_id && r.code == role.code)
            {
                return Err(StoreError::Conflict(format!("role code '{}' already exists", role.code)));
            }
            t.roles.insert(role.id, role.clone());

            let metadata = t.role_metadata.get_mut(&role.id).map(|m| {
                m.bump_template_version();
                m.clone()
            });

            if let Some(ids) = permission_ids {
                t.replace_role_permissions(role.id, &ids);
            }
            Ok((role, metadata))
        })
    }

    async fn delete_role(&self, id: RoleId) -> StoreResult<bool> {
        let mut tables = self.write()?;
        if tables.roles.remove(&id).is_none() {
            return Ok(false);
        }
        tables.role_metadata.remove(&id);
        tables.role_permissions.retain(|(r, _)| *r != id);
        Ok(true)
    }

    async fn role_codes_by_ids(&self, ids: &[RoleId]) -> StoreResult<Vec<String>> {
        let tables = self.read()?;
        let codes = ids
            .iter()
            .filter_map(|id| tables.roles.get(id))
            .map(|r| r.code.clone())
            .collect();
        Ok(sorted_unique(codes))
    }

    async fn role_ids_by_codes(&self, tenant_id: TenantId, codes: &[String]) -> StoreResult<Vec<RoleId>> {
        let ids = self
            .read()?
            .roles
            .values()
            .filter(|r| r.tenant_id == tenant_id && codes.contains(&r.code))
            .map(|r| r.id)
            .collect();
        Ok(sorted_unique(ids))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permissions
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PermissionStore for InMemoryIdentityStore {
    async fn create_permission(&self, permission: NewPermission) -> StoreResult<Permission> {
        let mut tables = self.write()?;
        let code = permission.code.trim();
        if tables.permissions.values().any(|p| p.code.as_str() == code) {
            return Err(StoreError::Conflict(format!("permission code '{code}' already exists")));
        }
        let id = PermissionId::new(next(&mut tables.seq.permission));
        let permission = permission.into_permission(id, Utc::now());
        tables.permissions.insert(id, permission.clone());
        Ok(permission)
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        Ok(self.read()?.permissions.values().cloned().collect())
    }

    async fn replace_role_permissions(&self, role_id: RoleId, ids: &[PermissionId]) -> StoreResult<()> {
        self.write()?.replace_role_permissions(role_id, ids);
        Ok(())
    }

    async fn permission_ids_for_roles(&self, role_ids: &[RoleId]) -> StoreResult<Vec<PermissionId>> {
        let ids = self
            .read()?
            .role_permissions
            .iter()
            .filter(|(r, _)| role_ids.contains(r))
            .map(|(_, p)| *p)
            .collect();
        Ok(sorted_unique(ids))
    }

    async fn permission_codes(&self, ids: &[PermissionId]) -> StoreResult<Vec<PermissionCode>> {
        let tables = self.read()?;
        let codes = ids
            .iter()
            .filter_map(|id| tables.permissions.get(id))
            .map(|p| p.code.clone())
            .collect();
        Ok(sorted_unique(codes))
    }

    async fn set_permission_apis(&self, id: PermissionId, api_ids: &[ApiId]) -> StoreResult<()> {
        let mut tables = self.write()?;
        tables.permission_apis.retain(|(p, _)| *p != id);
        tables.permission_apis.extend(api_ids.iter().map(|a| (id, *a)));
        Ok(())
    }

    async fn set_permission_menus(&self, id: PermissionId, menu_ids: &[MenuId]) -> StoreResult<()> {
        let mut tables = self.write()?;
        tables.permission_menus.retain(|(p, _)| *p != id);
        tables.permission_menus.extend(menu_ids.iter().map(|m| (id, *m)));
        Ok(())
    }

    async fn api_ids_for_permissions(&self, ids: &[PermissionId]) -> StoreResult<Vec<ApiId>> {
        let out = self
            .read()?
            .permission_apis
            .iter()
            .filter(|(p, _)| ids.contains(p))
            .map(|(_, a)| *a)
            .collect();
        Ok(sorted_unique(out))
    }

    async fn menu_ids_for_permissions(&self, ids: &[PermissionId]) -> StoreResult<Vec<MenuId>> {
        let out = self
            .read()?
            .permission_menus
            .iter()
            .filter(|(p, _)| ids.contains(p))
            .map(|(_, m)| *m)
            .collect();
        Ok(sorted_unique(out))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relations
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl DirectEdgeStore for InMemoryIdentityStore {
    async fn replace_user_edges(&self, user_id: UserId, edges: EdgeSet) -> StoreResult<()> {
        self.write()?.replace_user_edges(user_id, edges, Utc::now());
        Ok(())
    }

    async fn user_edges(&self, user_id: UserId) -> StoreResult<Vec<RelationEdge>> {
        Ok(self
            .read()?
            .user_edges
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn clean_user_edges(&self, user_id: UserId) -> StoreResult<()> {
        self.write()?.user_edges.retain(|e| e.user_id != user_id);
        Ok(())
    }

    async fn set_user_edge_status(&self, user_id: UserId, status: MembershipStatus) -> StoreResult<()> {
        let now = Utc::now();
        for edge in self.write()?.user_edges.iter_mut().filter(|e| e.user_id == user_id) {
            edge.status = status;
            edge.audit.touch(now, None);
        }
        Ok(())
    }

    async fn set_user_edge_end_at(&self, user_id: UserId, end_at: Option<DateTime<Utc>>) -> StoreResult<()> {
        let now = Utc::now();
        for edge in self.write()?.user_edges.iter_mut().filter(|e| e.user_id == user_id) {
            edge.window.end_at = end_at;
            edge.audit.touch(now, None);
        }
        Ok(())
    }

    async fn users_by_direct_edge(
        &self,
        kind: RelationKind,
        ids: &[u32],
        effective_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<UserId>> {
        let users = self
            .read()?
            .user_edges
            .iter()
            .filter(|e| edge_matches(e, kind, ids, effective_at))
            .map(|e| e.user_id)
            .collect();
        Ok(sorted_unique(users))
    }
}

#[async_trait]
impl MembershipStore for InMemoryIdentityStore {
    async fn assign_membership(&self, membership: MembershipUpsert, edges: EdgeSet) -> StoreResult<Membership> {
        let now = Utc::now();
        self.transact(|t| Ok(t.upsert_membership(membership, edges, now)))
    }

    async fn get_membership(&self, tenant_id: TenantId, user_id: UserId) -> StoreResult<Option<Membership>> {
        Ok(self
            .read()?
            .memberships
            .values()
            .find(|m| m.tenant_id == tenant_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_memberships(&self, user_id: UserId) -> StoreResult<Vec<Membership>> {
        Ok(self
            .read()?
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn membership_edges(&self, tenant_id: TenantId, user_id: UserId) -> StoreResult<Vec<RelationEdge>> {
        let tables = self.read()?;
        let Some(membership) = tables
            .memberships
            .values()
            .find(|m| m.tenant_id == tenant_id && m.user_id == user_id)
        else {
            return Ok(Vec::new());
        };
        Ok(tables
            .membership_edges
            .iter()
            .filter(|e| e.membership_id == Some(membership.id))
            .cloned()
            .collect())
    }

    async fn set_membership_status(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        status: MembershipStatus,
    ) -> StoreResult<()> {
        let mut tables = self.write()?;
        let membership = tables
            .memberships
            .values_mut()
            .find(|m| m.tenant_id == tenant_id && m.user_id == user_id)
            .ok_or_else(|| StoreError::NotFound(format!("membership of user {user_id} in tenant {tenant_id}")))?;
        membership.status = status;
        membership.audit.touch(Utc::now(), None);
        Ok(())
    }

    async fn set_membership_end_at(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        end_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut tables = self.write()?;
        let membership = tables
            .memberships
            .values_mut()
            .find(|m| m.tenant_id == tenant_id && m.user_id == user_id)
            .ok_or_else(|| StoreError::NotFound(format!("membership of user {user_id} in tenant {tenant_id}")))?;
        membership.window.end_at = end_at;
        membership.audit.touch(Utc::now(), None);
        Ok(())
    }

    async fn clean_memberships(&self, user_id: UserId) -> StoreResult<()> {
        let mut tables = self.write()?;
        tables.memberships.retain(|_, m| m.user_id != user_id);
        tables.membership_edges.retain(|e| e.user_id != user_id);
        Ok(())
    }

    async fn users_by_membership_edge(
        &self,
        kind: RelationKind,
        ids: &[u32],
        tenant_id: Option<TenantId>,
        effective_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<UserId>> {
        let tables = self.read()?;
        let live = tables.effective_memberships(effective_at);
        let users = tables
            .membership_edges
            .iter()
            .filter(|e| e.membership_id.is_some_and(|m| live.contains(&m)))
            .filter(|e| tenant_id.is_none_or(|t| e.tenant_id == t))
            .filter(|e| edge_matches(e, kind, ids, effective_at))
            .map(|e| e.user_id)
            .collect();
        Ok(sorted_unique(users))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Org units & positions
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl OrgUnitStore for InMemoryIdentityStore {
    async fn create_org_unit(&self, draft: OrgUnitDraft) -> StoreResult<OrgUnit> {
        let mut tables = self.write()?;
        let parent_path = match draft.parent_id {
            Some(parent_id) => tables
                .org_units
                .get(&parent_id)
                .filter(|p| p.tenant_id == draft.tenant_id)
                .map(|p| p.path.clone())
                .ok_or_else(|| StoreError::Invalid(format!("parent org unit {parent_id} not found")))?,
            None => String::new(),
        };
        let id = OrgUnitId::new(next(&mut tables.seq.org_unit));
        let unit = draft.into_org_unit(id, &parent_path, Utc::now());
        tables.org_units.insert(id, unit.clone());
        Ok(unit)
    }

    async fn get_org_unit(&self, id: OrgUnitId) -> StoreResult<Option<OrgUnit>> {
        Ok(self.read()?.org_units.get(&id).cloned())
    }

    async fn list_org_units(&self, tenant_id: TenantId) -> StoreResult<Vec<OrgUnit>> {
        Ok(self
            .read()?
            .org_units
            .values()
            .filter(|u| u.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn update_org_unit(&self, unit: OrgUnit) -> StoreResult<OrgUnit> {
        let mut tables = self.write()?;
        let slot = tables
            .org_units
            .get_mut(&unit.id)
            .ok_or_else(|| StoreError::NotFound(format!("org unit {}", unit.id)))?;
        let (parent_id, path) = (slot.parent_id, slot.path.clone());
        *slot = OrgUnit {
            parent_id,
            path,
            ..unit
        };
        Ok(slot.clone())
    }

    async fn move_org_unit(&self, id: OrgUnitId, new_parent: Option<OrgUnitId>) -> StoreResult<OrgUnit> {
        self.transact(|t| {
            let node = t
                .org_units
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("org unit {id}")))?;
            let parent_path = match new_parent {
                Some(parent_id) => t
                    .org_units
                    .get(&parent_id)
                    .filter(|p| p.tenant_id == node.tenant_id)
                    .map(|p| p.path.clone())
                    .ok_or_else(|| StoreError::Invalid(format!("parent org unit {parent_id} not found")))?,
                None => String::new(),
            };
            ensure_valid_reparent(&node.path, new_parent.map(|_| parent_path.as_str()))
                .map_err(|e| StoreError::Invalid(e.message().to_string()))?;

            let new_path = windcms_auth::org::child_path(&parent_path, id);
            for unit in t.org_units.values_mut().filter(|u| u.tenant_id == node.tenant_id) {
                if let Some(rebased) = rebase_path(&unit.path, &node.path, &new_path) {
                    unit.path = rebased;
                }
            }
            let moved = t
                .org_units
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(format!("org unit {id}")))?;
            moved.parent_id = new_parent;
            moved.audit.touch(Utc::now(), None);
            Ok(moved.clone())
        })
    }

    async fn delete_org_unit_subtree(&self, id: OrgUnitId) -> StoreResult<u64> {
        let mut tables = self.write()?;
        let Some(node) = tables.org_units.get(&id).cloned() else {
            return Ok(0);
        };
        let before = tables.org_units.len();
        tables
            .org_units
            .retain(|_, u| !(u.tenant_id == node.tenant_id && is_within(&u.path, &node.path)));
        Ok((before - tables.org_units.len()) as u64)
    }
}

#[async_trait]
impl PositionStore for InMemoryIdentityStore {
    async fn create_position(&self, draft: PositionDraft) -> StoreResult<Position> {
        let mut tables = self.write()?;
        let code = draft.code.trim();
        if tables
            .positions
            .values()
            .any(|p| p.tenant_id == draft.tenant_id && p.code == code)
        {
            return Err(StoreError::Conflict(format!("position code '{code}' already exists")));
        }
        let id = PositionId::new(next(&mut tables.seq.position));
        let position = draft.into_position(id, Utc::now());
        tables.positions.insert(id, position.clone());
        Ok(position)
    }

    async fn get_position(&self, id: PositionId) -> StoreResult<Option<Position>> {
        Ok(self.read()?.positions.get(&id).cloned())
    }

    async fn find_position_by_code(&self, tenant_id: TenantId, code: &str) -> StoreResult<Option<Position>> {
        Ok(self
            .read()?
            .positions
            .values()
            .find(|p| p.tenant_id == tenant_id && p.code == code)
            .cloned())
    }

    async fn list_positions(&self, tenant_id: TenantId) -> StoreResult<Vec<Position>> {
        Ok(self
            .read()?
            .positions
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn update_position(&self, position: Position) -> StoreResult<Position> {
        let mut tables = self.write()?;
        if tables.positions.values().any(|p| {
            p.id != position.id && p.tenant_id == position.tenant_id && p.code == position.code
        }) {
            return Err(StoreError::Conflict(format!(
                "position code '{}' already exists",
                position.code
            )));
        }
        let slot = tables
            .positions
            .get_mut(&position.id)
            .ok_or_else(|| StoreError::NotFound(format!("position {}", position.id)))?;
        *slot = position.clone();
        Ok(position)
    }

    async fn delete_position(&self, id: PositionId) -> StoreResult<bool> {
        Ok(self.write()?.positions.remove(&id).is_some())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Login policies
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl LoginPolicyStore for InMemoryIdentityStore {
    async fn create_login_policy(&self, policy: NewLoginPolicy) -> StoreResult<LoginPolicy> {
        let mut tables = self.write()?;
        let id = LoginPolicyId::new(next(&mut tables.seq.policy));
        let policy = policy.into_policy(id, Utc::now());
        tables.policies.insert(id, policy.clone());
        Ok(policy)
    }

    async fn list_login_policies(&self, tenant_id: TenantId) -> StoreResult<Vec<LoginPolicy>> {
        Ok(self
            .read()?
            .policies
            .values()
            .filter(|p| p.tenant_id == tenant_id || p.tenant_id.is_platform())
            .cloned()
            .collect())
    }

    async fn delete_login_policy(&self, id: LoginPolicyId) -> StoreResult<bool> {
        Ok(self.write()?.policies.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use windcms_auth::{CredentialType, RoleDraft, RoleType};

    use super::*;

    fn new_user(tenant: u32, username: &str) -> NewUser {
        NewUser {
            tenant_id: TenantId::new(tenant),
            username: username.into(),
            ..Default::default()
        }
    }

    fn new_credential(identifier: &str) -> NewCredential {
        NewCredential {
            identity_type: Some(IdentityType::Username),
            identifier: identifier.into(),
            credential_type: CredentialType::Plain,
            secret: "pw".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failed_multi_row_write_leaves_nothing_behind() {
        let store = InMemoryIdentityStore::new();
        let (first, _) = store
            .create_user_with_credential(new_user(1, "alice"), new_credential("alice"))
            .await
            .unwrap();

        // Same identifier: the credential insert fails after the user insert.
        let err = store
            .create_user_with_credential(new_user(1, "bob"), new_credential("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.find_user_by_username(TenantId::new(1), "bob").await.unwrap().is_none());
        assert_eq!(store.get_user(first.id).await.unwrap().unwrap().username, "alice");
    }

    #[tokio::test]
    async fn usernames_are_unique_per_tenant() {
        let store = InMemoryIdentityStore::new();
        store.create_user(new_user(1, "alice")).await.unwrap();
        store.create_user(new_user(2, "alice")).await.unwrap();
        assert!(store.create_user(new_user(1, "alice")).await.is_err());
    }

    #[tokio::test]
    async fn delete_user_cascades() {
        let store = InMemoryIdentityStore::new();
        let (user, _) = store
            .create_user_with_credential(new_user(1, "alice"), new_credential("alice"))
            .await
            .unwrap();
        store
            .replace_user_edges(
                user.id,
                EdgeSet {
                    tenant_id: TenantId::new(1),
                    targets: vec![(RelationKind::Role, 10, true)],
                    status: MembershipStatus::Active,
                    window: Window::open(Utc::now()),
                    operator: None,
                },
            )
            .await
            .unwrap();

        assert!(store.delete_user(user.id).await.unwrap());
        assert!(store.list_credentials_by_user(user.id).await.unwrap().is_empty());
        assert!(store.user_edges(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn role_update_bumps_template_version_only_for_templates() {
        let store = InMemoryIdentityStore::new();
        let draft = RoleDraft {
            code: "tpl:admin".into(),
            role_type: RoleType::Template,
            ..Default::default()
        }
        .normalized()
        .unwrap();
        let metadata = RoleMetadata::derive(RoleId::default(), draft.role_type, &draft.code);
        let (role, meta) = store
            .create_role(NewRoleRecord {
                draft,
                metadata,
                permission_ids: vec![PermissionId::new(1)],
            })
            .await
            .unwrap();
        assert_eq!(meta.role_id, role.id);
        assert_eq!(meta.template_version, 1);

        let (_, meta) = store.update_role(role.clone(), None).await.unwrap();
        assert_eq!(meta.unwrap().template_version, 2);
        assert_eq!(
            store.permission_ids_for_roles(&[role.id]).await.unwrap(),
            vec![PermissionId::new(1)]
        );
    }

    #[tokio::test]
    async fn move_rewrites_descendant_paths() {
        let store = InMemoryIdentityStore::new();
        let draft = |parent: Option<OrgUnitId>, name: &str| OrgUnitDraft {
            tenant_id: TenantId::new(1),
            parent_id: parent,
            name: name.into(),
            ..Default::default()
        };
        let a = store.create_org_unit(draft(None, "a")).await.unwrap();
        let b = store.create_org_unit(draft(Some(a.id), "b")).await.unwrap();
        let c = store.create_org_unit(draft(Some(b.id), "c")).await.unwrap();
        let d = store.create_org_unit(draft(None, "d")).await.unwrap();
        assert_eq!(c.path, "/1/2/3");

        store.move_org_unit(b.id, Some(d.id)).await.unwrap();
        let c = store.get_org_unit(c.id).await.unwrap().unwrap();
        assert_eq!(c.path, "/4/2/3");

        let err = store.move_org_unit(d.id, Some(c.id)).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        assert_eq!(store.delete_org_unit_subtree(d.id).await.unwrap(), 3);
        assert!(store.get_org_unit(a.id).await.unwrap().is_some());
    }
}
