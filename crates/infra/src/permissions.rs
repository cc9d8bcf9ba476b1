//! Permission resolver: transitive user → role → permission → api/menu
//! lookups. Every result is deduplicated and ascending.

use std::sync::Arc;

use tracing::{info, instrument};

use windcms_auth::{NewPermission, Permission, PermissionCode};
use windcms_core::{ApiId, DomainResult, MenuId, PermissionId, RoleId, TenantId, UserId, sorted_unique};

use crate::audit::{AuditEvent, AuditKind, AuditRecorder, AuditTarget, render_ids};
use crate::membership::MembershipGraph;
use crate::store::{DirectEdgeStore, MembershipStore, PermissionStore, RoleStore};

pub struct PermissionResolver<S: ?Sized> {
    store: Arc<S>,
    graph: MembershipGraph<S>,
    audit: AuditRecorder,
}

impl<S: ?Sized> Clone for PermissionResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            graph: self.graph.clone(),
            audit: self.audit.clone(),
        }
    }
}

impl<S> PermissionResolver<S>
where
    S: PermissionStore + RoleStore + DirectEdgeStore + MembershipStore + ?Sized,
{
    pub fn new(store: Arc<S>, graph: MembershipGraph<S>) -> Self {
        Self {
            store,
            graph,
            audit: AuditRecorder::default(),
        }
    }

    pub fn with_audit(mut self, audit: AuditRecorder) -> Self {
        self.audit = audit;
        self
    }

    #[instrument(skip(self, permission), fields(code = %permission.code), err)]
    pub async fn create_permission(&self, permission: NewPermission) -> DomainResult<Permission> {
        permission.validate()?;
        Ok(self.store.create_permission(permission).await?)
    }

    pub async fn list_permissions(&self) -> DomainResult<Vec<Permission>> {
        Ok(self.store.list_permissions().await?)
    }

    /// Replace the role's permission set in one transaction.
    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    pub async fn assign_role_permissions(
        &self,
        role_id: RoleId,
        ids: Vec<PermissionId>,
        operator: Option<UserId>,
    ) -> DomainResult<()> {
        let ids = sorted_unique(ids);
        let tenant_id = self
            .store
            .get_role(role_id)
            .await?
            .map_or(TenantId::PLATFORM, |role| role.tenant_id);
        let previous = self.store.permission_ids_for_roles(&[role_id]).await?;
        self.store.replace_role_permissions(role_id, &ids).await?;
        info!(%role_id, count = ids.len(), "role permissions replaced");
        self.audit.record(
            AuditEvent::new(AuditKind::RolePermissionsReplaced, tenant_id, None)
                .operator(operator)
                .target(AuditTarget::Role, role_id.get())
                .change(
                    Some(render_ids(previous.iter().map(|id| id.get()))),
                    Some(render_ids(ids.iter().map(|id| id.get()))),
                ),
        );
        Ok(())
    }

    pub async fn bind_apis(&self, id: PermissionId, api_ids: Vec<ApiId>) -> DomainResult<()> {
        Ok(self.store.set_permission_apis(id, &sorted_unique(api_ids)).await?)
    }

    pub async fn bind_menus(&self, id: PermissionId, menu_ids: Vec<MenuId>) -> DomainResult<()> {
        Ok(self.store.set_permission_menus(id, &sorted_unique(menu_ids)).await?)
    }

    /// Union of the permission sets of the user's effective roles.
    #[instrument(skip(self), err)]
    pub async fn permission_ids_for_user(
        &self,
        user_id: UserId,
        tenant_id: Option<TenantId>,
    ) -> DomainResult<Vec<PermissionId>> {
        let relations = self.graph.relation_ids(user_id, tenant_id).await?;
        self.permission_ids_for_roles(&relations.role_ids).await
    }

    pub async fn permission_ids_for_roles(&self, role_ids: &[RoleId]) -> DomainResult<Vec<PermissionId>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.permission_ids_for_roles(role_ids).await?)
    }

    pub async fn permission_ids_for_role_codes(
        &self,
        tenant_id: TenantId,
        codes: &[String],
    ) -> DomainResult<Vec<PermissionId>> {
        let role_ids = self.store.role_ids_by_codes(tenant_id, codes).await?;
        self.permission_ids_for_roles(&role_ids).await
    }

    pub async fn permission_codes_for(&self, ids: &[PermissionId]) -> DomainResult<Vec<PermissionCode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.store.permission_codes(ids).await?)
    }

    /// Codes granted to the user through its effective roles.
    pub async fn permission_codes_for_user(
        &self,
        user_id: UserId,
        tenant_id: Option<TenantId>,
    ) -> DomainResult<Vec<PermissionCode>> {
        let ids = self.permission_ids_for_user(user_id, tenant_id).await?;
        self.permission_codes_for(&ids).await
    }

    pub async fn api_ids_for(&self, role_ids: &[RoleId]) -> DomainResult<Vec<ApiId>> {
        let ids = self.permission_ids_for_roles(role_ids).await?;
        Ok(sorted_unique(self.store.api_ids_for_permissions(&ids).await?))
    }

    pub async fn menu_ids_for(&self, role_ids: &[RoleId]) -> DomainResult<Vec<MenuId>> {
        let ids = self.permission_ids_for_roles(role_ids).await?;
        Ok(sorted_unique(self.store.menu_ids_for_permissions(&ids).await?))
    }
}

#[cfg(test)]
mod tests {
    use windcms_auth::{RelationAssignment, RoleDraft};
    use windcms_core::UserTenantRelation;

    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::roles::RoleRegistry;
    use crate::store::InMemoryIdentityStore;

    struct Fixture {
        resolver: PermissionResolver<InMemoryIdentityStore>,
        roles: RoleRegistry<InMemoryIdentityStore>,
        graph: MembershipGraph<InMemoryIdentityStore>,
    }

    fn fixture() -> Fixture {
        let store = InMemoryIdentityStore::arc();
        let graph = MembershipGraph::new(Arc::clone(&store), UserTenantRelation::OneToOne);
        Fixture {
            resolver: PermissionResolver::new(Arc::clone(&store), graph.clone()),
            roles: RoleRegistry::new(store),
            graph,
        }
    }

    async fn permission(f: &Fixture, code: &str) -> PermissionId {
        f.resolver
            .create_permission(NewPermission {
                code: code.into(),
                name: code.into(),
                description: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn role(f: &Fixture, code: &str, perms: Vec<PermissionId>) -> RoleId {
        let draft = RoleDraft {
            tenant_id: TenantId::new(1),
            code: code.into(),
            ..Default::default()
        };
        f.roles.create(draft, perms).await.unwrap().id
    }

    #[tokio::test]
    async fn user_permissions_are_union_of_roles() {
        let f = fixture();
        let view = permission(&f, "cms:post:view").await;
        let edit = permission(&f, "cms:post:edit").await;
        let backend = permission(&f, "sys:access_backend").await;
        let reader = role(&f, "reader", vec![view]).await;
        let editor = role(&f, "editor", vec![view, edit]).await;
        role(&f, "admin", vec![backend]).await;

        f.graph
            .assign(
                UserId::new(42),
                Some(TenantId::new(1)),
                RelationAssignment {
                    role_ids: vec![editor, reader],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let ids = f.resolver.permission_ids_for_user(UserId::new(42), None).await.unwrap();
        assert_eq!(ids, vec![view, edit]);

        let codes = f.resolver.permission_codes_for_user(UserId::new(42), None).await.unwrap();
        assert_eq!(
            codes,
            vec![PermissionCode::new("cms:post:edit"), PermissionCode::new("cms:post:view")]
        );

        let by_code = f
            .resolver
            .permission_ids_for_role_codes(TenantId::new(1), &["admin".into()])
            .await
            .unwrap();
        assert_eq!(by_code, vec![backend]);
    }

    #[tokio::test]
    async fn replace_then_fan_out_to_apis_and_menus() {
        let f = fixture();
        let a = permission(&f, "a").await;
        let b = permission(&f, "b").await;
        let r = role(&f, "r", vec![a]).await;

        f.resolver.bind_apis(a, vec![ApiId::new(5), ApiId::new(3)]).await.unwrap();
        f.resolver.bind_apis(b, vec![ApiId::new(3), ApiId::new(9)]).await.unwrap();
        f.resolver.bind_menus(b, vec![MenuId::new(1)]).await.unwrap();

        assert_eq!(f.resolver.api_ids_for(&[r]).await.unwrap(), vec![ApiId::new(3), ApiId::new(5)]);
        assert!(f.resolver.menu_ids_for(&[r]).await.unwrap().is_empty());

        f.resolver.assign_role_permissions(r, vec![b, b], None).await.unwrap();
        assert_eq!(f.resolver.permission_ids_for_roles(&[r]).await.unwrap(), vec![b]);
        assert_eq!(f.resolver.api_ids_for(&[r]).await.unwrap(), vec![ApiId::new(3), ApiId::new(9)]);
        assert_eq!(f.resolver.menu_ids_for(&[r]).await.unwrap(), vec![MenuId::new(1)]);
    }

    #[tokio::test]
    async fn permission_replace_is_audited() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let mut f = fixture();
        f.resolver = f.resolver.with_audit(AuditRecorder::new(sink.clone()));
        let a = permission(&f, "a").await;
        let b = permission(&f, "b").await;
        let r = role(&f, "r", vec![a]).await;

        f.resolver
            .assign_role_permissions(r, vec![b, a], Some(UserId::new(7)))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, AuditKind::RolePermissionsReplaced);
        assert_eq!(event.tenant_id, TenantId::new(1));
        assert_eq!(event.operator, Some(UserId::new(7)));
        assert_eq!(event.target.map(|t| (t.kind, t.id)), Some((AuditTarget::Role, r.get())));
        assert_eq!(event.old_value, Some(render_ids([a.get()])));
        assert_eq!(event.new_value, Some(render_ids([a.get(), b.get()])));
    }

    #[tokio::test]
    async fn no_roles_no_permissions() {
        let f = fixture();
        assert!(f.resolver.permission_ids_for_user(UserId::new(1), None).await.unwrap().is_empty());
    }
}
