//! Role registry: role lifecycle, template cloning and assignability.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use windcms_auth::{
    Role, RoleDraft, RoleMetadata, TENANT_ADMIN_TEMPLATE_CODE, can_assign,
};
use windcms_core::{DomainError, DomainResult, FieldMask, PermissionId, RoleId, TenantId, UserId, sorted_unique};

use crate::audit::{AuditEvent, AuditKind, AuditRecorder, AuditTarget, render_ids};
use crate::store::{NewRoleRecord, PermissionStore, RoleStore};

/// Mask-driven role update.
#[derive(Debug, Clone)]
pub struct RoleUpdate {
    pub id: RoleId,
    pub draft: RoleDraft,
    pub mask: FieldMask,
    /// Replace the permission set when given.
    pub permission_ids: Option<Vec<PermissionId>>,
    /// Create the role from `draft` when `id` does not exist.
    pub allow_missing: bool,
    pub operator: Option<UserId>,
}

pub struct RoleRegistry<S: ?Sized> {
    store: Arc<S>,
    audit: AuditRecorder,
}

impl<S: ?Sized> Clone for RoleRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            audit: self.audit.clone(),
        }
    }
}

fn role_event(kind: AuditKind, role: &Role, operator: Option<UserId>) -> AuditEvent {
    AuditEvent::new(kind, role.tenant_id, None)
        .operator(operator)
        .target(AuditTarget::Role, role.id.get())
        .detail(role.code.clone())
}

impl<S> RoleRegistry<S>
where
    S: RoleStore + PermissionStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            audit: AuditRecorder::default(),
        }
    }

    pub fn with_audit(mut self, audit: AuditRecorder) -> Self {
        self.audit = audit;
        self
    }

    /// Create a role with derived metadata and an initial permission set.
    #[instrument(skip(self, draft, permission_ids), fields(code = %draft.code), err)]
    pub async fn create(&self, draft: RoleDraft, permission_ids: Vec<PermissionId>) -> DomainResult<Role> {
        let draft = draft.normalized()?;
        let operator = draft.created_by;
        let metadata = RoleMetadata::derive(RoleId::new(0), draft.role_type, &draft.code);
        let permission_ids = sorted_unique(permission_ids);
        let granted = render_ids(permission_ids.iter().map(|id| id.get()));
        let (role, _) = self
            .store
            .create_role(NewRoleRecord {
                draft,
                metadata,
                permission_ids,
            })
            .await?;
        info!(role_id = %role.id, tenant_id = %role.tenant_id, "role created");
        self.audit
            .record(role_event(AuditKind::RoleCreated, &role, operator).change(None, Some(granted)));
        Ok(role)
    }

    pub async fn get(&self, id: RoleId) -> DomainResult<Role> {
        self.store
            .get_role(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("role {id} not found")))
    }

    pub async fn get_by_code(&self, tenant_id: TenantId, code: &str) -> DomainResult<Role> {
        self.store
            .find_role_by_code(tenant_id, code.trim())
            .await?
            .ok_or_else(|| DomainError::not_found(format!("role '{code}' not found")))
    }

    pub async fn list(&self, tenant_id: TenantId) -> DomainResult<Vec<Role>> {
        Ok(self.store.list_roles(tenant_id).await?)
    }

    pub async fn metadata(&self, id: RoleId) -> DomainResult<Option<RoleMetadata>> {
        Ok(self.store.get_role_metadata(id).await?)
    }

    /// Enabled, protected platform role with `code`.
    pub async fn get_template_role(&self, code: &str) -> DomainResult<Role> {
        self.store
            .find_template_role(code)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("template role '{code}' not found")))
    }

    /// Apply `update.mask`, replace permissions when given and bump the
    /// template version, all in one store transaction.
    #[instrument(skip(self, update), fields(role_id = %update.id), err)]
    pub async fn update(&self, update: RoleUpdate) -> DomainResult<(Role, Option<RoleMetadata>)> {
        let RoleUpdate {
            id,
            mut draft,
            mask,
            permission_ids,
            allow_missing,
            operator,
        } = update;

        let Some(mut role) = self.store.get_role(id).await? else {
            if !allow_missing {
                return Err(DomainError::not_found(format!("role {id} not found")));
            }
            draft.created_by = draft.created_by.or(operator);
            let role = self.create(draft, permission_ids.unwrap_or_default()).await?;
            let metadata = self.store.get_role_metadata(role.id).await?;
            return Ok((role, metadata));
        };

        role.apply(&draft, &mask);
        let normalized = RoleDraft {
            tenant_id: role.tenant_id,
            code: role.code.clone(),
            name: role.name.clone(),
            role_type: role.role_type,
            status: role.status,
            is_protected: role.is_protected,
            sort_order: role.sort_order,
            description: role.description.clone(),
            created_by: role.audit.created_by,
        }
        .normalized()?;
        role.code = normalized.code;
        role.name = normalized.name;
        role.tenant_id = normalized.tenant_id;
        role.is_protected = normalized.is_protected;
        role.audit.touch(Utc::now(), operator);

        let permission_ids = permission_ids.map(sorted_unique);
        let previous = match &permission_ids {
            Some(_) => Some(self.store.permission_ids_for_roles(&[role.id]).await?),
            None => None,
        };
        let (role, metadata) = self.store.update_role(role, permission_ids.clone()).await?;
        if let Some(m) = metadata.as_ref().filter(|m| m.is_template) {
            info!(role_id = %role.id, template_version = m.template_version, "template upgraded");
        }
        let render = |ids: Option<Vec<PermissionId>>| ids.map(|ids| render_ids(ids.into_iter().map(|id| id.get())));
        self.audit.record(
            role_event(AuditKind::RoleUpdated, &role, operator).change(render(previous), render(permission_ids)),
        );
        Ok((role, metadata))
    }

    /// Protected roles are never deleted.
    #[instrument(skip(self), err)]
    pub async fn delete(&self, id: RoleId, operator: Option<UserId>) -> DomainResult<()> {
        let role = self.get(id).await?;
        role.ensure_deletable()?;
        self.store.delete_role(id).await?;
        info!(role_id = %id, "role deleted");
        self.audit.record(role_event(AuditKind::RoleDeleted, &role, operator));
        Ok(())
    }

    /// Clone the tenant administrator template into `tenant_id`, copying its
    /// permission set.
    #[instrument(skip(self), err)]
    pub async fn create_tenant_role_from_template(
        &self,
        tenant_id: TenantId,
        operator: UserId,
    ) -> DomainResult<Role> {
        let template = self.get_template_role(TENANT_ADMIN_TEMPLATE_CODE).await?;
        let now = Utc::now();
        let draft = RoleDraft::clone_of_template(&template, tenant_id, operator).normalized()?;
        let metadata = match self.store.get_role_metadata(template.id).await? {
            Some(m) => m.for_clone(RoleId::new(0), now),
            None => RoleMetadata::derive(RoleId::new(0), draft.role_type, &draft.code),
        };
        let permission_ids = self.store.permission_ids_for_roles(&[template.id]).await?;

        let (role, _) = self
            .store
            .create_role(NewRoleRecord {
                draft,
                metadata,
                permission_ids,
            })
            .await?;
        info!(role_id = %role.id, template_id = %template.id, "tenant role cloned from template");
        self.audit.record(
            role_event(AuditKind::RoleClonedFromTemplate, &role, Some(operator))
                .change(Some(template.code.clone()), Some(role.code.clone())),
        );
        Ok(role)
    }

    /// `FORBIDDEN` naming the first rule the role violates.
    pub async fn can_assign(&self, id: RoleId) -> DomainResult<()> {
        let role = self.get(id).await?;
        let metadata = self.store.get_role_metadata(id).await?;
        Ok(can_assign(&role, metadata.as_ref())?)
    }

    pub async fn role_codes_by_ids(&self, ids: &[RoleId]) -> DomainResult<Vec<String>> {
        Ok(self.store.role_codes_by_ids(ids).await?)
    }

    pub async fn role_ids_by_codes(&self, tenant_id: TenantId, codes: &[String]) -> DomainResult<Vec<RoleId>> {
        Ok(self.store.role_ids_by_codes(tenant_id, codes).await?)
    }
}

#[cfg(test)]
mod tests {
    use windcms_auth::{RoleStatus, RoleType, SyncPolicy};
    use windcms_core::ErrorCode;

    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::store::InMemoryIdentityStore;

    fn registry() -> RoleRegistry<InMemoryIdentityStore> {
        RoleRegistry::new(InMemoryIdentityStore::arc())
    }

    fn template() -> RoleDraft {
        RoleDraft {
            code: "tpl:admin".into(),
            name: "Administrator".into(),
            role_type: RoleType::Template,
            ..Default::default()
        }
    }

    fn tenant_role(code: &str) -> RoleDraft {
        RoleDraft {
            tenant_id: TenantId::new(3),
            code: code.into(),
            role_type: RoleType::Tenant,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_derives_metadata() {
        let reg = registry();
        let tpl = reg.create(template(), vec![]).await.unwrap();
        assert!(tpl.is_protected);
        assert!(tpl.tenant_id.is_platform());

        let meta = reg.metadata(tpl.id).await.unwrap().unwrap();
        assert!(meta.is_template);
        assert_eq!(meta.template_for.as_deref(), Some("admin"));
        assert_eq!(meta.template_version, 1);
        assert_eq!(meta.sync_policy, SyncPolicy::Auto);
    }

    #[tokio::test]
    async fn template_update_bumps_version() {
        let reg = registry();
        let tpl = reg.create(template(), vec![PermissionId::new(1)]).await.unwrap();
        let (role, meta) = reg
            .update(RoleUpdate {
                id: tpl.id,
                draft: RoleDraft {
                    name: "Admin v2".into(),
                    ..template()
                },
                mask: FieldMask::of(["name"]),
                permission_ids: None,
                allow_missing: false,
                operator: None,
            })
            .await
            .unwrap();
        assert_eq!(role.name, "Admin v2");
        assert_eq!(meta.unwrap().template_version, 2);
    }

    #[tokio::test]
    async fn tenant_role_update_keeps_version() {
        let reg = registry();
        let role = reg.create(tenant_role("editor"), vec![]).await.unwrap();
        let (_, meta) = reg
            .update(RoleUpdate {
                id: role.id,
                draft: RoleDraft {
                    status: RoleStatus::Off,
                    ..tenant_role("editor")
                },
                mask: FieldMask::of(["status"]),
                permission_ids: Some(vec![PermissionId::new(4)]),
                allow_missing: false,
                operator: None,
            })
            .await
            .unwrap();
        assert_eq!(meta.unwrap().template_version, 1);
    }

    #[tokio::test]
    async fn missing_role_update_creates_with_operator_as_creator() {
        let reg = registry();
        let (role, _) = reg
            .update(RoleUpdate {
                id: RoleId::new(77),
                draft: tenant_role("viewer"),
                mask: FieldMask::all(),
                permission_ids: None,
                allow_missing: true,
                operator: Some(UserId::new(9)),
            })
            .await
            .unwrap();
        assert_eq!(role.audit.created_by, Some(UserId::new(9)));
    }

    #[tokio::test]
    async fn protected_role_is_not_deleted() {
        let reg = registry();
        let tpl = reg.create(template(), vec![]).await.unwrap();
        let err = reg.delete(tpl.id, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert!(reg.get(tpl.id).await.is_ok());

        let plain = reg.create(tenant_role("editor"), vec![]).await.unwrap();
        reg.delete(plain.id, Some(UserId::new(1))).await.unwrap();
        assert_eq!(reg.get(plain.id).await.unwrap_err().code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn role_changes_are_audited() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let reg = registry().with_audit(AuditRecorder::new(sink.clone()));
        let tpl = reg.create(template(), vec![]).await.unwrap();
        let clone = reg
            .create_tenant_role_from_template(TenantId::new(3), UserId::new(5))
            .await
            .unwrap();
        assert!(reg.delete(tpl.id, Some(UserId::new(5))).await.is_err());
        let editor = reg.create(tenant_role("editor"), vec![]).await.unwrap();
        reg.delete(editor.id, Some(UserId::new(5))).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let events = sink.events();
        let count = |kind| events.iter().filter(|e| e.kind == kind).count();
        assert_eq!(count(AuditKind::RoleCreated), 2);
        assert_eq!(count(AuditKind::RoleDeleted), 1);

        let cloned = events.iter().find(|e| e.kind == AuditKind::RoleClonedFromTemplate).unwrap();
        assert_eq!(cloned.tenant_id, TenantId::new(3));
        assert_eq!(cloned.operator, Some(UserId::new(5)));
        assert_eq!(cloned.target.map(|t| t.id), Some(clone.id.get()));

        let deleted = events.iter().find(|e| e.kind == AuditKind::RoleDeleted).unwrap();
        assert_eq!(deleted.target.map(|t| t.id), Some(editor.id.get()));
    }

    #[tokio::test]
    async fn assignability_rules() {
        let reg = registry();
        let tpl = reg.create(template(), vec![]).await.unwrap();
        let err = reg.can_assign(tpl.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        let off = reg
            .create(
                RoleDraft {
                    status: RoleStatus::Off,
                    ..tenant_role("off")
                },
                vec![],
            )
            .await
            .unwrap();
        assert!(reg.can_assign(off.id).await.unwrap_err().message().contains("not enabled"));

        let ok = reg.create(tenant_role("editor"), vec![]).await.unwrap();
        reg.can_assign(ok.id).await.unwrap();
    }

    #[tokio::test]
    async fn template_missing_is_not_found() {
        let reg = registry();
        let err = reg
            .create_tenant_role_from_template(TenantId::new(7), UserId::new(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn codes_and_ids_lookups() {
        let reg = registry();
        let a = reg.create(tenant_role("a"), vec![]).await.unwrap();
        let b = reg.create(tenant_role("b"), vec![]).await.unwrap();
        let codes = reg.role_codes_by_ids(&[b.id, a.id]).await.unwrap();
        assert_eq!(codes, vec!["a".to_string(), "b".to_string()]);
        let ids = reg
            .role_ids_by_codes(TenantId::new(3), &["b".into(), "zzz".into()])
            .await
            .unwrap();
        assert_eq!(ids, vec![b.id]);
    }
}
