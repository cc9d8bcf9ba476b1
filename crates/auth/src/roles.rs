//! Roles, role metadata and the template rules around them.
//!
//! Platform-level template roles (code prefixed with [`TEMPLATE_PREFIX`]) are
//! blueprints. Cloning one into a tenant strips the prefix and yields a
//! protected `TENANT` role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use windcms_core::{
    AuditFields, DomainError, DomainResult, Entity, FieldMask, RoleId, TenantId, UserId, wire_enum,
};

/// Code prefix that marks a template role.
pub const TEMPLATE_PREFIX: &str = "tpl:";

/// The template every new tenant's administrator role is cloned from.
pub const TENANT_ADMIN_TEMPLATE_CODE: &str = "tpl:admin";

/// `template_for` value reserved for the platform administrator.
pub const RESERVED_TEMPLATE_FOR: &str = "platform-admin";

// ─────────────────────────────────────────────────────────────────────────────
// Enums
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleType {
    System,
    Template,
    #[default]
    Tenant,
}

wire_enum!(RoleType {
    System => "SYSTEM",
    Template => "TEMPLATE",
    Tenant => "TENANT",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleStatus {
    #[default]
    On,
    Off,
}

wire_enum!(RoleStatus {
    On => "ON",
    Off => "OFF",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleScope {
    Platform,
    #[default]
    Tenant,
}

wire_enum!(RoleScope {
    Platform => "PLATFORM",
    Tenant => "TENANT",
});

/// Whether template upgrades may propagate to a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPolicy {
    /// Follow template upgrades.
    #[default]
    Auto,
    /// Operator-driven upgrades.
    Manual,
    /// Frozen; also forbids assignment.
    Blocked,
}

wire_enum!(SyncPolicy {
    Auto => "AUTO",
    Manual => "MANUAL",
    Blocked => "BLOCKED",
});

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
    pub role_type: RoleType,
    pub status: RoleStatus,
    pub is_protected: bool,
    pub sort_order: u32,
    pub description: Option<String>,
    pub audit: AuditFields,
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> RoleId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

impl Role {
    pub fn is_template(&self) -> bool {
        self.code.starts_with(TEMPLATE_PREFIX)
    }

    /// Protected roles can never be deleted.
    pub fn ensure_deletable(&self) -> DomainResult<()> {
        if self.is_protected {
            return Err(DomainError::forbidden(format!(
                "role '{}' is protected and cannot be deleted",
                self.code
            )));
        }
        Ok(())
    }

    /// Overwrite the fields named by `mask` with the draft's values.
    pub fn apply(&mut self, draft: &RoleDraft, mask: &FieldMask) {
        if mask.contains("code") {
            self.code = draft.code.clone();
        }
        if mask.contains("name") {
            self.name = draft.name.clone();
        }
        if mask.contains("type") {
            self.role_type = draft.role_type;
        }
        if mask.contains("status") {
            self.status = draft.status;
        }
        if mask.contains("is_protected") {
            self.is_protected = draft.is_protected;
        }
        if mask.contains("sort_order") {
            self.sort_order = draft.sort_order;
        }
        if mask.contains("description") {
            self.description = draft.description.clone();
        }
    }
}

/// One-to-one companion of a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMetadata {
    pub role_id: RoleId,
    pub scope: RoleScope,
    pub is_template: bool,
    /// Code a template instantiates to (its own code without the prefix).
    pub template_for: Option<String>,
    pub template_version: u32,
    pub last_synced_version: Option<u32>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub sync_policy: SyncPolicy,
}

impl RoleMetadata {
    /// Metadata derived for a freshly created role.
    pub fn derive(role_id: RoleId, role_type: RoleType, code: &str) -> Self {
        let (scope, is_template) = match role_type {
            RoleType::System => (RoleScope::Platform, false),
            RoleType::Template => (RoleScope::Platform, true),
            RoleType::Tenant => (RoleScope::Tenant, false),
        };
        Self {
            role_id,
            scope,
            is_template,
            template_for: is_template.then(|| strip_template_prefix(code).to_string()),
            template_version: 1,
            last_synced_version: None,
            last_synced_at: None,
            sync_policy: SyncPolicy::Auto,
        }
    }

    /// Bump the version of a template. Non-template metadata is untouched.
    pub fn bump_template_version(&mut self) -> bool {
        if self.is_template {
            self.template_version += 1;
            true
        } else {
            false
        }
    }

    /// Metadata for a role cloned from this template at `now`.
    pub fn for_clone(&self, role_id: RoleId, now: DateTime<Utc>) -> Self {
        Self {
            role_id,
            scope: RoleScope::Tenant,
            is_template: false,
            template_for: None,
            template_version: self.template_version,
            last_synced_version: Some(self.template_version),
            last_synced_at: Some(now),
            sync_policy: SyncPolicy::Auto,
        }
    }
}

/// Field values for creating or updating a role.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoleDraft {
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
    pub role_type: RoleType,
    pub status: RoleStatus,
    pub is_protected: bool,
    pub sort_order: u32,
    pub description: Option<String>,
    pub created_by: Option<UserId>,
}

impl RoleDraft {
    /// Validate and apply the template rules: templates live on the platform,
    /// carry the prefix and are always protected.
    pub fn normalized(mut self) -> DomainResult<Self> {
        self.code = self.code.trim().to_string();
        if self.code.is_empty() {
            return Err(DomainError::bad_request("role code is required"));
        }
        if self.name.trim().is_empty() {
            self.name = self.code.clone();
        }
        match self.role_type {
            RoleType::Template => {
                if !self.code.starts_with(TEMPLATE_PREFIX) {
                    return Err(DomainError::bad_request(format!(
                        "template role code must start with '{TEMPLATE_PREFIX}'"
                    )));
                }
                self.tenant_id = TenantId::PLATFORM;
                self.is_protected = true;
            }
            RoleType::System => {
                self.tenant_id = TenantId::PLATFORM;
            }
            RoleType::Tenant => {
                if self.code.starts_with(TEMPLATE_PREFIX) {
                    return Err(DomainError::bad_request(
                        "tenant role code must not use the template prefix",
                    ));
                }
            }
        }
        Ok(self)
    }

    /// Deep copy of a template for `tenant_id`.
    pub fn clone_of_template(template: &Role, tenant_id: TenantId, operator: UserId) -> Self {
        Self {
            tenant_id,
            code: strip_template_prefix(&template.code).to_string(),
            name: template.name.clone(),
            role_type: RoleType::Tenant,
            status: RoleStatus::On,
            is_protected: true,
            sort_order: template.sort_order,
            description: template.description.clone(),
            created_by: Some(operator),
        }
    }

    pub fn into_role(self, id: RoleId, now: DateTime<Utc>) -> Role {
        Role {
            id,
            tenant_id: self.tenant_id,
            code: self.code,
            name: self.name,
            role_type: self.role_type,
            status: self.status,
            is_protected: self.is_protected,
            sort_order: self.sort_order,
            description: self.description,
            audit: AuditFields::created(now, self.created_by),
        }
    }
}

pub fn strip_template_prefix(code: &str) -> &str {
    code.strip_prefix(TEMPLATE_PREFIX).unwrap_or(code)
}

// ─────────────────────────────────────────────────────────────────────────────
// Assignability
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssignError {
    #[error("role '{0}' is not enabled")]
    NotEnabled(String),

    #[error("role '{0}' is a template and is not assignable")]
    TemplateNotAssignable(String),

    #[error("role '{0}' is sync-blocked and is not assignable")]
    SyncBlocked(String),

    #[error("role '{0}' is reserved for the platform administrator")]
    Reserved(String),
}

impl From<AssignError> for DomainError {
    fn from(err: AssignError) -> Self {
        DomainError::forbidden(err.to_string())
    }
}

/// Decide whether a role may be granted to a user.
///
/// Checks run in a fixed order so the first violated rule names the error.
pub fn can_assign(role: &Role, metadata: Option<&RoleMetadata>) -> Result<(), AssignError> {
    if role.status != RoleStatus::On {
        return Err(AssignError::NotEnabled(role.code.clone()));
    }
    let Some(metadata) = metadata else {
        return Ok(());
    };
    if metadata.is_template {
        return Err(AssignError::TemplateNotAssignable(role.code.clone()));
    }
    if metadata.sync_policy == SyncPolicy::Blocked {
        return Err(AssignError::SyncBlocked(role.code.clone()));
    }
    if metadata.template_for.as_deref() == Some(RESERVED_TEMPLATE_FOR) {
        return Err(AssignError::Reserved(role.code.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Role {
        RoleDraft {
            code: "tpl:admin".into(),
            name: "Tenant administrator".into(),
            role_type: RoleType::Template,
            ..Default::default()
        }
        .normalized()
        .unwrap()
        .into_role(RoleId::new(1), Utc::now())
    }

    #[test]
    fn template_drafts_are_protected_platform_roles() {
        let tpl = template();
        assert!(tpl.is_protected);
        assert!(tpl.tenant_id.is_platform());
        assert!(tpl.is_template());
    }

    #[test]
    fn template_code_needs_prefix() {
        let draft = RoleDraft {
            code: "admin".into(),
            role_type: RoleType::Template,
            ..Default::default()
        };
        assert!(draft.normalized().is_err());
    }

    #[test]
    fn metadata_derivation_by_type() {
        let m = RoleMetadata::derive(RoleId::new(1), RoleType::Template, "tpl:admin");
        assert_eq!(m.scope, RoleScope::Platform);
        assert!(m.is_template);
        assert_eq!(m.template_for.as_deref(), Some("admin"));
        assert_eq!(m.sync_policy, SyncPolicy::Auto);

        let m = RoleMetadata::derive(RoleId::new(2), RoleType::System, "root");
        assert_eq!(m.scope, RoleScope::Platform);
        assert!(!m.is_template);

        let m = RoleMetadata::derive(RoleId::new(3), RoleType::Tenant, "editor");
        assert_eq!(m.scope, RoleScope::Tenant);
        assert_eq!(m.template_for, None);
    }

    #[test]
    fn clone_strips_prefix_and_protects() {
        let draft = RoleDraft::clone_of_template(&template(), TenantId::new(7), UserId::new(1));
        assert_eq!(draft.code, "admin");
        assert_eq!(draft.tenant_id, TenantId::new(7));
        assert_eq!(draft.role_type, RoleType::Tenant);
        assert!(draft.is_protected);
        assert_eq!(draft.created_by, Some(UserId::new(1)));
    }

    #[test]
    fn version_bump_only_for_templates() {
        let mut tpl = RoleMetadata::derive(RoleId::new(1), RoleType::Template, "tpl:admin");
        assert!(tpl.bump_template_version());
        assert_eq!(tpl.template_version, 2);

        let mut plain = RoleMetadata::derive(RoleId::new(2), RoleType::Tenant, "editor");
        assert!(!plain.bump_template_version());
        assert_eq!(plain.template_version, 1);
    }

    #[test]
    fn protected_roles_refuse_deletion() {
        let err = template().ensure_deletable().unwrap_err();
        assert_eq!(err.code(), windcms_core::ErrorCode::Forbidden);
    }

    #[test]
    fn assignability_rules_in_order() {
        let mut role = template();
        let mut meta = RoleMetadata::derive(role.id, RoleType::Template, &role.code);

        role.status = RoleStatus::Off;
        assert!(matches!(can_assign(&role, Some(&meta)), Err(AssignError::NotEnabled(_))));

        role.status = RoleStatus::On;
        assert!(matches!(
            can_assign(&role, Some(&meta)),
            Err(AssignError::TemplateNotAssignable(_))
        ));

        meta.is_template = false;
        meta.sync_policy = SyncPolicy::Blocked;
        assert!(matches!(can_assign(&role, Some(&meta)), Err(AssignError::SyncBlocked(_))));

        meta.sync_policy = SyncPolicy::Manual;
        meta.template_for = Some(RESERVED_TEMPLATE_FOR.into());
        assert!(matches!(can_assign(&role, Some(&meta)), Err(AssignError::Reserved(_))));

        meta.template_for = None;
        assert!(can_assign(&role, Some(&meta)).is_ok());
    }

    #[test]
    fn masked_apply_touches_only_named_fields() {
        let mut role = template();
        let draft = RoleDraft {
            code: "changed".into(),
            name: "Renamed".into(),
            ..Default::default()
        };
        role.apply(&draft, &FieldMask::of(["name"]));
        assert_eq!(role.name, "Renamed");
        assert_eq!(role.code, "tpl:admin");
    }
}
