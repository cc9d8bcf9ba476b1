//! Permissions and their codes.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use windcms_core::{AuditFields, DomainError, DomainResult, Entity, PermissionId, TenantId};

/// Code that opens the administrative backend.
pub const ACCESS_BACKEND: &str = "sys:access_backend";

/// Permission code.
///
/// Codes are opaque strings (e.g. `"cms:post:edit"`); only
/// [`ACCESS_BACKEND`] carries meaning inside the identity core.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionCode(Cow<'static, str>);

impl PermissionCode {
    pub const fn from_static(code: &'static str) -> Self {
        Self(Cow::Borrowed(code))
    }

    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    pub fn access_backend() -> Self {
        Self::from_static(ACCESS_BACKEND)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PermissionCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PermissionCode {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

/// A globally scoped permission.
///
/// API endpoints and menus hang off a permission through association
/// tables; they are not embedded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub code: PermissionCode,
    pub name: String,
    pub description: Option<String>,
    pub audit: AuditFields,
}

impl Entity for Permission {
    type Id = PermissionId;

    fn id(&self) -> PermissionId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        TenantId::PLATFORM
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewPermission {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
}

impl NewPermission {
    pub fn validate(&self) -> DomainResult<()> {
        if self.code.trim().is_empty() {
            return Err(DomainError::bad_request("permission code is required"));
        }
        Ok(())
    }

    pub fn into_permission(self, id: PermissionId, now: DateTime<Utc>) -> Permission {
        Permission {
            id,
            code: PermissionCode::from(self.code.trim().to_string()),
            name: self.name,
            description: self.description,
            audit: AuditFields::created(now, None),
        }
    }
}
