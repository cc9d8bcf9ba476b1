//! Tenants and their effectiveness rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use windcms_core::{AuditFields, DomainError, DomainResult, Entity, TenantId, UserId, wire_enum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantStatus {
    #[default]
    Active,
    Off,
    Expired,
    Freeze,
}

wire_enum!(TenantStatus {
    Active => "ACTIVE",
    Off => "OFF",
    Expired => "EXPIRED",
    Freeze => "FREEZE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantType {
    #[default]
    Trial,
    Paid,
    Internal,
    Partner,
    Custom,
}

wire_enum!(TenantType {
    Trial => "TRIAL",
    Paid => "PAID",
    Internal => "INTERNAL",
    Partner => "PARTNER",
    Custom => "CUSTOM",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantAuditStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

wire_enum!(TenantAuditStatus {
    Pending => "PENDING",
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    /// Globally unique.
    pub code: String,
    pub name: String,
    pub status: TenantStatus,
    pub tenant_type: TenantType,
    pub audit_status: TenantAuditStatus,
    pub admin_user_id: Option<UserId>,
    pub subscription_plan: Option<String>,
    pub subscription_at: Option<DateTime<Utc>>,
    pub unsubscribe_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub audit: AuditFields,
}

impl Entity for Tenant {
    type Id = TenantId;

    fn id(&self) -> TenantId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.id
    }
}

impl Tenant {
    /// Active, approved and not past its expiry.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.status == TenantStatus::Active
            && self.audit_status == TenantAuditStatus::Approved
            && self.expired_at.is_none_or(|at| at > now)
    }

    pub fn ensure_effective(&self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_effective(now) {
            Ok(())
        } else {
            Err(DomainError::forbidden("insufficient authority"))
        }
    }
}

/// Input for creating a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewTenant {
    pub code: String,
    pub name: String,
    pub status: TenantStatus,
    pub tenant_type: TenantType,
    pub audit_status: TenantAuditStatus,
    pub subscription_plan: Option<String>,
    pub subscription_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
}

impl NewTenant {
    pub fn validate(&self) -> DomainResult<()> {
        if self.code.trim().is_empty() {
            return Err(DomainError::bad_request("tenant code is required"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::bad_request("tenant name is required"));
        }
        Ok(())
    }

    pub fn into_tenant(self, id: TenantId, now: DateTime<Utc>) -> Tenant {
        Tenant {
            id,
            code: self.code.trim().to_string(),
            name: self.name,
            status: self.status,
            tenant_type: self.tenant_type,
            audit_status: self.audit_status,
            admin_user_id: None,
            subscription_plan: self.subscription_plan,
            subscription_at: self.subscription_at,
            unsubscribe_at: None,
            expired_at: self.expired_at,
            audit: AuditFields::created(now, self.created_by),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn tenant() -> Tenant {
        Tenant {
            id: TenantId::new(1),
            code: "acme".into(),
            name: "Acme".into(),
            status: TenantStatus::Active,
            tenant_type: TenantType::Paid,
            audit_status: TenantAuditStatus::Approved,
            admin_user_id: None,
            subscription_plan: None,
            subscription_at: None,
            unsubscribe_at: None,
            expired_at: None,
            audit: AuditFields::default(),
        }
    }

    #[test]
    fn active_approved_without_expiry_is_effective() {
        assert!(tenant().is_effective(Utc::now()));
    }

    #[test]
    fn each_condition_is_required() {
        let now = Utc::now();

        let mut t = tenant();
        t.status = TenantStatus::Freeze;
        assert!(!t.is_effective(now));

        let mut t = tenant();
        t.audit_status = TenantAuditStatus::Pending;
        assert!(!t.is_effective(now));

        let mut t = tenant();
        t.expired_at = Some(now - Duration::seconds(1));
        assert!(!t.is_effective(now));

        t.expired_at = Some(now + Duration::days(1));
        assert!(t.is_effective(now));
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let now = Utc::now();
        let mut t = tenant();
        t.expired_at = Some(now);
        assert!(!t.is_effective(now));
    }
}
