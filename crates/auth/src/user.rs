//! User accounts.
//!
//! Users are soft-referenced by credentials and membership edges; deleting a
//! user cascades to both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use windcms_core::{AuditFields, DomainError, DomainResult, Entity, TenantId, UserId, wire_enum};

// ─────────────────────────────────────────────────────────────────────────────
// User Status
// ─────────────────────────────────────────────────────────────────────────────

/// User account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    /// User can authenticate.
    #[default]
    Active,
    /// Temporarily locked (see `locked_until`).
    Locked,
    /// Administratively disabled.
    Disabled,
}

wire_enum!(UserStatus {
    Active => "ACTIVE",
    Locked => "LOCKED",
    Disabled => "DISABLED",
});

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub tenant_id: TenantId,
    /// Unique per tenant.
    pub username: String,
    pub nickname: Option<String>,
    pub realname: Option<String>,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub avatar: Option<String>,
    pub status: UserStatus,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub audit: AuditFields,
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> UserId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

impl User {
    /// Whether the account may authenticate at `now`.
    ///
    /// A lock whose `locked_until` has passed no longer blocks.
    pub fn can_login(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            UserStatus::Active => true,
            UserStatus::Locked => self.locked_until.is_some_and(|until| until <= now),
            UserStatus::Disabled => false,
        }
    }

    pub fn ensure_can_login(&self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.can_login(now) {
            Ok(())
        } else {
            Err(DomainError::forbidden("user is disabled"))
        }
    }
}

/// Input for creating a user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewUser {
    pub tenant_id: TenantId,
    pub username: String,
    pub nickname: Option<String>,
    pub realname: Option<String>,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub status: UserStatus,
    pub created_by: Option<UserId>,
}

impl NewUser {
    pub fn validate(&self) -> DomainResult<()> {
        let username = self.username.trim();
        if username.is_empty() {
            return Err(DomainError::bad_request("username is required"));
        }
        if username.len() > 64 {
            return Err(DomainError::bad_request("username is too long"));
        }
        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(DomainError::bad_request("invalid email"));
            }
        }
        Ok(())
    }

    pub fn into_user(self, id: UserId, now: DateTime<Utc>) -> User {
        User {
            id,
            tenant_id: self.tenant_id,
            username: self.username.trim().to_string(),
            nickname: self.nickname,
            realname: self.realname,
            email: self.email,
            mobile: self.mobile,
            avatar: None,
            status: self.status,
            last_login_at: None,
            last_login_ip: None,
            locked_until: None,
            audit: AuditFields::created(now, self.created_by),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn user(status: UserStatus) -> User {
        User {
            id: UserId::new(42),
            tenant_id: TenantId::new(1),
            username: "alice".into(),
            nickname: None,
            realname: None,
            email: None,
            mobile: None,
            avatar: None,
            status,
            last_login_at: None,
            last_login_ip: None,
            locked_until: None,
            audit: AuditFields::default(),
        }
    }

    #[test]
    fn active_user_can_login() {
        assert!(user(UserStatus::Active).can_login(now()));
    }

    #[test]
    fn disabled_user_cannot_login() {
        let err = user(UserStatus::Disabled).ensure_can_login(now()).unwrap_err();
        assert_eq!(err.message(), "user is disabled");
    }

    #[test]
    fn lock_expires() {
        let mut u = user(UserStatus::Locked);
        assert!(!u.can_login(now()));
        u.locked_until = Some(now() + Duration::minutes(5));
        assert!(!u.can_login(now()));
        u.locked_until = Some(now() - Duration::minutes(5));
        assert!(u.can_login(now()));
    }

    #[test]
    fn new_user_requires_username() {
        let input = NewUser {
            username: " ".into(),
            ..Default::default()
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn new_user_rejects_malformed_email() {
        let input = NewUser {
            username: "bob".into(),
            email: Some("bob.example.com".into()),
            ..Default::default()
        };
        assert!(input.validate().is_err());
    }
}
