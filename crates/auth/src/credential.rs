//! Credentials: identifiers plus verifiers, one per identity type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use windcms_core::{AuditFields, CredentialId, DomainError, DomainResult, TenantId, UserId, wire_enum};

// ─────────────────────────────────────────────────────────────────────────────
// Enums
// ─────────────────────────────────────────────────────────────────────────────

/// How the identifier should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityType {
    Username,
    UserId,
    Email,
    Phone,
    SocialOauth,
    EnterpriseSso,
    ApiKey,
    DeviceId,
    Custom,
}

wire_enum!(IdentityType {
    Username => "USERNAME",
    UserId => "USER_ID",
    Email => "EMAIL",
    Phone => "PHONE",
    SocialOauth => "SOCIAL_OAUTH",
    EnterpriseSso => "ENTERPRISE_SSO",
    ApiKey => "API_KEY",
    DeviceId => "DEVICE_ID",
    Custom => "CUSTOM",
});

/// Selects the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialType {
    /// Stored as a bcrypt digest.
    #[default]
    PasswordHash,
    Plain,
    /// Issued by an external provider; compared verbatim.
    External,
}

wire_enum!(CredentialType {
    PasswordHash => "PASSWORD_HASH",
    Plain => "PLAIN",
    External => "EXTERNAL",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialStatus {
    Disabled,
    #[default]
    Enabled,
    Expired,
    Unverified,
    Removed,
    Blocked,
    Temporary,
}

wire_enum!(CredentialStatus {
    Disabled => "DISABLED",
    Enabled => "ENABLED",
    Expired => "EXPIRED",
    Unverified => "UNVERIFIED",
    Removed => "REMOVED",
    Blocked => "BLOCKED",
    Temporary => "TEMPORARY",
});

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// A persisted credential. `(identity_type, identifier)` is globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub identity_type: IdentityType,
    pub identifier: String,
    pub credential_type: CredentialType,
    /// Verifier material: a bcrypt digest for `PASSWORD_HASH`, plaintext otherwise.
    #[serde(skip_serializing)]
    pub credential: String,
    pub is_primary: bool,
    pub status: CredentialStatus,
    pub provider: Option<String>,
    pub provider_account_id: Option<String>,
    pub audit: AuditFields,
}

/// Input for creating a credential. `secret` is plaintext; it is hashed before
/// it reaches storage when the type demands it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewCredential {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub identity_type: Option<IdentityType>,
    pub identifier: String,
    pub credential_type: CredentialType,
    pub secret: String,
    pub is_primary: bool,
    pub status: CredentialStatus,
    pub provider: Option<String>,
    pub provider_account_id: Option<String>,
    pub created_by: Option<UserId>,
}

impl NewCredential {
    pub fn validate(&self) -> DomainResult<()> {
        if self.user_id.is_zero() {
            return Err(DomainError::bad_request("credential requires a user id"));
        }
        if self.identity_type.is_none() {
            return Err(DomainError::bad_request("credential requires an identity type"));
        }
        if self.identifier.trim().is_empty() {
            return Err(DomainError::bad_request("credential requires an identifier"));
        }
        Ok(())
    }

    /// Row for an already-prepared secret. Fails when no identity type is set.
    pub fn into_credential(self, id: CredentialId, now: DateTime<Utc>) -> DomainResult<Credential> {
        let identity_type = self
            .identity_type
            .ok_or_else(|| DomainError::bad_request("credential requires an identity type"))?;
        Ok(Credential {
            id,
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            identity_type,
            identifier: self.identifier,
            credential_type: self.credential_type,
            credential: self.secret,
            is_primary: self.is_primary,
            status: self.status,
            provider: self.provider,
            provider_account_id: self.provider_account_id,
            audit: AuditFields::created(now, self.created_by),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Verification
// ─────────────────────────────────────────────────────────────────────────────

/// Result of checking a submitted secret against the stored verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifyOutcome {
    Success,
    UserNotFound,
    Locked,
    BadCredential,
}

impl VerifyOutcome {
    /// Caller-facing error. An unknown identifier and a wrong secret are
    /// indistinguishable; only a locked credential is reported as such.
    pub fn into_result(self) -> DomainResult<()> {
        match self {
            VerifyOutcome::Success => Ok(()),
            VerifyOutcome::UserNotFound | VerifyOutcome::BadCredential => {
                Err(DomainError::incorrect_password(INCORRECT_CREDENTIALS))
            }
            VerifyOutcome::Locked => Err(DomainError::user_freeze("credential is not enabled")),
        }
    }
}

pub const INCORRECT_CREDENTIALS: &str = "incorrect username or password";

/// Hashes and verifies secrets according to their credential type.
#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    bcrypt_cost: u32,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self {
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl CredentialHasher {
    /// Custom bcrypt work factor (4..=31). Tests use the minimum.
    pub fn with_cost(bcrypt_cost: u32) -> Self {
        Self {
            bcrypt_cost: bcrypt_cost.clamp(4, 31),
        }
    }

    /// Produce the value to persist for `secret`.
    pub fn prepare(&self, credential_type: CredentialType, secret: &str) -> DomainResult<String> {
        match credential_type {
            CredentialType::PasswordHash => bcrypt::hash(secret, self.bcrypt_cost)
                .map_err(|e| DomainError::internal(format!("hash credential failed: {e}"))),
            CredentialType::Plain | CredentialType::External => Ok(secret.to_string()),
        }
    }

    /// Constant-time check of `submitted` against `stored`.
    pub fn matches(&self, credential_type: CredentialType, stored: &str, submitted: &str) -> bool {
        match credential_type {
            CredentialType::PasswordHash => bcrypt::verify(submitted, stored).unwrap_or(false),
            CredentialType::Plain | CredentialType::External => {
                stored.as_bytes().ct_eq(submitted.as_bytes()).into()
            }
        }
    }

    /// Full verification decision for a looked-up credential.
    ///
    /// A credential that is not `ENABLED` is `Locked` whatever the secret.
    pub fn evaluate(&self, credential: Option<&Credential>, submitted: &str) -> VerifyOutcome {
        let Some(credential) = credential else {
            // Same bcrypt work as a real comparison.
            let _ = bcrypt::hash(submitted, self.bcrypt_cost);
            return VerifyOutcome::UserNotFound;
        };
        if credential.status != CredentialStatus::Enabled {
            return VerifyOutcome::Locked;
        }
        if self.matches(credential.credential_type, &credential.credential, submitted) {
            VerifyOutcome::Success
        } else {
            VerifyOutcome::BadCredential
        }
    }
}
