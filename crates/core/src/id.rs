//! Strongly-typed identifiers used across the identity core.
//!
//! Every identifier is a 32-bit unsigned integer. Zero is never a valid row id;
//! for tenants it means "platform scope".

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a tenant. `TenantId::PLATFORM` (0) marks platform-scoped rows.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(u32);

/// Identifier of a user.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u32);

/// Identifier of a role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(u32);

/// Identifier of a permission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionId(u32);

/// Identifier of an API endpoint resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiId(u32);

/// Identifier of a menu resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MenuId(u32);

/// Identifier of an organisational unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgUnitId(u32);

/// Identifier of a position.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(u32);

/// Identifier of a user↔tenant membership row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MembershipId(u32);

/// Identifier of a stored credential.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(u32);

/// Identifier of a login policy rule.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoginPolicyId(u32);

macro_rules! impl_u32_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: u32) -> Self {
                Self(value)
            }

            pub const fn get(self) -> u32 {
                self.0
            }

            /// `true` for the zero sentinel.
            pub const fn is_zero(self) -> bool {
                self.0 == 0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<u32> for $t {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$t> for u32 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        // Postgres has no unsigned integers; ids are stored as BIGINT.
        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                i64::from(value.0)
            }
        }

        impl TryFrom<i64> for $t {
            type Error = DomainError;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                u32::try_from(value)
                    .map(Self)
                    .map_err(|_| DomainError::internal(format!("{}: {} out of range", $name, value)))
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s
                    .trim()
                    .parse::<u32>()
                    .map_err(|e| DomainError::bad_request(format!("{}: {}", $name, e)))?;
                Ok(Self(value))
            }
        }
    };
}

impl_u32_newtype!(TenantId, "TenantId");
impl_u32_newtype!(UserId, "UserId");
impl_u32_newtype!(RoleId, "RoleId");
impl_u32_newtype!(PermissionId, "PermissionId");
impl_u32_newtype!(ApiId, "ApiId");
impl_u32_newtype!(MenuId, "MenuId");
impl_u32_newtype!(OrgUnitId, "OrgUnitId");
impl_u32_newtype!(PositionId, "PositionId");
impl_u32_newtype!(MembershipId, "MembershipId");
impl_u32_newtype!(CredentialId, "CredentialId");
impl_u32_newtype!(LoginPolicyId, "LoginPolicyId");

impl TenantId {
    /// Platform scope (no tenant).
    pub const PLATFORM: TenantId = TenantId(0);

    pub fn is_platform(self) -> bool {
        self.is_zero()
    }

    /// Normalise an optional tenant: `None` and `Some(0)` both mean platform.
    pub fn from_optional(value: Option<TenantId>) -> TenantId {
        value.unwrap_or(TenantId::PLATFORM)
    }

    /// `None` for the platform sentinel, `Some(self)` otherwise.
    pub fn to_optional(self) -> Option<TenantId> {
        if self.is_platform() { None } else { Some(self) }
    }
}
