//! Deployment-wide user↔tenant topology flag.

use serde::{Deserialize, Serialize};

/// Which membership topology is authoritative for this deployment.
///
/// Exactly one topology is read and written per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserTenantRelation {
    /// Multi-tenancy disabled; direct user edges without tenant scoping.
    None,
    /// Each user belongs to exactly one tenant; direct user edges.
    #[default]
    OneToOne,
    /// A user may join many tenants; edges hang off `Membership` rows.
    OneToMany,
}

impl UserTenantRelation {
    pub fn is_tenant_mode(&self) -> bool {
        !matches!(self, UserTenantRelation::None)
    }

    /// `true` when relation edges hang off membership rows.
    pub fn uses_memberships(&self) -> bool {
        matches!(self, UserTenantRelation::OneToMany)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_one_to_one() {
        assert_eq!(UserTenantRelation::default(), UserTenantRelation::OneToOne);
    }

    #[test]
    fn deserializes_config_spelling() {
        let v: UserTenantRelation = serde_json::from_str("\"ONE_TO_MANY\"").unwrap();
        assert!(v.uses_memberships());
        let v: UserTenantRelation = serde_json::from_str("\"NONE\"").unwrap();
        assert!(!v.is_tenant_mode());
    }
}
