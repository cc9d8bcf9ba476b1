//! Entity trait and the audit columns every persisted row carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{TenantId, UserId};

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;

    /// Owning tenant; `TenantId::PLATFORM` for platform-scoped rows.
    fn tenant_id(&self) -> TenantId;
}

/// Creation/update bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    pub created_at: DateTime<Utc>,
    pub created_by: Option<UserId>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<UserId>,
}

impl AuditFields {
    pub fn created(at: DateTime<Utc>, by: Option<UserId>) -> Self {
        Self {
            created_at: at,
            created_by: by,
            updated_at: None,
            updated_by: None,
        }
    }

    pub fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
        self.updated_at = Some(at);
        self.updated_by = by;
    }
}

impl Default for AuditFields {
    fn default() -> Self {
        Self::created(Utc::now(), None)
    }
}

/// Names the fields an update touches.
///
/// Update operations take an explicit mask instead of inferring intent from
/// absent values. An empty mask means "every updatable field".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMask(Vec<String>);

impl FieldMask {
    pub fn all() -> Self {
        Self(Vec::new())
    }

    pub fn of<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(paths.into_iter().map(Into::into).collect())
    }

    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.is_all() || self.0.iter().any(|p| p == path)
    }

    pub fn paths(&self) -> &[String] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mask_covers_everything() {
        let mask = FieldMask::all();
        assert!(mask.contains("name"));
        assert!(mask.contains("status"));
    }

    #[test]
    fn explicit_mask_is_selective() {
        let mask = FieldMask::of(["name"]);
        assert!(mask.contains("name"));
        assert!(!mask.contains("status"));
    }

    #[test]
    fn touch_records_updater() {
        let mut audit = AuditFields::created(Utc::now(), Some(UserId::new(1)));
        audit.touch(Utc::now(), Some(UserId::new(2)));
        assert_eq!(audit.updated_by, Some(UserId::new(2)));
        assert!(audit.updated_at.is_some());
    }
}
