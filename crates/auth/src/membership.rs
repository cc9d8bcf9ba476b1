//! User relations: direct edges, tenant memberships and relation search.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use windcms_core::{
    AuditFields, DomainError, DomainResult, MembershipId, OrgUnitId, PositionId, RoleId, TenantId,
    UserId, sorted_unique, wire_enum,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    OrgUnit,
    Position,
    Role,
}

wire_enum!(RelationKind {
    OrgUnit => "ORG_UNIT",
    Position => "POSITION",
    Role => "ROLE",
});

impl RelationKind {
    /// Order in which relation search intersects kinds.
    pub const SEARCH_ORDER: [RelationKind; 3] =
        [RelationKind::OrgUnit, RelationKind::Position, RelationKind::Role];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    #[default]
    Active,
    Disabled,
    Pending,
    Invited,
    Expired,
    Rejected,
}

wire_enum!(MembershipStatus {
    Active => "ACTIVE",
    Disabled => "DISABLED",
    Pending => "PENDING",
    Invited => "INVITED",
    Expired => "EXPIRED",
    Rejected => "REJECTED",
});

/// Validity window of an edge or membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
}

impl Window {
    pub fn open(start_at: DateTime<Utc>) -> Self {
        Self { start_at, end_at: None }
    }

    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.end_at.is_none_or(|end| end > now)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Edges
// ─────────────────────────────────────────────────────────────────────────────

/// A user-keyed (direct topology) or membership-keyed edge to a role,
/// position or org unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEdge {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub membership_id: Option<MembershipId>,
    pub kind: RelationKind,
    pub target_id: u32,
    pub status: MembershipStatus,
    pub is_primary: bool,
    pub window: Window,
    pub audit: AuditFields,
}

impl RelationEdge {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.status == MembershipStatus::Active && self.window.is_effective(now)
    }
}

/// The user-to-tenant binding in the one-to-many topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role_id: Option<RoleId>,
    pub position_id: Option<PositionId>,
    pub org_unit_id: Option<OrgUnitId>,
    pub status: MembershipStatus,
    pub is_primary: bool,
    pub window: Window,
    pub audit: AuditFields,
}

impl Membership {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.status == MembershipStatus::Active && self.window.is_effective(now)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assignment
// ─────────────────────────────────────────────────────────────────────────────

/// Requested relation set for one user (and tenant, when memberships apply).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationAssignment {
    pub role_ids: Vec<RoleId>,
    pub position_ids: Vec<PositionId>,
    pub org_unit_ids: Vec<OrgUnitId>,
    /// Primary role; merged into `role_ids`.
    pub role_id: Option<RoleId>,
    pub position_id: Option<PositionId>,
    pub org_unit_id: Option<OrgUnitId>,
    pub status: MembershipStatus,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub operator: Option<UserId>,
}

impl RelationAssignment {
    /// Merge singletons into the lists, drop zero ids, dedup and sort.
    /// A missing primary falls back to the smallest id of its list.
    pub fn normalized(mut self) -> DomainResult<Self> {
        fn merge<T: Ord + Copy>(list: Vec<T>, single: Option<T>, zero: impl Fn(&T) -> bool) -> (Vec<T>, Option<T>) {
            let mut list: Vec<T> = list.into_iter().filter(|id| !zero(id)).collect();
            let single = single.filter(|id| !zero(id));
            list.extend(single);
            let list = sorted_unique(list);
            let primary = single.or_else(|| list.first().copied());
            (list, primary)
        }

        (self.role_ids, self.role_id) = merge(self.role_ids, self.role_id, |id| id.is_zero());
        (self.position_ids, self.position_id) =
            merge(self.position_ids, self.position_id, |id| id.is_zero());
        (self.org_unit_ids, self.org_unit_id) =
            merge(self.org_unit_ids, self.org_unit_id, |id| id.is_zero());

        if let (Some(start), Some(end)) = (self.start_at, self.end_at) {
            if end <= start {
                return Err(DomainError::bad_request("end_at must be after start_at"));
            }
        }
        Ok(self)
    }

    pub fn window(&self, now: DateTime<Utc>) -> Window {
        Window {
            start_at: self.start_at.unwrap_or(now),
            end_at: self.end_at,
        }
    }

    /// Expand into `(kind, target, is_primary)` triples.
    pub fn targets(&self) -> Vec<(RelationKind, u32, bool)> {
        let mut out = Vec::new();
        for id in &self.role_ids {
            out.push((RelationKind::Role, id.get(), Some(*id) == self.role_id));
        }
        for id in &self.position_ids {
            out.push((RelationKind::Position, id.get(), Some(*id) == self.position_id));
        }
        for id in &self.org_unit_ids {
            out.push((RelationKind::OrgUnit, id.get(), Some(*id) == self.org_unit_id));
        }
        out
    }
}

/// Effective relation ids of a user, each list ascending.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationIds {
    pub role_ids: Vec<RoleId>,
    pub position_ids: Vec<PositionId>,
    pub org_unit_ids: Vec<OrgUnitId>,
}

impl RelationIds {
    /// Collect from effective edges.
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a RelationEdge>, now: DateTime<Utc>) -> Self {
        let mut ids = RelationIds::default();
        for edge in edges.into_iter().filter(|e| e.is_effective(now)) {
            match edge.kind {
                RelationKind::Role => ids.role_ids.push(RoleId::new(edge.target_id)),
                RelationKind::Position => ids.position_ids.push(PositionId::new(edge.target_id)),
                RelationKind::OrgUnit => ids.org_unit_ids.push(OrgUnitId::new(edge.target_id)),
            }
        }
        ids.role_ids = sorted_unique(ids.role_ids);
        ids.position_ids = sorted_unique(ids.position_ids);
        ids.org_unit_ids = sorted_unique(ids.org_unit_ids);
        ids
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relation search
// ─────────────────────────────────────────────────────────────────────────────

/// User filter by relation. Empty lists are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationFilter {
    pub role_ids: Vec<RoleId>,
    pub position_ids: Vec<PositionId>,
    pub org_unit_ids: Vec<OrgUnitId>,
}

impl RelationFilter {
    pub fn is_empty(&self) -> bool {
        self.role_ids.is_empty() && self.position_ids.is_empty() && self.org_unit_ids.is_empty()
    }

    /// Raw target ids for a kind.
    pub fn ids(&self, kind: RelationKind) -> Vec<u32> {
        match kind {
            RelationKind::Role => self.role_ids.iter().map(|id| id.get()).collect(),
            RelationKind::Position => self.position_ids.iter().map(|id| id.get()).collect(),
            RelationKind::OrgUnit => self.org_unit_ids.iter().map(|id| id.get()).collect(),
        }
    }

    /// Non-empty kinds in search order.
    pub fn active_kinds(&self) -> Vec<(RelationKind, Vec<u32>)> {
        RelationKind::SEARCH_ORDER
            .into_iter()
            .map(|kind| (kind, self.ids(kind)))
            .filter(|(_, ids)| !ids.is_empty())
            .collect()
    }
}

/// Intersect per-kind user lists in order, stopping at the first empty result.
///
/// `None` means "no filter was applied"; `Some(vec![])` means "nobody matches".
pub fn intersect_user_lists<I>(lists: I) -> Option<Vec<UserId>>
where
    I: IntoIterator<Item = Vec<UserId>>,
{
    let mut lists = lists.into_iter();
    let mut result: BTreeSet<UserId> = lists.next()?.into_iter().collect();
    for list in lists {
        if result.is_empty() {
            break;
        }
        let other: BTreeSet<UserId> = list.into_iter().collect();
        result = result.intersection(&other).copied().collect();
    }
    Some(result.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use proptest::prelude::*;

    use super::*;

    fn users(ids: &[u32]) -> Vec<UserId> {
        ids.iter().copied().map(UserId::new).collect()
    }

    #[test]
    fn normalisation_merges_singletons_and_dedups() {
        let a = RelationAssignment {
            role_ids: vec![RoleId::new(3), RoleId::new(1), RoleId::new(3), RoleId::new(0)],
            role_id: Some(RoleId::new(5)),
            position_ids: vec![PositionId::new(9)],
            ..Default::default()
        }
        .normalized()
        .unwrap();

        assert_eq!(a.role_ids, vec![RoleId::new(1), RoleId::new(3), RoleId::new(5)]);
        assert_eq!(a.role_id, Some(RoleId::new(5)));
        assert_eq!(a.position_id, Some(PositionId::new(9)));
        assert_eq!(a.org_unit_id, None);

        let primaries: Vec<_> = a.targets().into_iter().filter(|t| t.2).collect();
        assert_eq!(primaries.len(), 2);
    }

    #[test]
    fn inverted_window_is_rejected() {
        let now = Utc::now();
        let a = RelationAssignment {
            start_at: Some(now),
            end_at: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        assert!(a.normalized().is_err());
    }

    #[test]
    fn window_end_is_exclusive() {
        let now = Utc::now();
        assert!(Window::open(now).is_effective(now));
        let w = Window { start_at: now, end_at: Some(now) };
        assert!(!w.is_effective(now));
    }

    #[test]
    fn empty_filter_yields_none() {
        assert!(RelationFilter::default().active_kinds().is_empty());
        assert_eq!(intersect_user_lists(Vec::new()), None);
    }

    #[test]
    fn search_order_is_org_position_role() {
        let filter = RelationFilter {
            role_ids: vec![RoleId::new(10)],
            position_ids: vec![PositionId::new(20)],
            org_unit_ids: vec![OrgUnitId::new(30)],
        };
        let kinds: Vec<_> = filter.active_kinds().into_iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, RelationKind::SEARCH_ORDER.to_vec());
    }

    #[test]
    fn intersection_matches_literal_scenario() {
        // org 30 -> {2}, position 20 -> {2,3}, role 10 -> {1,2}
        let got = intersect_user_lists(vec![users(&[2]), users(&[2, 3]), users(&[1, 2])]);
        assert_eq!(got, Some(users(&[2])));

        let got = intersect_user_lists(vec![users(&[]), users(&[1, 2])]);
        assert_eq!(got, Some(vec![]));
    }

    proptest! {
        #[test]
        fn intersection_equals_naive_reference(
            lists in prop::collection::vec(prop::collection::vec(0u32..20, 0..15), 1..4)
        ) {
            let universe: Vec<u32> = (0..20).collect();
            let expected: Vec<UserId> = universe
                .into_iter()
                .filter(|u| lists.iter().all(|l| l.contains(u)))
                .map(UserId::new)
                .collect();

            let got = intersect_user_lists(lists.iter().map(|l| users(l)));
            prop_assert_eq!(got, Some(expected));
        }
    }
}
