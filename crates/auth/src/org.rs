//! Organisational units, positions and the materialised-path algebra.
//!
//! Each org unit stores `path = parent.path + "/" + id` (roots: `"/" + id`),
//! so ancestry is a prefix test and a subtree is a prefix scan.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use windcms_core::{
    AuditFields, DomainError, DomainResult, Entity, FieldMask, OrgUnitId, PositionId, TenantId,
    UserId, wire_enum,
};

// ─────────────────────────────────────────────────────────────────────────────
// Enums
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgStatus {
    #[default]
    On,
    Off,
}

wire_enum!(OrgStatus {
    On => "ON",
    Off => "OFF",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgUnitType {
    Company,
    Subsidiary,
    #[default]
    Department,
    Team,
    Project,
    Other,
}

wire_enum!(OrgUnitType {
    Company => "COMPANY",
    Subsidiary => "SUBSIDIARY",
    Department => "DEPARTMENT",
    Team => "TEAM",
    Project => "PROJECT",
    Other => "OTHER",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionType {
    #[default]
    Regular,
    Leader,
    Manager,
    Intern,
    Contract,
    Other,
}

wire_enum!(PositionType {
    Regular => "REGULAR",
    Leader => "LEADER",
    Manager => "MANAGER",
    Intern => "INTERN",
    Contract => "CONTRACT",
    Other => "OTHER",
});

// ─────────────────────────────────────────────────────────────────────────────
// Org units
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnit {
    pub id: OrgUnitId,
    pub tenant_id: TenantId,
    pub parent_id: Option<OrgUnitId>,
    pub name: String,
    pub code: Option<String>,
    pub path: String,
    pub sort_order: u32,
    pub status: OrgStatus,
    pub unit_type: OrgUnitType,
    pub leader_id: Option<UserId>,
    pub legal_entity: Option<String>,
    pub registration_number: Option<String>,
    pub region: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub audit: AuditFields,
}

impl Entity for OrgUnit {
    type Id = OrgUnitId;

    fn id(&self) -> OrgUnitId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Field values for creating or updating an org unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrgUnitDraft {
    pub tenant_id: TenantId,
    pub parent_id: Option<OrgUnitId>,
    pub name: String,
    pub code: Option<String>,
    pub sort_order: u32,
    pub status: OrgStatus,
    pub unit_type: OrgUnitType,
    pub leader_id: Option<UserId>,
    pub legal_entity: Option<String>,
    pub registration_number: Option<String>,
    pub region: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<UserId>,
}

impl OrgUnitDraft {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::bad_request("org unit name is required"));
        }
        Ok(())
    }

    /// Row with the path computed from the parent's path (`""` for roots).
    pub fn into_org_unit(self, id: OrgUnitId, parent_path: &str, now: DateTime<Utc>) -> OrgUnit {
        OrgUnit {
            id,
            tenant_id: self.tenant_id,
            parent_id: self.parent_id,
            name: self.name,
            code: self.code,
            path: child_path(parent_path, id),
            sort_order: self.sort_order,
            status: self.status,
            unit_type: self.unit_type,
            leader_id: self.leader_id,
            legal_entity: self.legal_entity,
            registration_number: self.registration_number,
            region: self.region,
            address: self.address,
            description: self.description,
            audit: AuditFields::created(now, self.created_by),
        }
    }
}

impl OrgUnit {
    /// Overwrite the masked fields. `parent_id` is excluded: re-parenting
    /// rewrites paths and goes through the tree service.
    pub fn apply(&mut self, draft: &OrgUnitDraft, mask: &FieldMask) {
        if mask.contains("name") {
            self.name = draft.name.clone();
        }
        if mask.contains("code") {
            self.code = draft.code.clone();
        }
        if mask.contains("sort_order") {
            self.sort_order = draft.sort_order;
        }
        if mask.contains("status") {
            self.status = draft.status;
        }
        if mask.contains("type") {
            self.unit_type = draft.unit_type;
        }
        if mask.contains("leader_id") {
            self.leader_id = draft.leader_id;
        }
        if mask.contains("legal_entity") {
            self.legal_entity = draft.legal_entity.clone();
        }
        if mask.contains("registration_number") {
            self.registration_number = draft.registration_number.clone();
        }
        if mask.contains("region") {
            self.region = draft.region.clone();
        }
        if mask.contains("address") {
            self.address = draft.address.clone();
        }
        if mask.contains("description") {
            self.description = draft.description.clone();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Path algebra
// ─────────────────────────────────────────────────────────────────────────────

/// Path of a node given its parent's path (`""` for roots).
pub fn child_path(parent_path: &str, id: impl Into<u32>) -> String {
    format!("{}/{}", parent_path.trim_end_matches('/'), id.into())
}

/// True when `path` is `ancestor` itself or lies underneath it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// Move `path` from under `old_prefix` to under `new_prefix`.
///
/// Returns `None` when `path` is not inside `old_prefix`.
pub fn rebase_path(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    if !is_within(path, old_prefix) {
        return None;
    }
    Some(format!("{new_prefix}{}", &path[old_prefix.len()..]))
}

/// Ids along a path, root first.
pub fn path_ids(path: &str) -> Vec<u32> {
    path.split('/').filter_map(|s| s.parse().ok()).collect()
}

/// Reject re-parenting a node under itself or one of its descendants.
pub fn ensure_valid_reparent(node_path: &str, new_parent_path: Option<&str>) -> DomainResult<()> {
    match new_parent_path {
        Some(parent) if is_within(parent, node_path) => Err(DomainError::bad_request(
            "cannot move a node under itself or its descendant",
        )),
        _ => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tree building
// ─────────────────────────────────────────────────────────────────────────────

/// Anything that can be arranged by parent id and sort order.
pub trait TreeItem {
    fn key(&self) -> u32;
    fn parent_key(&self) -> Option<u32>;
    fn sort_order(&self) -> u32;
}

impl TreeItem for OrgUnit {
    fn key(&self) -> u32 {
        self.id.get()
    }

    fn parent_key(&self) -> Option<u32> {
        self.parent_id.map(OrgUnitId::get)
    }

    fn sort_order(&self) -> u32 {
        self.sort_order
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode<T> {
    #[serde(flatten)]
    pub item: T,
    pub children: Vec<TreeNode<T>>,
}

/// Nest a flat list under parents, stably ordered by `sort_order`.
///
/// Nodes whose parent is absent from the list become roots.
pub fn build_tree<T: TreeItem>(items: Vec<T>) -> Vec<TreeNode<T>> {
    let keys: HashSet<u32> = items.iter().map(TreeItem::key).collect();

    let mut sorted = items;
    sorted.sort_by_key(TreeItem::sort_order);

    let mut roots = Vec::new();
    let mut children: HashMap<u32, Vec<T>> = HashMap::new();
    for item in sorted {
        match item.parent_key().filter(|p| keys.contains(p) && *p != item.key()) {
            Some(parent) => children.entry(parent).or_default().push(item),
            None => roots.push(item),
        }
    }

    roots.into_iter().map(|item| attach(item, &mut children)).collect()
}

fn attach<T: TreeItem>(item: T, children: &mut HashMap<u32, Vec<T>>) -> TreeNode<T> {
    let kids = children.remove(&item.key()).unwrap_or_default();
    TreeNode {
        children: kids.into_iter().map(|child| attach(child, children)).collect(),
        item,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Positions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub tenant_id: TenantId,
    pub org_unit_id: OrgUnitId,
    pub reports_to_position_id: Option<PositionId>,
    /// Unique per tenant.
    pub code: String,
    pub name: String,
    pub sort_order: u32,
    pub status: OrgStatus,
    pub position_type: PositionType,
    pub headcount: Option<u32>,
    pub description: Option<String>,
    pub audit: AuditFields,
}

impl Entity for Position {
    type Id = PositionId;

    fn id(&self) -> PositionId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionDraft {
    pub tenant_id: TenantId,
    pub org_unit_id: OrgUnitId,
    pub reports_to_position_id: Option<PositionId>,
    pub code: String,
    pub name: String,
    pub sort_order: u32,
    pub status: OrgStatus,
    pub position_type: PositionType,
    pub headcount: Option<u32>,
    pub description: Option<String>,
    pub created_by: Option<UserId>,
}

impl PositionDraft {
    pub fn validate(&self) -> DomainResult<()> {
        if self.code.trim().is_empty() {
            return Err(DomainError::bad_request("position code is required"));
        }
        if self.org_unit_id.is_zero() {
            return Err(DomainError::bad_request("position requires an org unit"));
        }
        Ok(())
    }

    pub fn into_position(self, id: PositionId, now: DateTime<Utc>) -> Position {
        Position {
            id,
            tenant_id: self.tenant_id,
            org_unit_id: self.org_unit_id,
            reports_to_position_id: self.reports_to_position_id,
            code: self.code.trim().to_string(),
            name: self.name,
            sort_order: self.sort_order,
            status: self.status,
            position_type: self.position_type,
            headcount: self.headcount,
            description: self.description,
            audit: AuditFields::created(now, self.created_by),
        }
    }
}

impl Position {
    pub fn apply(&mut self, draft: &PositionDraft, mask: &FieldMask) {
        if mask.contains("org_unit_id") {
            self.org_unit_id = draft.org_unit_id;
        }
        if mask.contains("reports_to_position_id") {
            self.reports_to_position_id = draft.reports_to_position_id;
        }
        if mask.contains("code") {
            self.code = draft.code.clone();
        }
        if mask.contains("name") {
            self.name = draft.name.clone();
        }
        if mask.contains("sort_order") {
            self.sort_order = draft.sort_order;
        }
        if mask.contains("status") {
            self.status = draft.status;
        }
        if mask.contains("type") {
            self.position_type = draft.position_type;
        }
        if mask.contains("headcount") {
            self.headcount = draft.headcount;
        }
        if mask.contains("description") {
            self.description = draft.description.clone();
        }
    }
}

impl TreeItem for Position {
    fn key(&self) -> u32 {
        self.id.get()
    }

    fn parent_key(&self) -> Option<u32> {
        self.reports_to_position_id.map(PositionId::get)
    }

    fn sort_order(&self) -> u32 {
        self.sort_order
    }
}

/// Reject a `reports_to` link that would close a cycle through `position`.
///
/// `reports_to_of` returns the current superior of a position.
pub fn ensure_reports_to_acyclic<F>(
    position: PositionId,
    reports_to: Option<PositionId>,
    reports_to_of: F,
) -> DomainResult<()>
where
    F: Fn(PositionId) -> Option<PositionId>,
{
    let mut seen = HashSet::new();
    let mut cursor = reports_to;
    while let Some(current) = cursor {
        if current == position || !seen.insert(current) {
            return Err(DomainError::bad_request("reports-to cycle"));
        }
        cursor = reports_to_of(current);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Node {
        id: u32,
        parent: Option<u32>,
        sort: u32,
    }

    impl TreeItem for Node {
        fn key(&self) -> u32 {
            self.id
        }
        fn parent_key(&self) -> Option<u32> {
            self.parent
        }
        fn sort_order(&self) -> u32 {
            self.sort
        }
    }

    fn node(id: u32, parent: Option<u32>, sort: u32) -> Node {
        Node { id, parent, sort }
    }

    #[test]
    fn child_path_appends_id() {
        assert_eq!(child_path("", 1u32), "/1");
        assert_eq!(child_path("/1", 5u32), "/1/5");
        assert_eq!(path_ids("/1/5/9"), vec![1, 5, 9]);
    }

    #[test]
    fn within_respects_segment_boundaries() {
        assert!(is_within("/1/5", "/1"));
        assert!(is_within("/1", "/1"));
        assert!(!is_within("/10/5", "/1"));
    }

    #[test]
    fn rebase_moves_subtree() {
        assert_eq!(rebase_path("/1/5/9", "/1/5", "/2/5").as_deref(), Some("/2/5/9"));
        assert_eq!(rebase_path("/3/4", "/1/5", "/2/5"), None);
    }

    #[test]
    fn reparent_under_descendant_is_rejected() {
        assert!(ensure_valid_reparent("/1/5", Some("/1/5/9")).is_err());
        assert!(ensure_valid_reparent("/1/5", Some("/1/5")).is_err());
        assert!(ensure_valid_reparent("/1/5", Some("/2")).is_ok());
        assert!(ensure_valid_reparent("/1/5", None).is_ok());
    }

    #[test]
    fn tree_is_nested_and_stably_sorted() {
        let tree = build_tree(vec![
            node(3, Some(1), 2),
            node(2, None, 1),
            node(1, None, 1),
            node(4, Some(1), 1),
            node(5, Some(4), 0),
        ]);
        let roots: Vec<u32> = tree.iter().map(|n| n.item.id).collect();
        assert_eq!(roots, vec![2, 1]);
        let kids: Vec<u32> = tree[1].children.iter().map(|n| n.item.id).collect();
        assert_eq!(kids, vec![4, 3]);
        assert_eq!(tree[1].children[0].children[0].item.id, 5);
    }

    #[test]
    fn orphans_become_roots() {
        let tree = build_tree(vec![node(7, Some(99), 0)]);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn reports_to_cycle_detected() {
        let chain: HashMap<PositionId, PositionId> = [
            (PositionId::new(2), PositionId::new(3)),
            (PositionId::new(3), PositionId::new(1)),
        ]
        .into();
        let lookup = |p: PositionId| chain.get(&p).copied();

        assert!(ensure_reports_to_acyclic(PositionId::new(1), Some(PositionId::new(2)), lookup).is_err());
        assert!(ensure_reports_to_acyclic(PositionId::new(4), Some(PositionId::new(2)), lookup).is_ok());
        assert!(ensure_reports_to_acyclic(PositionId::new(1), Some(PositionId::new(1)), lookup).is_err());
        assert!(ensure_reports_to_acyclic(PositionId::new(1), None, lookup).is_ok());
    }

    fn forest() -> impl Strategy<Value = Vec<Option<usize>>> {
        // parent of node i is one of 0..i, or none.
        (1usize..40).prop_flat_map(|n| {
            (0..n)
                .map(|i| {
                    if i == 0 {
                        Just(None).boxed()
                    } else {
                        prop::option::of(0..i).boxed()
                    }
                })
                .collect::<Vec<_>>()
        })
    }

    proptest! {
        #[test]
        fn paths_end_with_id_and_extend_parent(parents in forest()) {
            let mut paths: Vec<String> = Vec::with_capacity(parents.len());
            for (i, parent) in parents.iter().enumerate() {
                let id = i as u32 + 1;
                let parent_path = parent.map(|p| paths[p].clone()).unwrap_or_default();
                paths.push(child_path(&parent_path, id));
            }
            for (i, parent) in parents.iter().enumerate() {
                let id = i as u32 + 1;
                let path = &paths[i];
                prop_assert_eq!(path_ids(path).last().copied(), Some(id));
                if let Some(p) = parent {
                    prop_assert!(is_within(path, &paths[*p]));
                    prop_assert_eq!(path, &format!("{}/{}", paths[*p], id));
                }
            }
        }
    }
}
