//! Org-unit tree and position hierarchy.
//!
//! Org units carry a materialised path (`/1/4/9`). Every node's path ends
//! with its own id and starts with its parent's path; moves rewrite a whole
//! subtree in one store transaction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use windcms_auth::org::ensure_reports_to_acyclic;
use windcms_auth::{OrgUnit, OrgUnitDraft, Position, PositionDraft, TreeNode, build_tree};
use windcms_core::{DomainError, DomainResult, FieldMask, OrgUnitId, PositionId, TenantId, UserId};

use crate::store::{OrgUnitStore, PositionStore};

/// Mask-driven org-unit update. A masked `parent_id` re-parents the node.
#[derive(Debug, Clone)]
pub struct OrgUnitUpdate {
    pub id: OrgUnitId,
    pub draft: OrgUnitDraft,
    pub mask: FieldMask,
    pub allow_missing: bool,
    pub operator: Option<UserId>,
}

#[derive(Debug, Clone)]
pub struct PositionUpdate {
    pub id: PositionId,
    pub draft: PositionDraft,
    pub mask: FieldMask,
    pub allow_missing: bool,
    pub operator: Option<UserId>,
}

pub struct OrgTree<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for OrgTree<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> OrgTree<S>
where
    S: OrgUnitStore + PositionStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    // ── org units ───────────────────────────────────────────────────────────

    #[instrument(skip(self, draft), fields(tenant_id = %draft.tenant_id), err)]
    pub async fn create_unit(&self, draft: OrgUnitDraft) -> DomainResult<OrgUnit> {
        draft.validate()?;
        let unit = self.store.create_org_unit(draft).await?;
        info!(org_unit_id = %unit.id, path = %unit.path, "org unit created");
        Ok(unit)
    }

    pub async fn get_unit(&self, id: OrgUnitId) -> DomainResult<OrgUnit> {
        self.store
            .get_org_unit(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("org unit {id} not found")))
    }

    /// Flat listing ordered by `sort_order`, then id.
    pub async fn list_units(&self, tenant_id: TenantId) -> DomainResult<Vec<OrgUnit>> {
        let mut units = self.store.list_org_units(tenant_id).await?;
        units.sort_by_key(|u| (u.sort_order, u.id));
        Ok(units)
    }

    pub async fn unit_tree(&self, tenant_id: TenantId) -> DomainResult<Vec<TreeNode<OrgUnit>>> {
        Ok(build_tree(self.list_units(tenant_id).await?))
    }

    #[instrument(skip(self, update), fields(org_unit_id = %update.id), err)]
    pub async fn update_unit(&self, update: OrgUnitUpdate) -> DomainResult<OrgUnit> {
        let OrgUnitUpdate {
            id,
            mut draft,
            mask,
            allow_missing,
            operator,
        } = update;

        let Some(mut unit) = self.store.get_org_unit(id).await? else {
            if !allow_missing {
                return Err(DomainError::not_found(format!("org unit {id} not found")));
            }
            draft.created_by = draft.created_by.or(operator);
            return self.create_unit(draft).await;
        };

        if mask.paths().iter().any(|p| p == "parent_id") && draft.parent_id != unit.parent_id {
            unit = self.move_unit(id, draft.parent_id).await?;
        }
        unit.apply(&draft, &mask);
        if unit.name.trim().is_empty() {
            return Err(DomainError::bad_request("org unit name is required"));
        }
        unit.audit.touch(Utc::now(), operator);
        Ok(self.store.update_org_unit(unit).await?)
    }

    /// Re-parent a node; `BAD_REQUEST` when the target is inside its subtree.
    #[instrument(skip(self), err)]
    pub async fn move_unit(&self, id: OrgUnitId, new_parent: Option<OrgUnitId>) -> DomainResult<OrgUnit> {
        if new_parent == Some(id) {
            return Err(DomainError::bad_request("cannot move a node under itself or its descendant"));
        }
        let unit = self.store.move_org_unit(id, new_parent).await?;
        info!(org_unit_id = %id, path = %unit.path, "org unit moved");
        Ok(unit)
    }

    /// Delete a node with its whole subtree. Memberships pointing into the
    /// subtree are left dangling.
    #[instrument(skip(self), err)]
    pub async fn delete_unit(&self, id: OrgUnitId) -> DomainResult<u64> {
        let removed = self.store.delete_org_unit_subtree(id).await?;
        if removed == 0 {
            return Err(DomainError::not_found(format!("org unit {id} not found")));
        }
        info!(org_unit_id = %id, removed, "org subtree deleted");
        Ok(removed)
    }

    // ── positions ───────────────────────────────────────────────────────────

    async fn ensure_unit_in_tenant(&self, tenant_id: TenantId, id: OrgUnitId) -> DomainResult<()> {
        match self.store.get_org_unit(id).await? {
            Some(unit) if unit.tenant_id == tenant_id => Ok(()),
            _ => Err(DomainError::bad_request(format!("org unit {id} not found in tenant"))),
        }
    }

    /// Reject `reports_to` links that leave the tenant or close a cycle.
    async fn ensure_reports_to(
        &self,
        tenant_id: TenantId,
        position: PositionId,
        reports_to: Option<PositionId>,
    ) -> DomainResult<()> {
        let Some(target) = reports_to else {
            return Ok(());
        };
        let superiors: HashMap<PositionId, Option<PositionId>> = self
            .store
            .list_positions(tenant_id)
            .await?
            .into_iter()
            .map(|p| (p.id, p.reports_to_position_id))
            .collect();
        if !superiors.contains_key(&target) {
            return Err(DomainError::bad_request(format!("position {target} not found in tenant")));
        }
        ensure_reports_to_acyclic(position, reports_to, |p| superiors.get(&p).copied().flatten())
    }

    #[instrument(skip(self, draft), fields(tenant_id = %draft.tenant_id), err)]
    pub async fn create_position(&self, draft: PositionDraft) -> DomainResult<Position> {
        draft.validate()?;
        self.ensure_unit_in_tenant(draft.tenant_id, draft.org_unit_id).await?;
        self.ensure_reports_to(draft.tenant_id, PositionId::new(0), draft.reports_to_position_id)
            .await?;
        Ok(self.store.create_position(draft).await?)
    }

    pub async fn get_position(&self, id: PositionId) -> DomainResult<Position> {
        self.store
            .get_position(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("position {id} not found")))
    }

    pub async fn get_position_by_code(&self, tenant_id: TenantId, code: &str) -> DomainResult<Position> {
        self.store
            .find_position_by_code(tenant_id, code.trim())
            .await?
            .ok_or_else(|| DomainError::not_found(format!("position '{code}' not found")))
    }

    pub async fn list_positions(&self, tenant_id: TenantId) -> DomainResult<Vec<Position>> {
        let mut positions = self.store.list_positions(tenant_id).await?;
        positions.sort_by_key(|p| (p.sort_order, p.id));
        Ok(positions)
    }

    /// Positions nested under the position they report to.
    pub async fn position_tree(&self, tenant_id: TenantId) -> DomainResult<Vec<TreeNode<Position>>> {
        Ok(build_tree(self.list_positions(tenant_id).await?))
    }

    #[instrument(skip(self, update), fields(position_id = %update.id), err)]
    pub async fn update_position(&self, update: PositionUpdate) -> DomainResult<Position> {
        let PositionUpdate {
            id,
            mut draft,
            mask,
            allow_missing,
            operator,
        } = update;

        let Some(mut position) = self.store.get_position(id).await? else {
            if !allow_missing {
                return Err(DomainError::not_found(format!("position {id} not found")));
            }
            draft.created_by = draft.created_by.or(operator);
            return self.create_position(draft).await;
        };

        let previous_unit = position.org_unit_id;
        position.apply(&draft, &mask);
        position.code = position.code.trim().to_string();
        if position.code.is_empty() {
            return Err(DomainError::bad_request("position code is required"));
        }
        if position.org_unit_id != previous_unit {
            self.ensure_unit_in_tenant(position.tenant_id, position.org_unit_id).await?;
        }
        self.ensure_reports_to(position.tenant_id, id, position.reports_to_position_id)
            .await?;
        position.audit.touch(Utc::now(), operator);
        Ok(self.store.update_position(position).await?)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_position(&self, id: PositionId) -> DomainResult<()> {
        if !self.store.delete_position(id).await? {
            return Err(DomainError::not_found(format!("position {id} not found")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use windcms_core::ErrorCode;

    use super::*;
    use crate::store::InMemoryIdentityStore;

    const T: TenantId = TenantId::new(1);

    fn tree() -> OrgTree<InMemoryIdentityStore> {
        OrgTree::new(InMemoryIdentityStore::arc())
    }

    fn unit(name: &str, parent: Option<OrgUnitId>, sort_order: u32) -> OrgUnitDraft {
        OrgUnitDraft {
            tenant_id: T,
            parent_id: parent,
            name: name.into(),
            sort_order,
            ..Default::default()
        }
    }

    fn position(code: &str, org_unit_id: OrgUnitId, reports_to: Option<PositionId>) -> PositionDraft {
        PositionDraft {
            tenant_id: T,
            org_unit_id,
            reports_to_position_id: reports_to,
            code: code.into(),
            name: code.into(),
            ..Default::default()
        }
    }

    fn assert_paths(units: &[OrgUnit]) {
        let by_id: HashMap<OrgUnitId, &OrgUnit> = units.iter().map(|u| (u.id, u)).collect();
        for u in units {
            assert!(u.path.ends_with(&format!("/{}", u.id)), "{}", u.path);
            if let Some(parent) = u.parent_id.and_then(|p| by_id.get(&p)) {
                assert_eq!(u.path, format!("{}/{}", parent.path, u.id));
            }
        }
    }

    #[tokio::test]
    async fn listing_nests_children_by_sort_order() {
        let t = tree();
        let root = t.create_unit(unit("root", None, 0)).await.unwrap();
        t.create_unit(unit("b", Some(root.id), 2)).await.unwrap();
        t.create_unit(unit("a", Some(root.id), 1)).await.unwrap();

        let nested = t.unit_tree(T).await.unwrap();
        assert_eq!(nested.len(), 1);
        let names: Vec<&str> = nested[0].children.iter().map(|n| n.item.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn reparent_into_own_subtree_is_rejected() {
        let t = tree();
        let a = t.create_unit(unit("a", None, 0)).await.unwrap();
        let b = t.create_unit(unit("b", Some(a.id), 0)).await.unwrap();

        let err = t.move_unit(a.id, Some(b.id)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
        let err = t.move_unit(a.id, Some(a.id)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn update_moves_when_parent_is_masked() {
        let t = tree();
        let a = t.create_unit(unit("a", None, 0)).await.unwrap();
        let b = t.create_unit(unit("b", None, 0)).await.unwrap();
        let c = t.create_unit(unit("c", Some(a.id), 0)).await.unwrap();

        let updated = t
            .update_unit(OrgUnitUpdate {
                id: c.id,
                draft: unit("c2", Some(b.id), 0),
                mask: FieldMask::of(["name", "parent_id"]),
                allow_missing: false,
                operator: None,
            })
            .await
            .unwrap();
        assert_eq!(updated.name, "c2");
        assert_eq!(updated.path, format!("/{}/{}", b.id, c.id));
    }

    #[tokio::test]
    async fn delete_removes_subtree() {
        let t = tree();
        let a = t.create_unit(unit("a", None, 0)).await.unwrap();
        let b = t.create_unit(unit("b", Some(a.id), 0)).await.unwrap();
        t.create_unit(unit("c", Some(b.id), 0)).await.unwrap();
        let other = t.create_unit(unit("other", None, 0)).await.unwrap();

        assert_eq!(t.delete_unit(a.id).await.unwrap(), 3);
        let left = t.list_units(T).await.unwrap();
        assert_eq!(left.iter().map(|u| u.id).collect::<Vec<_>>(), vec![other.id]);
        assert_eq!(t.delete_unit(a.id).await.unwrap_err().code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn reports_to_cycles_are_rejected() {
        let t = tree();
        let ou = t.create_unit(unit("ou", None, 0)).await.unwrap();
        let ceo = t.create_position(position("ceo", ou.id, None)).await.unwrap();
        let cto = t.create_position(position("cto", ou.id, Some(ceo.id))).await.unwrap();
        let dev = t.create_position(position("dev", ou.id, Some(cto.id))).await.unwrap();

        let err = t
            .update_position(PositionUpdate {
                id: ceo.id,
                draft: position("ceo", ou.id, Some(dev.id)),
                mask: FieldMask::of(["reports_to_position_id"]),
                allow_missing: false,
                operator: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::bad_request("reports-to cycle"));

        let nested = t.position_tree(T).await.unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].children[0].children[0].item.id, dev.id);
    }

    #[tokio::test]
    async fn position_codes_are_unique_per_tenant() {
        let t = tree();
        let ou = t.create_unit(unit("ou", None, 0)).await.unwrap();
        t.create_position(position("ceo", ou.id, None)).await.unwrap();
        let err = t.create_position(position("ceo", ou.id, None)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
        assert!(t.get_position_by_code(T, "ceo").await.is_ok());
    }

    proptest! {
        #[test]
        fn paths_track_parents_through_moves(
            parents in proptest::collection::vec(proptest::option::of(0usize..8), 1..12),
            moves in proptest::collection::vec((0usize..12, proptest::option::of(0usize..12)), 0..10),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let t = tree();
                let mut ids: Vec<OrgUnitId> = Vec::new();
                for (i, parent) in parents.iter().enumerate() {
                    let parent = parent.filter(|p| *p < ids.len()).map(|p| ids[p]);
                    let created = t.create_unit(unit(&format!("n{i}"), parent, 0)).await.unwrap();
                    ids.push(created.id);
                }
                for (node, parent) in moves {
                    let Some(node) = ids.get(node).copied() else { continue };
                    let parent = parent.and_then(|p| ids.get(p).copied());
                    // Rejected moves must leave paths untouched.
                    let _ = t.move_unit(node, parent).await;
                }
                assert_paths(&t.list_units(T).await.unwrap());
            });
        }
    }
}
