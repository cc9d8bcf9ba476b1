//! Membership graph: a user's roles, positions and org units under the
//! deployment's user↔tenant topology.
//!
//! | Topology | Edges hang off | Tenant scoping |
//! |----------|----------------|----------------|
//! | `NONE` | the user | none |
//! | `ONE_TO_ONE` | the user | the user's tenant |
//! | `ONE_TO_MANY` | a `(tenant, user)` membership row | per membership |
//!
//! Only the configured topology is ever read or written.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use windcms_auth::{
    Membership, MembershipStatus, RelationAssignment, RelationFilter, RelationIds, RelationKind,
    intersect_user_lists,
};
use windcms_core::{DomainError, DomainResult, TenantId, UserId, UserTenantRelation};

use crate::audit::{AuditEvent, AuditKind, AuditRecorder, AuditTarget, render_ids};
use crate::store::{DirectEdgeStore, EdgeSet, MembershipStore, MembershipUpsert};

/// Source of "users holding any of these targets" for one kind.
#[async_trait]
trait UsersByKind: Send + Sync {
    async fn users_of_kind(&self, kind: RelationKind, ids: &[u32]) -> DomainResult<Vec<UserId>>;
}

/// Intersect per-kind user sets in search order, stopping at the first
/// empty intersection. `None` when the filter names no kind.
async fn search<G>(graph: &G, filter: &RelationFilter) -> DomainResult<Option<Vec<UserId>>>
where
    G: UsersByKind + ?Sized,
{
    let mut result: Option<Vec<UserId>> = None;
    for (kind, ids) in filter.active_kinds() {
        let users = graph.users_of_kind(kind, &ids).await?;
        result = intersect_user_lists(result.into_iter().chain(std::iter::once(users)));
        if result.as_ref().is_some_and(Vec::is_empty) {
            debug!(?kind, "relation search short-circuited");
            break;
        }
    }
    Ok(result)
}

/// Store lookups bound to one topology, tenant and instant.
struct Scoped<'a, S: ?Sized> {
    store: &'a S,
    relation: UserTenantRelation,
    tenant_id: Option<TenantId>,
    effective_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl<S> UsersByKind for Scoped<'_, S>
where
    S: DirectEdgeStore + MembershipStore + ?Sized,
{
    async fn users_of_kind(&self, kind: RelationKind, ids: &[u32]) -> DomainResult<Vec<UserId>> {
        let users = if self.relation.uses_memberships() {
            self.store
                .users_by_membership_edge(kind, ids, self.tenant_id, self.effective_at)
                .await?
        } else {
            self.store.users_by_direct_edge(kind, ids, self.effective_at).await?
        };
        Ok(users)
    }
}

pub struct MembershipGraph<S: ?Sized> {
    store: Arc<S>,
    relation: UserTenantRelation,
    audit: AuditRecorder,
}

impl<S: ?Sized> Clone for MembershipGraph<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            relation: self.relation,
            audit: self.audit.clone(),
        }
    }
}

fn describe(assignment: &RelationAssignment) -> String {
    format!(
        "roles={} positions={} org_units={}",
        render_ids(assignment.role_ids.iter().map(|id| id.get())),
        render_ids(assignment.position_ids.iter().map(|id| id.get())),
        render_ids(assignment.org_unit_ids.iter().map(|id| id.get())),
    )
}

impl<S> MembershipGraph<S>
where
    S: DirectEdgeStore + MembershipStore + ?Sized,
{
    pub fn new(store: Arc<S>, relation: UserTenantRelation) -> Self {
        Self {
            store,
            relation,
            audit: AuditRecorder::default(),
        }
    }

    pub fn with_audit(mut self, audit: AuditRecorder) -> Self {
        self.audit = audit;
        self
    }

    fn record_assignment(&self, user_id: UserId, tenant_id: TenantId, assignment: &RelationAssignment) {
        self.audit.record(
            AuditEvent::new(AuditKind::RelationsAssigned, tenant_id, Some(user_id))
                .operator(assignment.operator)
                .target(AuditTarget::User, user_id.get())
                .change(None, Some(describe(assignment))),
        );
    }

    pub fn relation(&self) -> UserTenantRelation {
        self.relation
    }

    fn membership_tenant(&self, tenant_id: Option<TenantId>) -> DomainResult<TenantId> {
        tenant_id
            .filter(|t| !t.is_zero())
            .ok_or_else(|| DomainError::bad_request("tenant id is required for memberships"))
    }

    /// Replace the user's relation set. Under memberships the row for
    /// `(tenant, user)` is upserted and returned.
    #[instrument(skip(self, assignment), fields(relation = ?self.relation), err)]
    pub async fn assign(
        &self,
        user_id: UserId,
        tenant_id: Option<TenantId>,
        assignment: RelationAssignment,
    ) -> DomainResult<Option<Membership>> {
        if user_id.is_zero() {
            return Err(DomainError::bad_request("user id is required"));
        }
        let assignment = assignment.normalized()?;
        let window = assignment.window(Utc::now());

        if self.relation.uses_memberships() {
            let tenant_id = self.membership_tenant(tenant_id)?;
            let edges = EdgeSet {
                tenant_id,
                targets: assignment.targets(),
                status: assignment.status,
                window,
                operator: assignment.operator,
            };
            let membership = self
                .store
                .assign_membership(
                    MembershipUpsert {
                        tenant_id,
                        user_id,
                        role_id: assignment.role_id,
                        position_id: assignment.position_id,
                        org_unit_id: assignment.org_unit_id,
                        status: assignment.status,
                        is_primary: true,
                        window,
                        operator: assignment.operator,
                    },
                    edges,
                )
                .await?;
            info!(membership_id = %membership.id, "membership assigned");
            self.record_assignment(user_id, tenant_id, &assignment);
            return Ok(Some(membership));
        }

        let tenant_id = if self.relation.is_tenant_mode() {
            tenant_id.unwrap_or(TenantId::PLATFORM)
        } else {
            TenantId::PLATFORM
        };
        self.store
            .replace_user_edges(
                user_id,
                EdgeSet {
                    tenant_id,
                    targets: assignment.targets(),
                    status: assignment.status,
                    window,
                    operator: assignment.operator,
                },
            )
            .await?;
        info!(%user_id, "user relations assigned");
        self.record_assignment(user_id, tenant_id, &assignment);
        Ok(None)
    }

    /// Effective relation ids. Under memberships an ineffective membership
    /// yields nothing.
    pub async fn relation_ids(&self, user_id: UserId, tenant_id: Option<TenantId>) -> DomainResult<RelationIds> {
        let now = Utc::now();
        if self.relation.uses_memberships() {
            let tenant_id = self.membership_tenant(tenant_id)?;
            let Some(membership) = self.store.get_membership(tenant_id, user_id).await? else {
                return Ok(RelationIds::default());
            };
            if !membership.is_effective(now) {
                return Ok(RelationIds::default());
            }
            let edges = self.store.membership_edges(tenant_id, user_id).await?;
            return Ok(RelationIds::from_edges(&edges, now));
        }
        let edges = self.store.user_edges(user_id).await?;
        Ok(RelationIds::from_edges(&edges, now))
    }

    #[instrument(skip(self), err)]
    pub async fn clean_relations(&self, user_id: UserId) -> DomainResult<()> {
        if self.relation.uses_memberships() {
            self.store.clean_memberships(user_id).await?;
        } else {
            self.store.clean_user_edges(user_id).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn set_status(
        &self,
        user_id: UserId,
        tenant_id: Option<TenantId>,
        status: MembershipStatus,
    ) -> DomainResult<()> {
        if self.relation.uses_memberships() {
            let tenant_id = self.membership_tenant(tenant_id)?;
            self.store.set_membership_status(tenant_id, user_id, status).await?;
        } else {
            self.store.set_user_edge_status(user_id, status).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn set_end_at(
        &self,
        user_id: UserId,
        tenant_id: Option<TenantId>,
        end_at: Option<DateTime<Utc>>,
    ) -> DomainResult<()> {
        if self.relation.uses_memberships() {
            let tenant_id = self.membership_tenant(tenant_id)?;
            self.store.set_membership_end_at(tenant_id, user_id, end_at).await?;
        } else {
            self.store.set_user_edge_end_at(user_id, end_at).await?;
        }
        Ok(())
    }

    /// Effective memberships of the user across tenants.
    pub async fn active_memberships(&self, user_id: UserId) -> DomainResult<Vec<Membership>> {
        if !self.relation.uses_memberships() {
            return Err(DomainError::bad_request("memberships are not enabled"));
        }
        let now = Utc::now();
        let mut memberships = self.store.list_memberships(user_id).await?;
        memberships.retain(|m| m.is_effective(now));
        Ok(memberships)
    }

    /// Users holding any of `ids` of `kind`.
    pub async fn user_ids_by(
        &self,
        kind: RelationKind,
        ids: &[u32],
        tenant_id: Option<TenantId>,
        exclude_expired: bool,
    ) -> DomainResult<Vec<UserId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.scoped(tenant_id, exclude_expired).users_of_kind(kind, ids).await
    }

    /// Users matching every non-empty kind of `filter`. `None` means the
    /// filter is empty and the caller should not restrict by relation.
    #[instrument(skip(self, filter), err)]
    pub async fn search_users(
        &self,
        filter: &RelationFilter,
        tenant_id: Option<TenantId>,
    ) -> DomainResult<Option<Vec<UserId>>> {
        search(&self.scoped(tenant_id, true), filter).await
    }

    fn scoped(&self, tenant_id: Option<TenantId>, exclude_expired: bool) -> Scoped<'_, S> {
        Scoped {
            store: &*self.store,
            relation: self.relation,
            tenant_id,
            effective_at: exclude_expired.then(Utc::now),
        }
    }
}
