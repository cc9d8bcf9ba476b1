//! Direct user edges and tenant memberships.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use sqlx::postgres::PgRow;
use tracing::instrument;

use windcms_auth::{Membership, MembershipStatus, RelationEdge, RelationKind, Window};
use windcms_core::{TenantId, UserId, sorted_unique};

use super::{
    PostgresIdentityStore, audit_cols, col, id_col, map_sqlx_error, opt_i64, opt_id_col, u32_col,
    wire_col,
};
use crate::store::{DirectEdgeStore, EdgeSet, MembershipStore, MembershipUpsert, StoreError, StoreResult};

const EDGE_COLUMNS: &str = "user_id, tenant_id, kind, target_id, status, is_primary, start_at, end_at, \
    created_at, created_by, updated_at, updated_by";

const MEMBERSHIP_COLUMNS: &str = "id, tenant_id, user_id, role_id, position_id, org_unit_id, status, \
    is_primary, start_at, end_at, created_at, created_by, updated_at, updated_by";

fn window_cols(row: &PgRow) -> StoreResult<Window> {
    Ok(Window {
        start_at: col(row, "start_at")?,
        end_at: col(row, "end_at")?,
    })
}

fn edge_from_row(row: &PgRow, with_membership: bool) -> StoreResult<RelationEdge> {
    Ok(RelationEdge {
        user_id: id_col(row, "user_id")?,
        tenant_id: id_col(row, "tenant_id")?,
        membership_id: if with_membership {
            Some(id_col(row, "membership_id")?)
        } else {
            None
        },
        kind: wire_col(row, "kind")?,
        target_id: u32_col(row, "target_id")?,
        status: wire_col(row, "status")?,
        is_primary: col(row, "is_primary")?,
        window: window_cols(row)?,
        audit: audit_cols(row)?,
    })
}

fn membership_from_row(row: &PgRow) -> StoreResult<Membership> {
    Ok(Membership {
        id: id_col(row, "id")?,
        tenant_id: id_col(row, "tenant_id")?,
        user_id: id_col(row, "user_id")?,
        role_id: opt_id_col(row, "role_id")?,
        position_id: opt_id_col(row, "position_id")?,
        org_unit_id: opt_id_col(row, "org_unit_id")?,
        status: wire_col(row, "status")?,
        is_primary: col(row, "is_primary")?,
        window: window_cols(row)?,
        audit: audit_cols(row)?,
    })
}

fn user_ids(rows: &[PgRow]) -> StoreResult<Vec<UserId>> {
    let ids = rows
        .iter()
        .map(|r| id_col(r, "user_id"))
        .collect::<StoreResult<Vec<UserId>>>()?;
    Ok(sorted_unique(ids))
}

fn target_ids(ids: &[u32]) -> Vec<i64> {
    ids.iter().map(|id| i64::from(*id)).collect()
}

pub(super) async fn replace_user_edges(
    conn: &mut PgConnection,
    user_id: UserId,
    edges: &EdgeSet,
) -> StoreResult<()> {
    sqlx::query("DELETE FROM user_relations WHERE user_id = $1")
        .bind(i64::from(user_id))
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("clean_user_relations", e))?;

    for (kind, target_id, is_primary) in &edges.targets {
        sqlx::query(
            r#"
            INSERT INTO user_relations (
                user_id, tenant_id, kind, target_id, status, is_primary, start_at, end_at, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(i64::from(user_id))
        .bind(i64::from(edges.tenant_id))
        .bind(kind.as_str())
        .bind(i64::from(*target_id))
        .bind(edges.status.as_str())
        .bind(*is_primary)
        .bind(edges.window.start_at)
        .bind(edges.window.end_at)
        .bind(opt_i64(edges.operator))
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_user_relation", e))?;
    }
    Ok(())
}

/// Upsert the membership row and replace its edges on an open connection.
pub(super) async fn upsert_membership(
    conn: &mut PgConnection,
    upsert: &MembershipUpsert,
    edges: &EdgeSet,
) -> StoreResult<Membership> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO memberships (
            tenant_id, user_id, role_id, position_id, org_unit_id, status, is_primary,
            start_at, end_at, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (tenant_id, user_id) DO UPDATE SET
            role_id = EXCLUDED.role_id,
            position_id = EXCLUDED.position_id,
            org_unit_id = EXCLUDED.org_unit_id,
            status = EXCLUDED.status,
            is_primary = EXCLUDED.is_primary,
            start_at = EXCLUDED.start_at,
            end_at = EXCLUDED.end_at,
            updated_at = NOW(),
            updated_by = EXCLUDED.created_by
        RETURNING {MEMBERSHIP_COLUMNS}
        "#
    ))
    .bind(i64::from(upsert.tenant_id))
    .bind(i64::from(upsert.user_id))
    .bind(opt_i64(upsert.role_id))
    .bind(opt_i64(upsert.position_id))
    .bind(opt_i64(upsert.org_unit_id))
    .bind(upsert.status.as_str())
    .bind(upsert.is_primary)
    .bind(upsert.window.start_at)
    .bind(upsert.window.end_at)
    .bind(opt_i64(upsert.operator))
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("upsert_membership", e))?;
    let membership = membership_from_row(&row)?;

    sqlx::query("DELETE FROM membership_relations WHERE membership_id = $1")
        .bind(i64::from(membership.id))
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("clean_membership_relations", e))?;

    for (kind, target_id, is_primary) in &edges.targets {
        sqlx::query(
            r#"
            INSERT INTO membership_relations (
                membership_id, user_id, tenant_id, kind, target_id, status, is_primary,
                start_at, end_at, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(i64::from(membership.id))
        .bind(i64::from(membership.user_id))
        .bind(i64::from(edges.tenant_id))
        .bind(kind.as_str())
        .bind(i64::from(*target_id))
        .bind(edges.status.as_str())
        .bind(*is_primary)
        .bind(edges.window.start_at)
        .bind(edges.window.end_at)
        .bind(opt_i64(edges.operator))
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_membership_relation", e))?;
    }
    Ok(membership)
}

#[async_trait]
impl DirectEdgeStore for PostgresIdentityStore {
    #[instrument(skip(self, edges), fields(edge_count = edges.targets.len()), err)]
    async fn replace_user_edges(&self, user_id: UserId, edges: EdgeSet) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        replace_user_edges(&mut tx, user_id, &edges).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn user_edges(&self, user_id: UserId) -> StoreResult<Vec<RelationEdge>> {
        let rows = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM user_relations WHERE user_id = $1 ORDER BY kind, target_id"
        ))
        .bind(i64::from(user_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_edges", e))?;
        rows.iter().map(|r| edge_from_row(r, false)).collect()
    }

    #[instrument(skip(self), err)]
    async fn clean_user_edges(&self, user_id: UserId) -> StoreResult<()> {
        sqlx::query("DELETE FROM user_relations WHERE user_id = $1")
            .bind(i64::from(user_id))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("clean_user_edges", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn set_user_edge_status(&self, user_id: UserId, status: MembershipStatus) -> StoreResult<()> {
        sqlx::query("UPDATE user_relations SET status = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(i64::from(user_id))
            .bind(status.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_user_edge_status", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn set_user_edge_end_at(&self, user_id: UserId, end_at: Option<DateTime<Utc>>) -> StoreResult<()> {
        sqlx::query("UPDATE user_relations SET end_at = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(i64::from(user_id))
            .bind(end_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_user_edge_end_at", e))?;
        Ok(())
    }

    #[instrument(skip(self, ids), fields(kind = %kind, count = ids.len()), err)]
    async fn users_by_direct_edge(
        &self,
        kind: RelationKind,
        ids: &[u32],
        effective_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<UserId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT user_id FROM user_relations
            WHERE kind = $1 AND target_id = ANY($2)
              AND ($3::TIMESTAMPTZ IS NULL OR (status = $4 AND (end_at IS NULL OR end_at > $3)))
            "#,
        )
        .bind(kind.as_str())
        .bind(target_ids(ids))
        .bind(effective_at)
        .bind(MembershipStatus::Active.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("users_by_direct_edge", e))?;
        user_ids(&rows)
    }
}

#[async_trait]
impl MembershipStore for PostgresIdentityStore {
    #[instrument(
        skip(self, membership, edges),
        fields(tenant_id = %membership.tenant_id, user_id = %membership.user_id),
        err
    )]
    async fn assign_membership(&self, membership: MembershipUpsert, edges: EdgeSet) -> StoreResult<Membership> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let membership = upsert_membership(&mut tx, &membership, &edges).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(membership)
    }

    #[instrument(skip(self), err)]
    async fn get_membership(&self, tenant_id: TenantId, user_id: UserId) -> StoreResult<Option<Membership>> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE tenant_id = $1 AND user_id = $2"
        ))
        .bind(i64::from(tenant_id))
        .bind(i64::from(user_id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_membership", e))?;
        row.as_ref().map(membership_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_memberships(&self, user_id: UserId) -> StoreResult<Vec<Membership>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE user_id = $1 ORDER BY id"
        ))
        .bind(i64::from(user_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_memberships", e))?;
        rows.iter().map(membership_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn membership_edges(&self, tenant_id: TenantId, user_id: UserId) -> StoreResult<Vec<RelationEdge>> {
        let rows = sqlx::query(
            r#"
            SELECT r.membership_id, r.user_id, r.tenant_id, r.kind, r.target_id, r.status, r.is_primary,
                   r.start_at, r.end_at, r.created_at, r.created_by, r.updated_at, r.updated_by
            FROM membership_relations r
            JOIN memberships m ON m.id = r.membership_id
            WHERE m.tenant_id = $1 AND m.user_id = $2
            ORDER BY r.kind, r.target_id
            "#,
        )
        .bind(i64::from(tenant_id))
        .bind(i64::from(user_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("membership_edges", e))?;
        rows.iter().map(|r| edge_from_row(r, true)).collect()
    }

    #[instrument(skip(self), err)]
    async fn set_membership_status(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        status: MembershipStatus,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE memberships SET status = $3, updated_at = NOW() WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(i64::from(tenant_id))
        .bind(i64::from(user_id))
        .bind(status.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_membership_status", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "membership of user {user_id} in tenant {tenant_id}"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn set_membership_end_at(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        end_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE memberships SET end_at = $3, updated_at = NOW() WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(i64::from(tenant_id))
        .bind(i64::from(user_id))
        .bind(end_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_membership_end_at", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "membership of user {user_id} in tenant {tenant_id}"
            )));
        }
        Ok(())
    }

    /// Edges go with the memberships through `ON DELETE CASCADE`.
    #[instrument(skip(self), err)]
    async fn clean_memberships(&self, user_id: UserId) -> StoreResult<()> {
        sqlx::query("DELETE FROM memberships WHERE user_id = $1")
            .bind(i64::from(user_id))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("clean_memberships", e))?;
        Ok(())
    }

    #[instrument(skip(self, ids), fields(kind = %kind, count = ids.len()), err)]
    async fn users_by_membership_edge(
        &self,
        kind: RelationKind,
        ids: &[u32],
        tenant_id: Option<TenantId>,
        effective_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<UserId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT r.user_id FROM membership_relations r
            JOIN memberships m ON m.id = r.membership_id
            WHERE r.kind = $1 AND r.target_id = ANY($2)
              AND ($3::BIGINT IS NULL OR r.tenant_id = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR (
                    r.status = $5 AND (r.end_at IS NULL OR r.end_at > $4)
                AND m.status = $5 AND (m.end_at IS NULL OR m.end_at > $4)
              ))
            "#,
        )
        .bind(kind.as_str())
        .bind(target_ids(ids))
        .bind(opt_i64(tenant_id))
        .bind(effective_at)
        .bind(MembershipStatus::Active.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("users_by_membership_edge", e))?;
        user_ids(&rows)
    }
}
