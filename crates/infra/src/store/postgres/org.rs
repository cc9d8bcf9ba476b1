//! Org units (materialized paths) and positions.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use tracing::instrument;

use windcms_auth::org::{child_path, ensure_valid_reparent};
use windcms_auth::{OrgUnit, OrgUnitDraft, Position, PositionDraft};
use windcms_core::{OrgUnitId, PositionId, TenantId};

use super::{
    PostgresIdentityStore, audit_cols, col, id_col, map_sqlx_error, opt_i64, opt_id_col,
    opt_u32_col, u32_col, wire_col,
};
use crate::store::{OrgUnitStore, PositionStore, StoreError, StoreResult};

const ORG_UNIT_COLUMNS: &str = "id, tenant_id, parent_id, name, code, path, sort_order, status, unit_type, \
    leader_id, legal_entity, registration_number, region, address, description, \
    created_at, created_by, updated_at, updated_by";

const POSITION_COLUMNS: &str = "id, tenant_id, org_unit_id, reports_to_position_id, code, name, sort_order, \
    status, position_type, headcount, description, created_at, created_by, updated_at, updated_by";

fn org_unit_from_row(row: &PgRow) -> StoreResult<OrgUnit> {
    Ok(OrgUnit {
        id: id_col(row, "id")?,
        tenant_id: id_col(row, "tenant_id")?,
        parent_id: opt_id_col(row, "parent_id")?,
        name: col(row, "name")?,
        code: col(row, "code")?,
        path: col(row, "path")?,
        sort_order: u32_col(row, "sort_order")?,
        status: wire_col(row, "status")?,
        unit_type: wire_col(row, "unit_type")?,
        leader_id: opt_id_col(row, "leader_id")?,
        legal_entity: col(row, "legal_entity")?,
        registration_number: col(row, "registration_number")?,
        region: col(row, "region")?,
        address: col(row, "address")?,
        description: col(row, "description")?,
        audit: audit_cols(row)?,
    })
}

fn position_from_row(row: &PgRow) -> StoreResult<Position> {
    Ok(Position {
        id: id_col(row, "id")?,
        tenant_id: id_col(row, "tenant_id")?,
        org_unit_id: id_col(row, "org_unit_id")?,
        reports_to_position_id: opt_id_col(row, "reports_to_position_id")?,
        code: col(row, "code")?,
        name: col(row, "name")?,
        sort_order: u32_col(row, "sort_order")?,
        status: wire_col(row, "status")?,
        position_type: wire_col(row, "position_type")?,
        headcount: opt_u32_col(row, "headcount")?,
        description: col(row, "description")?,
        audit: audit_cols(row)?,
    })
}

#[async_trait]
impl OrgUnitStore for PostgresIdentityStore {
    #[instrument(skip(self, draft), fields(tenant_id = %draft.tenant_id), err)]
    async fn create_org_unit(&self, draft: OrgUnitDraft) -> StoreResult<OrgUnit> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let parent_path = match draft.parent_id {
            Some(parent_id) => {
                let row = sqlx::query("SELECT path FROM org_units WHERE id = $1 AND tenant_id = $2")
                    .bind(i64::from(parent_id))
                    .bind(i64::from(draft.tenant_id))
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("load_parent_path", e))?;
                match row {
                    Some(row) => col::<String>(&row, "path")?,
                    None => {
                        tx.rollback()
                            .await
                            .map_err(|e| map_sqlx_error("rollback", e))?;
                        return Err(StoreError::Invalid(format!("parent org unit {parent_id} not found")));
                    }
                }
            }
            None => String::new(),
        };

        let row = sqlx::query(
            r#"
            INSERT INTO org_units (
                tenant_id, parent_id, name, code, sort_order, status, unit_type, leader_id,
                legal_entity, registration_number, region, address, description, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id
            "#,
        )
        .bind(i64::from(draft.tenant_id))
        .bind(opt_i64(draft.parent_id))
        .bind(&draft.name)
        .bind(&draft.code)
        .bind(i64::from(draft.sort_order))
        .bind(draft.status.as_str())
        .bind(draft.unit_type.as_str())
        .bind(opt_i64(draft.leader_id))
        .bind(&draft.legal_entity)
        .bind(&draft.registration_number)
        .bind(&draft.region)
        .bind(&draft.address)
        .bind(&draft.description)
        .bind(opt_i64(draft.created_by))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_org_unit", e))?;
        let id: OrgUnitId = id_col(&row, "id")?;

        let row = sqlx::query(&format!(
            "UPDATE org_units SET path = $2 WHERE id = $1 RETURNING {ORG_UNIT_COLUMNS}"
        ))
        .bind(i64::from(id))
        .bind(child_path(&parent_path, id))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("write_org_unit_path", e))?;
        let unit = org_unit_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(unit)
    }

    #[instrument(skip(self), err)]
    async fn get_org_unit(&self, id: OrgUnitId) -> StoreResult<Option<OrgUnit>> {
        let row = sqlx::query(&format!("SELECT {ORG_UNIT_COLUMNS} FROM org_units WHERE id = $1"))
            .bind(i64::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_org_unit", e))?;
        row.as_ref().map(org_unit_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_org_units(&self, tenant_id: TenantId) -> StoreResult<Vec<OrgUnit>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORG_UNIT_COLUMNS} FROM org_units WHERE tenant_id = $1 ORDER BY path"
        ))
        .bind(i64::from(tenant_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_org_units", e))?;
        rows.iter().map(org_unit_from_row).collect()
    }

    #[instrument(skip(self, unit), fields(org_unit_id = %unit.id), err)]
    async fn update_org_unit(&self, unit: OrgUnit) -> StoreResult<OrgUnit> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE org_units SET
                name = $2,
                code = $3,
                sort_order = $4,
                status = $5,
                unit_type = $6,
                leader_id = $7,
                legal_entity = $8,
                registration_number = $9,
                region = $10,
                address = $11,
                description = $12,
                updated_at = $13,
                updated_by = $14
            WHERE id = $1
            RETURNING {ORG_UNIT_COLUMNS}
            "#
        ))
        .bind(i64::from(unit.id))
        .bind(&unit.name)
        .bind(&unit.code)
        .bind(i64::from(unit.sort_order))
        .bind(unit.status.as_str())
        .bind(unit.unit_type.as_str())
        .bind(opt_i64(unit.leader_id))
        .bind(&unit.legal_entity)
        .bind(&unit.registration_number)
        .bind(&unit.region)
        .bind(&unit.address)
        .bind(&unit.description)
        .bind(unit.audit.updated_at)
        .bind(opt_i64(unit.audit.updated_by))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_org_unit", e))?;
        match row {
            Some(row) => org_unit_from_row(&row),
            None => Err(StoreError::NotFound(format!("org unit {}", unit.id))),
        }
    }

    #[instrument(skip(self), err)]
    async fn move_org_unit(&self, id: OrgUnitId, new_parent: Option<OrgUnitId>) -> StoreResult<OrgUnit> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query("SELECT tenant_id, path FROM org_units WHERE id = $1 FOR UPDATE")
            .bind(i64::from(id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_org_unit", e))?;
        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!("org unit {id}")));
        };
        let tenant_id: TenantId = id_col(&row, "tenant_id")?;
        let old_path: String = col(&row, "path")?;

        let parent_path = match new_parent {
            Some(parent_id) => {
                let row = sqlx::query("SELECT path FROM org_units WHERE id = $1 AND tenant_id = $2")
                    .bind(i64::from(parent_id))
                    .bind(i64::from(tenant_id))
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("load_parent_path", e))?;
                match row {
                    Some(row) => Some(col::<String>(&row, "path")?),
                    None => {
                        tx.rollback()
                            .await
                            .map_err(|e| map_sqlx_error("rollback", e))?;
                        return Err(StoreError::Invalid(format!("parent org unit {parent_id} not found")));
                    }
                }
            }
            None => None,
        };

        if let Err(e) = ensure_valid_reparent(&old_path, parent_path.as_deref()) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Invalid(e.message().to_string()));
        }
        let new_path = child_path(parent_path.as_deref().unwrap_or(""), id);

        // Rewrite the node and every descendant by prefix.
        sqlx::query(
            r#"
            UPDATE org_units
            SET path = $3 || SUBSTRING(path FROM CHAR_LENGTH($2) + 1)
            WHERE tenant_id = $1 AND (path = $2 OR path LIKE $2 || '/%')
            "#,
        )
        .bind(i64::from(tenant_id))
        .bind(&old_path)
        .bind(&new_path)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("rewrite_subtree_paths", e))?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE org_units SET parent_id = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {ORG_UNIT_COLUMNS}
            "#
        ))
        .bind(i64::from(id))
        .bind(opt_i64(new_parent))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("reparent_org_unit", e))?;
        let unit = org_unit_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(unit)
    }

    #[instrument(skip(self), err)]
    async fn delete_org_unit_subtree(&self, id: OrgUnitId) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM org_units o
            USING org_units root
            WHERE root.id = $1
              AND o.tenant_id = root.tenant_id
              AND (o.path = root.path OR o.path LIKE root.path || '/%')
            "#,
        )
        .bind(i64::from(id))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_org_unit_subtree", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PositionStore for PostgresIdentityStore {
    #[instrument(skip(self, draft), fields(code = %draft.code), err)]
    async fn create_position(&self, draft: PositionDraft) -> StoreResult<Position> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO positions (
                tenant_id, org_unit_id, reports_to_position_id, code, name, sort_order,
                status, position_type, headcount, description, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {POSITION_COLUMNS}
            "#
        ))
        .bind(i64::from(draft.tenant_id))
        .bind(i64::from(draft.org_unit_id))
        .bind(opt_i64(draft.reports_to_position_id))
        .bind(draft.code.trim())
        .bind(&draft.name)
        .bind(i64::from(draft.sort_order))
        .bind(draft.status.as_str())
        .bind(draft.position_type.as_str())
        .bind(draft.headcount.map(i64::from))
        .bind(&draft.description)
        .bind(opt_i64(draft.created_by))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_position", e))?;
        position_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn get_position(&self, id: PositionId) -> StoreResult<Option<Position>> {
        let row = sqlx::query(&format!("SELECT {POSITION_COLUMNS} FROM positions WHERE id = $1"))
            .bind(i64::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_position", e))?;
        row.as_ref().map(position_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_position_by_code(&self, tenant_id: TenantId, code: &str) -> StoreResult<Option<Position>> {
        let row = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE tenant_id = $1 AND code = $2"
        ))
        .bind(i64::from(tenant_id))
        .bind(code)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_position_by_code", e))?;
        row.as_ref().map(position_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_positions(&self, tenant_id: TenantId) -> StoreResult<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE tenant_id = $1 ORDER BY sort_order, id"
        ))
        .bind(i64::from(tenant_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_positions", e))?;
        rows.iter().map(position_from_row).collect()
    }

    #[instrument(skip(self, position), fields(position_id = %position.id), err)]
    async fn update_position(&self, position: Position) -> StoreResult<Position> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE positions SET
                org_unit_id = $2,
                reports_to_position_id = $3,
                code = $4,
                name = $5,
                sort_order = $6,
                status = $7,
                position_type = $8,
                headcount = $9,
                description = $10,
                updated_at = $11,
                updated_by = $12
            WHERE id = $1
            RETURNING {POSITION_COLUMNS}
            "#
        ))
        .bind(i64::from(position.id))
        .bind(i64::from(position.org_unit_id))
        .bind(opt_i64(position.reports_to_position_id))
        .bind(&position.code)
        .bind(&position.name)
        .bind(i64::from(position.sort_order))
        .bind(position.status.as_str())
        .bind(position.position_type.as_str())
        .bind(position.headcount.map(i64::from))
        .bind(&position.description)
        .bind(position.audit.updated_at)
        .bind(opt_i64(position.audit.updated_by))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_position", e))?;
        match row {
            Some(row) => position_from_row(&row),
            None => Err(StoreError::NotFound(format!("position {}", position.id))),
        }
    }

    #[instrument(skip(self), err)]
    async fn delete_position(&self, id: PositionId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM positions WHERE id = $1")
            .bind(i64::from(id))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_position", e))?;
        Ok(result.rows_affected() > 0)
    }
}
