//! Roles, role metadata and role permission sets.

use async_trait::async_trait;
use sqlx::PgConnection;
use sqlx::postgres::PgRow;
use tracing::instrument;

use windcms_auth::{Role, RoleMetadata, RoleStatus};
use windcms_core::{PermissionId, RoleId, TenantId, sorted_unique};

use super::{
    PostgresIdentityStore, audit_cols, col, id_col, ids_i64, map_sqlx_error, opt_i64, opt_u32_col,
    u32_col, wire_col,
};
use crate::store::{NewRoleRecord, RoleStore, StoreError, StoreResult};

const ROLE_COLUMNS: &str = "id, tenant_id, code, name, role_type, status, is_protected, sort_order, \
    description, created_at, created_by, updated_at, updated_by";

const METADATA_COLUMNS: &str = "role_id, scope, is_template, template_for, template_version, \
    last_synced_version, last_synced_at, sync_policy";

fn role_from_row(row: &PgRow) -> StoreResult<Role> {
    Ok(Role {
        id: id_col(row, "id")?,
        tenant_id: id_col(row, "tenant_id")?,
        code: col(row, "code")?,
        name: col(row, "name")?,
        role_type: wire_col(row, "role_type")?,
        status: wire_col(row, "status")?,
        is_protected: col(row, "is_protected")?,
        sort_order: u32_col(row, "sort_order")?,
        description: col(row, "description")?,
        audit: audit_cols(row)?,
    })
}

fn metadata_from_row(row: &PgRow) -> StoreResult<RoleMetadata> {
    Ok(RoleMetadata {
        role_id: id_col(row, "role_id")?,
        scope: wire_col(row, "scope")?,
        is_template: col(row, "is_template")?,
        template_for: col(row, "template_for")?,
        template_version: u32_col(row, "template_version")?,
        last_synced_version: opt_u32_col(row, "last_synced_version")?,
        last_synced_at: col(row, "last_synced_at")?,
        sync_policy: wire_col(row, "sync_policy")?,
    })
}

async fn write_metadata(conn: &mut PgConnection, metadata: &RoleMetadata) -> StoreResult<RoleMetadata> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO role_metadata (
            role_id, scope, is_template, template_for, template_version,
            last_synced_version, last_synced_at, sync_policy
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {METADATA_COLUMNS}
        "#
    ))
    .bind(i64::from(metadata.role_id))
    .bind(metadata.scope.as_str())
    .bind(metadata.is_template)
    .bind(&metadata.template_for)
    .bind(i64::from(metadata.template_version))
    .bind(metadata.last_synced_version.map(i64::from))
    .bind(metadata.last_synced_at)
    .bind(metadata.sync_policy.as_str())
    .fetch_one(conn)
    .await
    .map_err(|e| map_sqlx_error("insert_role_metadata", e))?;
    metadata_from_row(&row)
}

pub(super) async fn replace_role_permissions(
    conn: &mut PgConnection,
    role_id: RoleId,
    ids: &[PermissionId],
) -> StoreResult<()> {
    sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
        .bind(i64::from(role_id))
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("delete_role_permissions", e))?;
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO role_permissions (role_id, permission_id)
        SELECT $1, UNNEST($2::BIGINT[])
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(i64::from(role_id))
    .bind(ids_i64(ids))
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_role_permissions", e))?;
    Ok(())
}

pub(super) async fn permission_ids_for_role(
    conn: &mut PgConnection,
    role_id: RoleId,
) -> StoreResult<Vec<PermissionId>> {
    let rows = sqlx::query("SELECT permission_id FROM role_permissions WHERE role_id = $1")
        .bind(i64::from(role_id))
        .fetch_all(conn)
        .await
        .map_err(|e| map_sqlx_error("permission_ids_for_role", e))?;
    rows.iter().map(|r| id_col(r, "permission_id")).collect()
}

/// Role row, metadata and permission set on an open connection.
pub(super) async fn insert_role(
    conn: &mut PgConnection,
    record: NewRoleRecord,
) -> StoreResult<(Role, RoleMetadata)> {
    let NewRoleRecord {
        draft,
        mut metadata,
        permission_ids,
    } = record;

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO roles (tenant_id, code, name, role_type, status, is_protected, sort_order, description, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {ROLE_COLUMNS}
        "#
    ))
    .bind(i64::from(draft.tenant_id))
    .bind(&draft.code)
    .bind(&draft.name)
    .bind(draft.role_type.as_str())
    .bind(draft.status.as_str())
    .bind(draft.is_protected)
    .bind(i64::from(draft.sort_order))
    .bind(&draft.description)
    .bind(opt_i64(draft.created_by))
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_role", e))?;
    let role = role_from_row(&row)?;

    metadata.role_id = role.id;
    let metadata = write_metadata(&mut *conn, &metadata).await?;
    replace_role_permissions(&mut *conn, role.id, &permission_ids).await?;
    Ok((role, metadata))
}

#[async_trait]
impl RoleStore for PostgresIdentityStore {
    #[instrument(skip(self, record), fields(code = %record.draft.code), err)]
    async fn create_role(&self, record: NewRoleRecord) -> StoreResult<(Role, RoleMetadata)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let created = insert_role(&mut tx, record).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(created)
    }

    #[instrument(skip(self), err)]
    async fn get_role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(i64::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_role", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_role_by_code(&self, tenant_id: TenantId, code: &str) -> StoreResult<Option<Role>> {
        let row = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE tenant_id = $1 AND code = $2"
        ))
        .bind(i64::from(tenant_id))
        .bind(code)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_role_by_code", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_template_role(&self, code: &str) -> StoreResult<Option<Role>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {ROLE_COLUMNS} FROM roles
            WHERE tenant_id = $1 AND code = $2 AND is_protected AND status = $3
            "#
        ))
        .bind(i64::from(TenantId::PLATFORM))
        .bind(code)
        .bind(RoleStatus::On.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_template_role", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_roles(&self, tenant_id: TenantId) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE tenant_id = $1 ORDER BY sort_order, id"
        ))
        .bind(i64::from(tenant_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_roles", e))?;
        rows.iter().map(role_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn get_role_metadata(&self, role_id: RoleId) -> StoreResult<Option<RoleMetadata>> {
        let row = sqlx::query(&format!("SELECT {METADATA_COLUMNS} FROM role_metadata WHERE role_id = $1"))
            .bind(i64::from(role_id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_role_metadata", e))?;
        row.as_ref().map(metadata_from_row).transpose()
    }

    #[instrument(skip(self, role, permission_ids), fields(role_id = %role.id), err)]
    async fn update_role(
        &self,
        role: Role,
        permission_ids: Option<Vec<PermissionId>>,
    ) -> StoreResult<(Role, Option<RoleMetadata>)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE roles SET
                code = $2,
                name = $3,
                role_type = $4,
                status = $5,
                is_protected = $6,
                sort_order = $7,
                description = $8,
                updated_at = $9,
                updated_by = $10
            WHERE id = $1
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(i64::from(role.id))
        .bind(&role.code)
        .bind(&role.name)
        .bind(role.role_type.as_str())
        .bind(role.status.as_str())
        .bind(role.is_protected)
        .bind(i64::from(role.sort_order))
        .bind(&role.description)
        .bind(role.audit.updated_at)
        .bind(opt_i64(role.audit.updated_by))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!("role {}", role.id)));
        };
        let updated = role_from_row(&row)?;

        let metadata = sqlx::query(&format!(
            r#"
            UPDATE role_metadata
            SET template_version = template_version + CASE WHEN is_template THEN 1 ELSE 0 END
            WHERE role_id = $1
            RETURNING {METADATA_COLUMNS}
            "#
        ))
        .bind(i64::from(role.id))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("bump_template_version", e))?;
        let metadata = metadata.as_ref().map(metadata_from_row).transpose()?;

        if let Some(ids) = permission_ids {
            replace_role_permissions(&mut tx, role.id, &ids).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok((updated, metadata))
    }

    /// Metadata and permission rows go with the role through `ON DELETE CASCADE`.
    #[instrument(skip(self), err)]
    async fn delete_role(&self, id: RoleId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(i64::from(id))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn role_codes_by_ids(&self, ids: &[RoleId]) -> StoreResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT code FROM roles WHERE id = ANY($1)")
            .bind(ids_i64(ids))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_codes_by_ids", e))?;
        let codes = rows
            .iter()
            .map(|r| col::<String>(r, "code"))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(sorted_unique(codes))
    }

    #[instrument(skip(self, codes), fields(count = codes.len()), err)]
    async fn role_ids_by_codes(&self, tenant_id: TenantId, codes: &[String]) -> StoreResult<Vec<RoleId>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT id FROM roles WHERE tenant_id = $1 AND code = ANY($2)")
            .bind(i64::from(tenant_id))
            .bind(codes)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_ids_by_codes", e))?;
        let ids = rows
            .iter()
            .map(|r| id_col(r, "id"))
            .collect::<StoreResult<Vec<RoleId>>>()?;
        Ok(sorted_unique(ids))
    }
}
