//! Permissions and their API/menu bindings.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use tracing::instrument;

use windcms_auth::{NewPermission, Permission, PermissionCode};
use windcms_core::{ApiId, MenuId, PermissionId, RoleId, sorted_unique};

use super::{PostgresIdentityStore, audit_cols, col, id_col, ids_i64, map_sqlx_error, roles};
use crate::store::{PermissionStore, StoreResult};

const PERMISSION_COLUMNS: &str =
    "id, code, name, description, created_at, created_by, updated_at, updated_by";

fn permission_from_row(row: &PgRow) -> StoreResult<Permission> {
    Ok(Permission {
        id: id_col(row, "id")?,
        code: PermissionCode::new(col::<String>(row, "code")?),
        name: col(row, "name")?,
        description: col(row, "description")?,
        audit: audit_cols(row)?,
    })
}

/// Replace the `(permission, target)` pairs of one binding table.
async fn replace_bindings(
    store: &PostgresIdentityStore,
    table: &'static str,
    column: &'static str,
    id: PermissionId,
    targets: Vec<i64>,
) -> StoreResult<()> {
    let mut tx = store
        .pool
        .begin()
        .await
        .map_err(|e| map_sqlx_error("begin_transaction", e))?;
    sqlx::query(&format!("DELETE FROM {table} WHERE permission_id = $1"))
        .bind(i64::from(id))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("delete_permission_bindings", e))?;
    if !targets.is_empty() {
        sqlx::query(&format!(
            "INSERT INTO {table} (permission_id, {column}) SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING"
        ))
        .bind(i64::from(id))
        .bind(targets)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_permission_bindings", e))?;
    }
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}

/// Targets of one binding table reachable from `ids`, ascending.
async fn bound_targets(
    store: &PostgresIdentityStore,
    table: &'static str,
    column: &'static str,
    ids: &[PermissionId],
) -> StoreResult<Vec<i64>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query(&format!(
        "SELECT DISTINCT {column} AS target FROM {table} WHERE permission_id = ANY($1) ORDER BY target"
    ))
    .bind(ids_i64(ids))
    .fetch_all(&*store.pool)
    .await
    .map_err(|e| map_sqlx_error("bound_targets", e))?;
    rows.iter().map(|r| col::<i64>(r, "target")).collect()
}

#[async_trait]
impl PermissionStore for PostgresIdentityStore {
    #[instrument(skip(self, permission), fields(code = %permission.code), err)]
    async fn create_permission(&self, permission: NewPermission) -> StoreResult<Permission> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO permissions (code, name, description)
            VALUES ($1, $2, $3)
            RETURNING {PERMISSION_COLUMNS}
            "#
        ))
        .bind(permission.code.trim())
        .bind(&permission.name)
        .bind(&permission.description)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_permission", e))?;
        permission_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY id"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_permissions", e))?;
        rows.iter().map(permission_from_row).collect()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn replace_role_permissions(&self, role_id: RoleId, ids: &[PermissionId]) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        roles::replace_role_permissions(&mut tx, role_id, ids).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, role_ids), fields(count = role_ids.len()), err)]
    async fn permission_ids_for_roles(&self, role_ids: &[RoleId]) -> StoreResult<Vec<PermissionId>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT DISTINCT permission_id FROM role_permissions WHERE role_id = ANY($1)")
            .bind(ids_i64(role_ids))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("permission_ids_for_roles", e))?;
        let ids = rows
            .iter()
            .map(|r| id_col(r, "permission_id"))
            .collect::<StoreResult<Vec<PermissionId>>>()?;
        Ok(sorted_unique(ids))
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn permission_codes(&self, ids: &[PermissionId]) -> StoreResult<Vec<PermissionCode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT code FROM permissions WHERE id = ANY($1)")
            .bind(ids_i64(ids))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("permission_codes", e))?;
        let codes = rows
            .iter()
            .map(|r| col::<String>(r, "code").map(PermissionCode::new))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(sorted_unique(codes))
    }

    #[instrument(skip(self, api_ids), fields(count = api_ids.len()), err)]
    async fn set_permission_apis(&self, id: PermissionId, api_ids: &[ApiId]) -> StoreResult<()> {
        replace_bindings(self, "permission_apis", "api_id", id, ids_i64(api_ids)).await
    }

    #[instrument(skip(self, menu_ids), fields(count = menu_ids.len()), err)]
    async fn set_permission_menus(&self, id: PermissionId, menu_ids: &[MenuId]) -> StoreResult<()> {
        replace_bindings(self, "permission_menus", "menu_id", id, ids_i64(menu_ids)).await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn api_ids_for_permissions(&self, ids: &[PermissionId]) -> StoreResult<Vec<ApiId>> {
        bound_targets(self, "permission_apis", "api_id", ids)
            .await?
            .into_iter()
            .map(|v| ApiId::try_from(v).map_err(Into::into))
            .collect()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn menu_ids_for_permissions(&self, ids: &[PermissionId]) -> StoreResult<Vec<MenuId>> {
        bound_targets(self, "permission_menus", "menu_id", ids)
            .await?
            .into_iter()
            .map(|v| MenuId::try_from(v).map_err(Into::into))
            .collect()
    }
}
