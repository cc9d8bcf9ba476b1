//! Login policy rules.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use tracing::instrument;

use windcms_auth::{LoginPolicy, NewLoginPolicy};
use windcms_core::{LoginPolicyId, TenantId};

use super::{PostgresIdentityStore, audit_cols, col, id_col, map_sqlx_error, opt_i64, opt_id_col, wire_col};
use crate::store::{LoginPolicyStore, StoreResult};

const POLICY_COLUMNS: &str = "id, tenant_id, target_id, policy_type, method, value, reason, \
    created_at, created_by, updated_at, updated_by";

fn policy_from_row(row: &PgRow) -> StoreResult<LoginPolicy> {
    Ok(LoginPolicy {
        id: id_col(row, "id")?,
        tenant_id: id_col(row, "tenant_id")?,
        target_id: opt_id_col(row, "target_id")?,
        policy_type: wire_col(row, "policy_type")?,
        method: wire_col(row, "method")?,
        value: col(row, "value")?,
        reason: col(row, "reason")?,
        audit: audit_cols(row)?,
    })
}

#[async_trait]
impl LoginPolicyStore for PostgresIdentityStore {
    #[instrument(skip(self, policy), fields(tenant_id = %policy.tenant_id), err)]
    async fn create_login_policy(&self, policy: NewLoginPolicy) -> StoreResult<LoginPolicy> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO login_policies (tenant_id, target_id, policy_type, method, value, reason, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {POLICY_COLUMNS}
            "#
        ))
        .bind(i64::from(policy.tenant_id))
        .bind(opt_i64(policy.target_id))
        .bind(policy.policy_type.as_str())
        .bind(policy.method.as_str())
        .bind(policy.value.trim())
        .bind(&policy.reason)
        .bind(opt_i64(policy.created_by))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_login_policy", e))?;
        policy_from_row(&row)
    }

    /// The tenant's own rules plus platform-wide ones.
    #[instrument(skip(self), err)]
    async fn list_login_policies(&self, tenant_id: TenantId) -> StoreResult<Vec<LoginPolicy>> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM login_policies WHERE tenant_id = $1 OR tenant_id = $2 ORDER BY id"
        ))
        .bind(i64::from(tenant_id))
        .bind(i64::from(TenantId::PLATFORM))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_login_policies", e))?;
        rows.iter().map(policy_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn delete_login_policy(&self, id: LoginPolicyId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM login_policies WHERE id = $1")
            .bind(i64::from(id))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_login_policy", e))?;
        Ok(result.rows_affected() > 0)
    }
}
