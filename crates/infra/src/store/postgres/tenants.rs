//! Tenants and the tenant bootstrap transaction.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgConnection;
use sqlx::postgres::PgRow;
use tracing::{info, instrument};

use windcms_auth::{MembershipStatus, NewTenant, RelationKind, Tenant, Window};
use windcms_core::TenantId;

use super::{
    PostgresIdentityStore, audit_cols, col, id_col, map_sqlx_error, opt_i64, opt_id_col, roles,
    relations, users, wire_col,
};
use crate::store::{
    BootstrappedTenant, EdgeSet, MembershipUpsert, NewRoleRecord, StoreResult, TenantBootstrap,
    TenantStore,
};

const TENANT_COLUMNS: &str = "id, code, name, status, tenant_type, audit_status, admin_user_id, \
    subscription_plan, subscription_at, unsubscribe_at, expired_at, \
    created_at, created_by, updated_at, updated_by";

fn tenant_from_row(row: &PgRow) -> StoreResult<Tenant> {
    Ok(Tenant {
        id: id_col(row, "id")?,
        code: col(row, "code")?,
        name: col(row, "name")?,
        status: wire_col(row, "status")?,
        tenant_type: wire_col(row, "tenant_type")?,
        audit_status: wire_col(row, "audit_status")?,
        admin_user_id: opt_id_col(row, "admin_user_id")?,
        subscription_plan: col(row, "subscription_plan")?,
        subscription_at: col(row, "subscription_at")?,
        unsubscribe_at: col(row, "unsubscribe_at")?,
        expired_at: col(row, "expired_at")?,
        audit: audit_cols(row)?,
    })
}

async fn insert_tenant(conn: &mut PgConnection, tenant: NewTenant) -> StoreResult<Tenant> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO tenants (
            code, name, status, tenant_type, audit_status,
            subscription_plan, subscription_at, expired_at, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {TENANT_COLUMNS}
        "#
    ))
    .bind(tenant.code.trim())
    .bind(&tenant.name)
    .bind(tenant.status.as_str())
    .bind(tenant.tenant_type.as_str())
    .bind(tenant.audit_status.as_str())
    .bind(&tenant.subscription_plan)
    .bind(tenant.subscription_at)
    .bind(tenant.expired_at)
    .bind(opt_i64(tenant.created_by))
    .fetch_one(conn)
    .await
    .map_err(|e| map_sqlx_error("insert_tenant", e))?;
    tenant_from_row(&row)
}

#[async_trait]
impl TenantStore for PostgresIdentityStore {
    #[instrument(skip(self, tenant), fields(code = %tenant.code), err)]
    async fn create_tenant(&self, tenant: NewTenant) -> StoreResult<Tenant> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        insert_tenant(&mut conn, tenant).await
    }

    #[instrument(skip(self), err)]
    async fn get_tenant(&self, id: TenantId) -> StoreResult<Option<Tenant>> {
        let row = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1"))
            .bind(i64::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_tenant", e))?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_tenant_by_code(&self, code: &str) -> StoreResult<Option<Tenant>> {
        let row = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE code = $1"))
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_tenant_by_code", e))?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>> {
        let rows = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM tenants ORDER BY id"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_tenants", e))?;
        rows.iter().map(tenant_from_row).collect()
    }

    /// Any failing step rolls the whole bootstrap back: the transaction is
    /// dropped without commit.
    #[instrument(skip(self, bootstrap), fields(code = %bootstrap.tenant.code), err)]
    async fn bootstrap_tenant(&self, bootstrap: TenantBootstrap) -> StoreResult<BootstrappedTenant> {
        let TenantBootstrap {
            tenant,
            mut admin,
            mut credential,
            mut admin_role,
            admin_role_metadata,
            template_role_id,
            relation,
        } = bootstrap;
        let now = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let tenant = insert_tenant(&mut tx, tenant).await?;

        let permission_ids = roles::permission_ids_for_role(&mut tx, template_role_id).await?;
        admin_role.tenant_id = tenant.id;
        let (role, _) = roles::insert_role(
            &mut tx,
            NewRoleRecord {
                draft: admin_role,
                metadata: admin_role_metadata,
                permission_ids,
            },
        )
        .await?;

        admin.tenant_id = tenant.id;
        let user = users::insert_user(&mut tx, admin).await?;

        credential.user_id = user.id;
        credential.tenant_id = tenant.id;
        users::insert_credential(&mut tx, credential).await?;

        let edges = EdgeSet {
            tenant_id: tenant.id,
            targets: vec![(RelationKind::Role, role.id.get(), true)],
            status: MembershipStatus::Active,
            window: Window::open(now),
            operator: user.audit.created_by,
        };
        if relation.uses_memberships() {
            let upsert = MembershipUpsert {
                tenant_id: tenant.id,
                user_id: user.id,
                role_id: Some(role.id),
                position_id: None,
                org_unit_id: None,
                status: MembershipStatus::Active,
                is_primary: true,
                window: Window::open(now),
                operator: user.audit.created_by,
            };
            relations::upsert_membership(&mut tx, &upsert, &edges).await?;
        } else {
            relations::replace_user_edges(&mut tx, user.id, &edges).await?;
        }

        let row = sqlx::query(&format!(
            "UPDATE tenants SET admin_user_id = $2 WHERE id = $1 RETURNING {TENANT_COLUMNS}"
        ))
        .bind(i64::from(tenant.id))
        .bind(i64::from(user.id))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_tenant_admin", e))?;
        let tenant = tenant_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        info!(tenant_id = %tenant.id, admin_user_id = %user.id, role_id = %role.id, "tenant bootstrapped");
        Ok(BootstrappedTenant {
            tenant,
            admin: user,
            role,
        })
    }
}
