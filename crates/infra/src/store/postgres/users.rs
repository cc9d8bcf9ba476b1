//! Users and credentials.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use sqlx::postgres::PgRow;
use tracing::instrument;

use windcms_auth::{Credential, IdentityType, NewCredential, NewUser, User};
use windcms_core::{CredentialId, TenantId, UserId};

use super::{
    PostgresIdentityStore, audit_cols, col, id_col, map_sqlx_error, opt_i64, wire_col,
};
use crate::store::{CredentialStore, StoreError, StoreResult, UserStore};

const USER_COLUMNS: &str = "id, tenant_id, username, nickname, realname, email, mobile, avatar, \
    status, last_login_at, last_login_ip, locked_until, created_at, created_by, updated_at, updated_by";

const CREDENTIAL_COLUMNS: &str = "id, user_id, tenant_id, identity_type, identifier, credential_type, \
    credential, is_primary, status, provider, provider_account_id, created_at, created_by, updated_at, updated_by";

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    Ok(User {
        id: id_col(row, "id")?,
        tenant_id: id_col(row, "tenant_id")?,
        username: col(row, "username")?,
        nickname: col(row, "nickname")?,
        realname: col(row, "realname")?,
        email: col(row, "email")?,
        mobile: col(row, "mobile")?,
        avatar: col(row, "avatar")?,
        status: wire_col(row, "status")?,
        last_login_at: col(row, "last_login_at")?,
        last_login_ip: col(row, "last_login_ip")?,
        locked_until: col(row, "locked_until")?,
        audit: audit_cols(row)?,
    })
}

fn credential_from_row(row: &PgRow) -> StoreResult<Credential> {
    Ok(Credential {
        id: id_col(row, "id")?,
        user_id: id_col(row, "user_id")?,
        tenant_id: id_col(row, "tenant_id")?,
        identity_type: wire_col(row, "identity_type")?,
        identifier: col(row, "identifier")?,
        credential_type: wire_col(row, "credential_type")?,
        credential: col(row, "credential")?,
        is_primary: col(row, "is_primary")?,
        status: wire_col(row, "status")?,
        provider: col(row, "provider")?,
        provider_account_id: col(row, "provider_account_id")?,
        audit: audit_cols(row)?,
    })
}

pub(super) async fn insert_user(conn: &mut PgConnection, user: NewUser) -> StoreResult<User> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO users (tenant_id, username, nickname, realname, email, mobile, status, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(i64::from(user.tenant_id))
    .bind(user.username.trim())
    .bind(&user.nickname)
    .bind(&user.realname)
    .bind(&user.email)
    .bind(&user.mobile)
    .bind(user.status.as_str())
    .bind(opt_i64(user.created_by))
    .fetch_one(conn)
    .await
    .map_err(|e| map_sqlx_error("insert_user", e))?;
    user_from_row(&row)
}

pub(super) async fn insert_credential(
    conn: &mut PgConnection,
    credential: NewCredential,
) -> StoreResult<Credential> {
    let identity_type = credential
        .identity_type
        .ok_or_else(|| StoreError::Invalid("credential requires an identity type".into()))?;
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO credentials (
            user_id, tenant_id, identity_type, identifier, credential_type, credential,
            is_primary, status, provider, provider_account_id, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {CREDENTIAL_COLUMNS}
        "#
    ))
    .bind(i64::from(credential.user_id))
    .bind(i64::from(credential.tenant_id))
    .bind(identity_type.as_str())
    .bind(&credential.identifier)
    .bind(credential.credential_type.as_str())
    .bind(&credential.secret)
    .bind(credential.is_primary)
    .bind(credential.status.as_str())
    .bind(&credential.provider)
    .bind(&credential.provider_account_id)
    .bind(opt_i64(credential.created_by))
    .fetch_one(conn)
    .await
    .map_err(|e| map_sqlx_error("insert_credential", e))?;
    credential_from_row(&row)
}

#[async_trait]
impl UserStore for PostgresIdentityStore {
    #[instrument(skip(self, user), fields(tenant_id = %user.tenant_id), err)]
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        insert_user(&mut conn, user).await
    }

    #[instrument(skip(self, user, credential), fields(tenant_id = %user.tenant_id), err)]
    async fn create_user_with_credential(
        &self,
        user: NewUser,
        mut credential: NewCredential,
    ) -> StoreResult<(User, Credential)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let user = insert_user(&mut tx, user).await?;
        credential.user_id = user.id;
        credential.tenant_id = user.tenant_id;
        let credential = insert_credential(&mut tx, credential).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok((user, credential))
    }

    #[instrument(skip(self), err)]
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(i64::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_user_by_username(&self, tenant_id: TenantId, username: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE tenant_id = $1 AND username = $2"
        ))
        .bind(i64::from(tenant_id))
        .bind(username)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user_by_username", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn username_taken(&self, username: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM users WHERE username = $1) AS taken")
            .bind(username)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("username_taken", e))?;
        col(&row, "taken")
    }

    #[instrument(skip(self), err)]
    async fn record_login(&self, id: UserId, at: DateTime<Utc>, ip: Option<String>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET last_login_at = $2, last_login_ip = $3 WHERE id = $1")
            .bind(i64::from(id))
            .bind(at)
            .bind(ip)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_login", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    /// Credentials and edges go with the row through `ON DELETE CASCADE`.
    #[instrument(skip(self), err)]
    async fn delete_user(&self, id: UserId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(i64::from(id))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CredentialStore for PostgresIdentityStore {
    #[instrument(skip(self, credential), fields(user_id = %credential.user_id), err)]
    async fn create_credential(&self, credential: NewCredential) -> StoreResult<Credential> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        insert_credential(&mut conn, credential).await
    }

    #[instrument(skip(self), err)]
    async fn get_credential(&self, id: CredentialId) -> StoreResult<Option<Credential>> {
        let row = sqlx::query(&format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = $1"))
            .bind(i64::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_credential", e))?;
        row.as_ref().map(credential_from_row).transpose()
    }

    #[instrument(skip(self, identifier), fields(identity_type = %identity_type), err)]
    async fn find_credential(
        &self,
        identity_type: IdentityType,
        identifier: &str,
    ) -> StoreResult<Option<Credential>> {
        let row = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE identity_type = $1 AND identifier = $2"
        ))
        .bind(identity_type.as_str())
        .bind(identifier)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_credential", e))?;
        row.as_ref().map(credential_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_credentials_by_user(&self, user_id: UserId) -> StoreResult<Vec<Credential>> {
        let rows = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE user_id = $1 ORDER BY id"
        ))
        .bind(i64::from(user_id))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_credentials_by_user", e))?;
        rows.iter().map(credential_from_row).collect()
    }

    #[instrument(skip(self, credential), fields(credential_id = %credential.id), err)]
    async fn update_credential(&self, credential: Credential) -> StoreResult<Credential> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE credentials SET
                identity_type = $2,
                identifier = $3,
                credential_type = $4,
                credential = $5,
                is_primary = $6,
                status = $7,
                provider = $8,
                provider_account_id = $9,
                updated_at = $10,
                updated_by = $11
            WHERE id = $1
            RETURNING {CREDENTIAL_COLUMNS}
            "#
        ))
        .bind(i64::from(credential.id))
        .bind(credential.identity_type.as_str())
        .bind(&credential.identifier)
        .bind(credential.credential_type.as_str())
        .bind(&credential.credential)
        .bind(credential.is_primary)
        .bind(credential.status.as_str())
        .bind(&credential.provider)
        .bind(&credential.provider_account_id)
        .bind(credential.audit.updated_at)
        .bind(opt_i64(credential.audit.updated_by))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_credential", e))?;
        match row {
            Some(row) => credential_from_row(&row),
            None => Err(StoreError::NotFound(format!("credential {}", credential.id))),
        }
    }

    #[instrument(skip(self, prepared), err)]
    async fn set_credential_secret(&self, id: CredentialId, prepared: String) -> StoreResult<()> {
        let result = sqlx::query("UPDATE credentials SET credential = $2, updated_at = NOW() WHERE id = $1")
            .bind(i64::from(id))
            .bind(prepared)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_credential_secret", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("credential {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, identifier), fields(identity_type = %identity_type), err)]
    async fn delete_credential_by_identifier(
        &self,
        identity_type: IdentityType,
        identifier: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE identity_type = $1 AND identifier = $2")
            .bind(identity_type.as_str())
            .bind(identifier)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_credential_by_identifier", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn delete_credentials_by_user(&self, user_id: UserId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM credentials WHERE user_id = $1")
            .bind(i64::from(user_id))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_credentials_by_user", e))?;
        Ok(result.rows_affected())
    }
}
