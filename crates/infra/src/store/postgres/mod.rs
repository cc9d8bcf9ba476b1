//! Postgres-backed identity store.
//!
//! One struct implements every aggregate trait; each aggregate's queries live
//! in their own submodule. Multi-row writes run inside a single transaction
//! and roll back on the first failure.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate username, credential identifier, code |
//! | Database (foreign key violation) | `23503` | `Invalid` | Edge or credential pointing at a missing row |
//! | Database (check constraint violation) | `23514` | `Invalid` | Out-of-range column value |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed | N/A | `Backend` | Connection pool was closed |
//! | RowNotFound | N/A | `NotFound` | `fetch_one` on a missing row |
//! | Other | N/A | `Backend` | Network errors, decode failures, etc. |
//!
//! Ids are stored as `BIGINT` and narrowed to `u32` on read; enum columns
//! hold the wire strings.

mod org;
mod permissions;
mod policies;
mod relations;
mod roles;
mod tenants;
mod users;

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tracing::instrument;

use windcms_core::{AuditFields, DomainError, UserId};

use super::{StoreError, StoreResult};

/// Schema applied by [`PostgresIdentityStore::apply_schema`].
pub const SCHEMA: &str = include_str!("../../../migrations/0001_identity.sql");

#[derive(Debug, Clone)]
pub struct PostgresIdentityStore {
    pool: Arc<PgPool>,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `url`.
    #[instrument(skip(url), err)]
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the tables when missing. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn apply_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map SQLx errors to `StoreError`.
///
/// See the module-level documentation for the complete mapping table.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(
                    db_err
                        .constraint()
                        .map(|c| format!("{c} already exists"))
                        .unwrap_or(msg),
                ),
                Some("23503") | Some("23514") => StoreError::Invalid(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row in {}", operation)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        StoreError::Backend(err.message().to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────────

fn col<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(|e| map_sqlx_error("decode_row", e))
}

fn id_col<T>(row: &PgRow, name: &str) -> StoreResult<T>
where
    T: TryFrom<i64, Error = DomainError>,
{
    Ok(T::try_from(col::<i64>(row, name)?)?)
}

fn opt_id_col<T>(row: &PgRow, name: &str) -> StoreResult<Option<T>>
where
    T: TryFrom<i64, Error = DomainError>,
{
    col::<Option<i64>>(row, name)?
        .map(T::try_from)
        .transpose()
        .map_err(StoreError::from)
}

fn u32_col(row: &PgRow, name: &str) -> StoreResult<u32> {
    let value = col::<i64>(row, name)?;
    u32::try_from(value).map_err(|_| StoreError::Backend(format!("{name}: {value} out of range")))
}

fn opt_u32_col(row: &PgRow, name: &str) -> StoreResult<Option<u32>> {
    col::<Option<i64>>(row, name)?
        .map(|v| u32::try_from(v).map_err(|_| StoreError::Backend(format!("{name}: {v} out of range"))))
        .transpose()
}

fn wire_col<T>(row: &PgRow, name: &str) -> StoreResult<T>
where
    T: FromStr<Err = DomainError>,
{
    Ok(col::<String>(row, name)?.parse()?)
}

fn audit_cols(row: &PgRow) -> StoreResult<AuditFields> {
    Ok(AuditFields {
        created_at: col::<DateTime<Utc>>(row, "created_at")?,
        created_by: opt_id_col::<UserId>(row, "created_by")?,
        updated_at: col::<Option<DateTime<Utc>>>(row, "updated_at")?,
        updated_by: opt_id_col::<UserId>(row, "updated_by")?,
    })
}

/// `Option<Id>` as a nullable `BIGINT` bind.
fn opt_i64<T: Into<i64>>(value: Option<T>) -> Option<i64> {
    value.map(Into::into)
}

fn ids_i64<T: Copy + Into<i64>>(ids: &[T]) -> Vec<i64> {
    ids.iter().map(|id| (*id).into()).collect()
}
