//! PostgreSQL repair log
//!
//! Parked projections survive restarts. `(kind, projection_key)` is unique, so
//! parking the same projection twice keeps the original entry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::FromRow;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::{
    ApplicationRecord, CertificateRecord, Hash256, PendingProjection, ProviderId, RepairEntry,
};
use crate::infra::{map_db_error, RegistryError, RepairStore, Result};

const SELECT_COLUMNS: &str = r#"
    SELECT id, projection, error_message, retry_count, last_retry_at, created_at
    FROM repair_entries
"#;

#[derive(Debug, FromRow)]
struct RepairRow {
    id: Uuid,
    projection: Json<PendingProjection>,
    error_message: String,
    retry_count: i32,
    last_retry_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<RepairRow> for RepairEntry {
    fn from(row: RepairRow) -> Self {
        RepairEntry {
            id: row.id,
            projection: row.projection.0,
            error_message: row.error_message,
            retry_count: row.retry_count.max(0) as u32,
            last_retry_at: row.last_retry_at,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL-backed [`RepairStore`]
#[derive(Clone)]
pub struct PgRepairStore {
    pool: PgPool,
}

impl PgRepairStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_projection(
        &self,
        clause: &str,
        bind: Vec<u8>,
    ) -> Result<Option<PendingProjection>> {
        let sql = format!("{SELECT_COLUMNS} WHERE {clause} ORDER BY created_at ASC LIMIT 1");
        let row = sqlx::query_as::<_, RepairRow>(&sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.projection.0))
    }
}

#[async_trait]
impl RepairStore for PgRepairStore {
    #[instrument(skip(self, entry), fields(repair_id = %entry.id, kind = entry.projection.kind()))]
    async fn record(&self, entry: &RepairEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO repair_entries (
                id, kind, projection_key, identity_hash, provider_id, projection,
                error_message, retry_count, last_retry_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (kind, projection_key) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(entry.projection.kind())
        .bind(entry.projection.key())
        .bind(entry.projection.identity_hash().map(|h| h.to_vec()))
        .bind(entry.projection.provider_id().map(|p| p.as_u64() as i64))
        .bind(Json(&entry.projection))
        .bind(&entry.error_message)
        .bind(entry.retry_count as i32)
        .bind(entry.last_retry_at)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<RepairEntry>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY created_at ASC");
        let rows = sqlx::query_as::<_, RepairRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(RepairEntry::from).collect())
    }

    async fn update(&self, entry: &RepairEntry) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE repair_entries
            SET retry_count = $2, last_retry_at = $3, error_message = $4
            WHERE id = $1
            "#,
        )
        .bind(entry.id)
        .bind(entry.retry_count as i32)
        .bind(entry.last_retry_at)
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM repair_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM repair_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 as u64)
    }

    async fn find_certificate(&self, provider_id: ProviderId) -> Result<Option<CertificateRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE kind = 'certificate' AND provider_id = $1 \
             ORDER BY created_at ASC LIMIT 1"
        );
        let row = sqlx::query_as::<_, RepairRow>(&sql)
            .bind(provider_id.as_u64() as i64)
            .fetch_optional(&self.pool)
            .await?;

        match row.map(|r| r.projection.0) {
            None => Ok(None),
            Some(PendingProjection::Certificate(record)) => Ok(Some(record)),
            Some(other) => Err(RegistryError::Internal(format!(
                "repair entry for provider {provider_id} holds a {} projection",
                other.kind()
            ))),
        }
    }

    async fn find_application(&self, identity_hash: &Hash256) -> Result<Option<ApplicationRecord>> {
        match self
            .find_projection("kind = 'application' AND identity_hash = $1", identity_hash.to_vec())
            .await?
        {
            None => Ok(None),
            Some(PendingProjection::Application(record)) => Ok(Some(record)),
            Some(other) => Err(RegistryError::Internal(format!(
                "repair entry for an identity holds a {} projection",
                other.kind()
            ))),
        }
    }
}
