//! PostgreSQL certificate store and sequence counter

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::FromRow;
use tracing::instrument;

use crate::domain::{
    hash_to_hex, ApplicationId, CertificateNumber, CertificateRecord, DisplaySnapshot, Hash256,
    ProviderId,
};
use crate::infra::{
    map_db_error, CertificateSequence, CertificateStore, RegistryError, Result,
};

use super::hash_from_column;

const SELECT_COLUMNS: &str = r#"
    SELECT certificate_hash, provider_id, application_id, certificate_number,
           issued_date, expiry_date, verification_score, is_active,
           artifact_location, ledger_tx_reference, qr_payload, snapshot
    FROM certificates
"#;

#[derive(Debug, FromRow)]
struct CertificateRow {
    certificate_hash: Vec<u8>,
    provider_id: i64,
    application_id: i64,
    certificate_number: String,
    issued_date: DateTime<Utc>,
    expiry_date: DateTime<Utc>,
    verification_score: i16,
    is_active: bool,
    artifact_location: Option<String>,
    ledger_tx_reference: Vec<u8>,
    qr_payload: String,
    snapshot: Json<DisplaySnapshot>,
}

impl TryFrom<CertificateRow> for CertificateRecord {
    type Error = RegistryError;

    fn try_from(row: CertificateRow) -> Result<Self> {
        let certificate_number: CertificateNumber = row
            .certificate_number
            .parse()
            .map_err(RegistryError::Internal)?;

        Ok(CertificateRecord {
            certificate_hash: hash_from_column(row.certificate_hash, "certificate_hash")?,
            provider_id: ProviderId(row.provider_id as u64),
            application_id: ApplicationId(row.application_id as u64),
            certificate_number,
            issued_date: row.issued_date,
            expiry_date: row.expiry_date,
            verification_score: u8::try_from(row.verification_score).map_err(|_| {
                RegistryError::Internal(format!(
                    "stored score out of range: {}",
                    row.verification_score
                ))
            })?,
            is_active: row.is_active,
            artifact_location: row.artifact_location,
            ledger_tx_reference: hash_from_column(row.ledger_tx_reference, "ledger_tx_reference")?,
            qr_payload: row.qr_payload,
            snapshot: row.snapshot.0,
        })
    }
}

/// PostgreSQL-backed [`CertificateStore`]
#[derive(Clone)]
pub struct PgCertificateStore {
    pool: PgPool,
}

impl PgCertificateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CertificateStore for PgCertificateStore {
    #[instrument(skip(self, record), fields(
        provider_id = %record.provider_id,
        certificate_number = %record.certificate_number,
    ))]
    async fn insert(&self, record: &CertificateRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO certificates (
                certificate_hash, provider_id, application_id, certificate_number,
                issued_date, expiry_date, verification_score, is_active,
                artifact_location, ledger_tx_reference, qr_payload, snapshot
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&record.certificate_hash[..])
        .bind(record.provider_id.as_u64() as i64)
        .bind(record.application_id.as_u64() as i64)
        .bind(record.certificate_number.to_string())
        .bind(record.issued_date)
        .bind(record.expiry_date)
        .bind(record.verification_score as i16)
        .bind(record.is_active)
        .bind(&record.artifact_location)
        .bind(&record.ledger_tx_reference[..])
        .bind(&record.qr_payload)
        .bind(Json(&record.snapshot))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn get_by_hash(&self, certificate_hash: &Hash256) -> Result<Option<CertificateRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE certificate_hash = $1");
        let row = sqlx::query_as::<_, CertificateRow>(&sql)
            .bind(&certificate_hash[..])
            .fetch_optional(&self.pool)
            .await?;
        row.map(CertificateRecord::try_from).transpose()
    }

    async fn get_by_provider(&self, provider_id: ProviderId) -> Result<Option<CertificateRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE provider_id = $1");
        let row = sqlx::query_as::<_, CertificateRow>(&sql)
            .bind(provider_id.as_u64() as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CertificateRecord::try_from).transpose()
    }

    async fn get_by_number(
        &self,
        number: &CertificateNumber,
    ) -> Result<Option<CertificateRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE certificate_number = $1");
        let row = sqlx::query_as::<_, CertificateRow>(&sql)
            .bind(number.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(CertificateRecord::try_from).transpose()
    }

    #[instrument(skip(self), fields(certificate_hash = %hash_to_hex(certificate_hash)))]
    async fn set_active(&self, certificate_hash: &Hash256, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE certificates SET is_active = $2 WHERE certificate_hash = $1")
            .bind(&certificate_hash[..])
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_artifact_location(
        &self,
        certificate_hash: &Hash256,
        location: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE certificates SET artifact_location = $2 WHERE certificate_hash = $1")
            .bind(&certificate_hash[..])
            .bind(location)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_missing_artifacts(&self, limit: usize) -> Result<Vec<CertificateRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE artifact_location IS NULL ORDER BY issued_date ASC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, CertificateRow>(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(CertificateRecord::try_from).collect()
    }
}

/// Counter rows in `certificate_sequences`, one per (region, prefix, year).
///
/// A single upsert both creates and increments the row, so concurrent
/// callers serialize on the row lock and each reads back its own value.
#[derive(Clone)]
pub struct PgCertificateSequence {
    pool: PgPool,
}

impl PgCertificateSequence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CertificateSequence for PgCertificateSequence {
    #[instrument(skip(self))]
    async fn next(&self, region: &str, prefix: &str, year: i32) -> Result<u32> {
        let row: (i32,) = sqlx::query_as(
            r#"
            INSERT INTO certificate_sequences (region, prefix, year, current_value, updated_at)
            VALUES ($1, $2, $3, 1, NOW())
            ON CONFLICT (region, prefix, year)
            DO UPDATE SET
                current_value = certificate_sequences.current_value + 1,
                updated_at = NOW()
            RETURNING current_value
            "#,
        )
        .bind(region)
        .bind(prefix)
        .bind(year)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0 as u32)
    }
}
