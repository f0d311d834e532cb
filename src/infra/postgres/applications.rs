//! PostgreSQL application store
//!
//! The partial unique index `applications_active_identity_idx` enforces one
//! pending-or-approved row per identity hash. Transitions are conditional
//! updates (`WHERE status = 'pending'`), so two concurrent approvals cannot
//! both move the same row, and a rejection cannot overtake a live approval
//! claim (`approval_started_at`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::FromRow;
use tracing::instrument;

use crate::domain::{
    ApplicationFields, ApplicationId, ApplicationRecord, ApplicationStatistics, ApplicationStatus,
    Approval, Hash256, ProviderId, Rejection, VendorId, VendorType,
};
use crate::infra::{map_db_error, ApplicationStore, RegistryError, Result};

use super::hash_from_column;

const SELECT_COLUMNS: &str = r#"
    SELECT application_id, identity_hash, application_data_hash, documents_hash,
           payment_reference, vendor_type, vendor_id, status,
           submitted_at, approved_at, provider_id, verifier_notes,
           verification_score, rejected_at, rejection_reason, approval_started_at,
           fields
    FROM applications
"#;

#[derive(Debug, FromRow)]
struct ApplicationRow {
    application_id: i64,
    identity_hash: Vec<u8>,
    application_data_hash: Vec<u8>,
    documents_hash: Vec<u8>,
    payment_reference: String,
    vendor_type: String,
    vendor_id: String,
    status: String,
    submitted_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
    provider_id: Option<i64>,
    verifier_notes: Option<String>,
    verification_score: Option<i16>,
    rejected_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    approval_started_at: Option<DateTime<Utc>>,
    fields: Json<ApplicationFields>,
}

impl TryFrom<ApplicationRow> for ApplicationRecord {
    type Error = RegistryError;

    fn try_from(row: ApplicationRow) -> Result<Self> {
        let vendor_type: VendorType = row.vendor_type.parse().map_err(RegistryError::Internal)?;
        let status: ApplicationStatus = row.status.parse().map_err(RegistryError::Internal)?;
        let verification_score = row
            .verification_score
            .map(|s| {
                u8::try_from(s)
                    .map_err(|_| RegistryError::Internal(format!("stored score out of range: {s}")))
            })
            .transpose()?;

        Ok(ApplicationRecord {
            application_id: ApplicationId(row.application_id as u64),
            identity_hash: hash_from_column(row.identity_hash, "identity_hash")?,
            application_data_hash: hash_from_column(
                row.application_data_hash,
                "application_data_hash",
            )?,
            documents_hash: hash_from_column(row.documents_hash, "documents_hash")?,
            payment_reference: row.payment_reference,
            vendor_type,
            vendor_id: VendorId(row.vendor_id),
            status,
            submitted_at: row.submitted_at,
            approved_at: row.approved_at,
            provider_id: row.provider_id.map(|id| ProviderId(id as u64)),
            verifier_notes: row.verifier_notes,
            verification_score,
            rejected_at: row.rejected_at,
            rejection_reason: row.rejection_reason,
            approval_started_at: row.approval_started_at,
            fields: row.fields.0,
        })
    }
}

/// PostgreSQL-backed [`ApplicationStore`]
#[derive(Clone)]
pub struct PgApplicationStore {
    pool: PgPool,
}

impl PgApplicationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        bind: i64,
    ) -> Result<Option<ApplicationRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE {clause}");
        let row = sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ApplicationRecord::try_from).transpose()
    }
}

#[async_trait]
impl ApplicationStore for PgApplicationStore {
    #[instrument(skip(self, record), fields(application_id = %record.application_id))]
    async fn insert(&self, record: &ApplicationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO applications (
                application_id, identity_hash, application_data_hash, documents_hash,
                payment_reference, vendor_type, vendor_id, status, submitted_at, fields
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.application_id.as_u64() as i64)
        .bind(&record.identity_hash[..])
        .bind(&record.application_data_hash[..])
        .bind(&record.documents_hash[..])
        .bind(&record.payment_reference)
        .bind(record.vendor_type.as_str())
        .bind(record.vendor_id.as_str())
        .bind(record.status.as_str())
        .bind(record.submitted_at)
        .bind(Json(&record.fields))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn get(&self, application_id: ApplicationId) -> Result<Option<ApplicationRecord>> {
        self.fetch_one_where("application_id = $1", application_id.as_u64() as i64)
            .await
    }

    async fn find_active_by_identity(
        &self,
        identity_hash: &Hash256,
    ) -> Result<Option<ApplicationRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE identity_hash = $1 AND status IN ('pending', 'approved')"
        );
        let row = sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(&identity_hash[..])
            .fetch_optional(&self.pool)
            .await?;
        row.map(ApplicationRecord::try_from).transpose()
    }

    async fn find_by_provider(&self, provider_id: ProviderId) -> Result<Option<ApplicationRecord>> {
        self.fetch_one_where("provider_id = $1", provider_id.as_u64() as i64)
            .await
    }

    #[instrument(skip(self, approval), fields(provider_id = %approval.provider_id))]
    async fn mark_approved(
        &self,
        application_id: ApplicationId,
        approval: &Approval,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE applications
            SET status = 'approved',
                provider_id = $2,
                approved_at = $3,
                verifier_notes = $4,
                verification_score = $5,
                approval_started_at = NULL
            WHERE application_id = $1 AND status = 'pending'
            "#,
        )
        .bind(application_id.as_u64() as i64)
        .bind(approval.provider_id.as_u64() as i64)
        .bind(approval.approved_at)
        .bind(&approval.notes)
        .bind(approval.score as i16)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get(application_id).await? {
            Some(_) => Ok(false),
            None => Err(RegistryError::ApplicationNotFound(application_id)),
        }
    }

    #[instrument(skip(self))]
    async fn begin_approval(
        &self,
        application_id: ApplicationId,
        started_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE applications
            SET approval_started_at = $2
            WHERE application_id = $1 AND status = 'pending'
            "#,
        )
        .bind(application_id.as_u64() as i64)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get(application_id).await? {
            Some(_) => Ok(false),
            None => Err(RegistryError::ApplicationNotFound(application_id)),
        }
    }

    #[instrument(skip(self))]
    async fn cancel_approval(
        &self,
        application_id: ApplicationId,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE applications
            SET approval_started_at = NULL
            WHERE application_id = $1 AND status = 'pending' AND approval_started_at = $2
            "#,
        )
        .bind(application_id.as_u64() as i64)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    #[instrument(skip(self, rejection))]
    async fn mark_rejected(
        &self,
        application_id: ApplicationId,
        rejection: &Rejection,
        claim_cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE applications
            SET status = 'rejected',
                rejected_at = $2,
                rejection_reason = $3,
                approval_started_at = NULL
            WHERE application_id = $1
              AND status = 'pending'
              AND (approval_started_at IS NULL OR approval_started_at < $4)
            "#,
        )
        .bind(application_id.as_u64() as i64)
        .bind(rejection.rejected_at)
        .bind(&rejection.reason)
        .bind(claim_cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get(application_id).await? {
            Some(_) => Ok(false),
            None => Err(RegistryError::ApplicationNotFound(application_id)),
        }
    }

    async fn list(&self, status: Option<ApplicationStatus>) -> Result<Vec<ApplicationRecord>> {
        let rows = match status {
            Some(status) => {
                let sql = format!("{SELECT_COLUMNS} WHERE status = $1 ORDER BY submitted_at ASC");
                sqlx::query_as::<_, ApplicationRow>(&sql)
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("{SELECT_COLUMNS} ORDER BY submitted_at ASC");
                sqlx::query_as::<_, ApplicationRow>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(ApplicationRecord::try_from).collect()
    }

    async fn statistics(&self) -> Result<ApplicationStatistics> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM applications GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = ApplicationStatistics::default();
        for (status, count) in rows {
            match status.parse::<ApplicationStatus>() {
                Ok(ApplicationStatus::Pending) => stats.pending = count as u64,
                Ok(ApplicationStatus::Approved) => stats.approved = count as u64,
                Ok(ApplicationStatus::Rejected) => stats.rejected = count as u64,
                Err(e) => tracing::warn!(error = %e, "Ignoring unknown status in statistics"),
            }
        }
        Ok(stats)
    }
}
