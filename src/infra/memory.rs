//! In-memory stores for development and testing
//!
//! Enforce the same uniqueness rules as the PostgreSQL schema: one active
//! application per identity hash, unique provider ids, and unique
//! certificate hash / provider / number.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::{
    ApplicationId, ApplicationRecord, ApplicationStatistics, ApplicationStatus, Approval,
    CertificateNumber, CertificateRecord, Hash256, PendingProjection, ProviderId, Rejection,
    RepairEntry,
};
use crate::infra::{
    ApplicationStore, CertificateSequence, CertificateStore, RegistryError, RepairStore, Result,
};

/// Injected write failures, each one looks like a pool timeout.
#[derive(Debug, Default)]
struct WriteFaults {
    remaining: AtomicUsize,
}

impl WriteFaults {
    fn arm(&self, count: usize) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(RegistryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

// ============================================================================
// Applications
// ============================================================================

/// In-memory [`ApplicationStore`]
#[derive(Default)]
pub struct InMemoryApplicationStore {
    records: RwLock<BTreeMap<ApplicationId, ApplicationRecord>>,
    faults: WriteFaults,
}

impl InMemoryApplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with a transient database error.
    pub fn fail_next_writes(&self, count: usize) {
        self.faults.arm(count);
    }
}

#[async_trait]
impl ApplicationStore for InMemoryApplicationStore {
    async fn insert(&self, record: &ApplicationRecord) -> Result<()> {
        self.faults.check()?;
        let mut records = self.records.write().await;

        if records.contains_key(&record.application_id) {
            return Err(RegistryError::UniqueViolation("applications_pkey".into()));
        }
        let identity_taken = records.values().any(|r| {
            r.identity_hash == record.identity_hash && r.status.holds_identity()
        });
        if record.status.holds_identity() && identity_taken {
            return Err(RegistryError::UniqueViolation(
                "applications_active_identity_idx".into(),
            ));
        }

        records.insert(record.application_id, record.clone());
        Ok(())
    }

    async fn get(&self, application_id: ApplicationId) -> Result<Option<ApplicationRecord>> {
        Ok(self.records.read().await.get(&application_id).cloned())
    }

    async fn find_active_by_identity(
        &self,
        identity_hash: &Hash256,
    ) -> Result<Option<ApplicationRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.identity_hash == *identity_hash && r.status.holds_identity())
            .cloned())
    }

    async fn find_by_provider(&self, provider_id: ProviderId) -> Result<Option<ApplicationRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.provider_id == Some(provider_id))
            .cloned())
    }

    async fn mark_approved(
        &self,
        application_id: ApplicationId,
        approval: &Approval,
    ) -> Result<bool> {
        self.faults.check()?;
        let mut records = self.records.write().await;

        let provider_taken = records.values().any(|r| {
            r.application_id != application_id && r.provider_id == Some(approval.provider_id)
        });
        let record = records
            .get_mut(&application_id)
            .ok_or(RegistryError::ApplicationNotFound(application_id))?;
        if record.status != ApplicationStatus::Pending {
            return Ok(false);
        }
        if provider_taken {
            return Err(RegistryError::UniqueViolation(
                "applications_provider_id_key".into(),
            ));
        }

        Ok(record.apply_approval(approval).is_ok())
    }

    async fn begin_approval(
        &self,
        application_id: ApplicationId,
        started_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.faults.check()?;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&application_id)
            .ok_or(RegistryError::ApplicationNotFound(application_id))?;
        if record.status != ApplicationStatus::Pending {
            return Ok(false);
        }
        record.approval_started_at = Some(started_at);
        Ok(true)
    }

    async fn cancel_approval(
        &self,
        application_id: ApplicationId,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        self.faults.check()?;
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&application_id) {
            if record.status == ApplicationStatus::Pending
                && record.approval_started_at == Some(started_at)
            {
                record.approval_started_at = None;
            }
        }
        Ok(())
    }

    async fn mark_rejected(
        &self,
        application_id: ApplicationId,
        rejection: &Rejection,
        claim_cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        self.faults.check()?;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&application_id)
            .ok_or(RegistryError::ApplicationNotFound(application_id))?;
        if record.approval_in_flight(claim_cutoff) {
            return Ok(false);
        }
        Ok(record.apply_rejection(rejection).is_ok())
    }

    async fn list(&self, status: Option<ApplicationStatus>) -> Result<Vec<ApplicationRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.submitted_at, r.application_id));
        Ok(matching)
    }

    async fn statistics(&self) -> Result<ApplicationStatistics> {
        let records = self.records.read().await;
        let mut stats = ApplicationStatistics::default();
        for record in records.values() {
            match record.status {
                ApplicationStatus::Pending => stats.pending += 1,
                ApplicationStatus::Approved => stats.approved += 1,
                ApplicationStatus::Rejected => stats.rejected += 1,
            }
        }
        Ok(stats)
    }
}

// ============================================================================
// Certificates
// ============================================================================

/// In-memory [`CertificateStore`]
#[derive(Default)]
pub struct InMemoryCertificateStore {
    records: RwLock<HashMap<Hash256, CertificateRecord>>,
    faults: WriteFaults,
}

impl InMemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with a transient database error.
    pub fn fail_next_writes(&self, count: usize) {
        self.faults.arm(count);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CertificateStore for InMemoryCertificateStore {
    async fn insert(&self, record: &CertificateRecord) -> Result<()> {
        self.faults.check()?;
        let mut records = self.records.write().await;

        if records.contains_key(&record.certificate_hash) {
            return Err(RegistryError::UniqueViolation("certificates_pkey".into()));
        }
        for existing in records.values() {
            if existing.provider_id == record.provider_id {
                return Err(RegistryError::UniqueViolation(
                    "certificates_provider_id_key".into(),
                ));
            }
            if existing.certificate_number == record.certificate_number {
                return Err(RegistryError::UniqueViolation(
                    "certificates_certificate_number_key".into(),
                ));
            }
        }

        records.insert(record.certificate_hash, record.clone());
        Ok(())
    }

    async fn get_by_hash(&self, certificate_hash: &Hash256) -> Result<Option<CertificateRecord>> {
        Ok(self.records.read().await.get(certificate_hash).cloned())
    }

    async fn get_by_provider(&self, provider_id: ProviderId) -> Result<Option<CertificateRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.provider_id == provider_id)
            .cloned())
    }

    async fn get_by_number(
        &self,
        number: &CertificateNumber,
    ) -> Result<Option<CertificateRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.certificate_number == *number)
            .cloned())
    }

    async fn set_active(&self, certificate_hash: &Hash256, active: bool) -> Result<bool> {
        self.faults.check()?;
        let mut records = self.records.write().await;
        match records.get_mut(certificate_hash) {
            Some(record) => {
                record.is_active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_artifact_location(
        &self,
        certificate_hash: &Hash256,
        location: &str,
    ) -> Result<()> {
        self.faults.check()?;
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(certificate_hash) {
            record.artifact_location = Some(location.to_string());
        }
        Ok(())
    }

    async fn list_missing_artifacts(&self, limit: usize) -> Result<Vec<CertificateRecord>> {
        let records = self.records.read().await;
        let mut missing: Vec<_> = records
            .values()
            .filter(|r| r.artifact_location.is_none())
            .cloned()
            .collect();
        missing.sort_by_key(|r| r.issued_date);
        missing.truncate(limit);
        Ok(missing)
    }
}

// ============================================================================
// Repair log
// ============================================================================

/// In-memory [`RepairStore`]
#[derive(Default)]
pub struct InMemoryRepairStore {
    entries: RwLock<Vec<RepairEntry>>,
    faults: WriteFaults,
}

impl InMemoryRepairStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with a transient database error.
    pub fn fail_next_writes(&self, count: usize) {
        self.faults.arm(count);
    }
}

#[async_trait]
impl RepairStore for InMemoryRepairStore {
    async fn record(&self, entry: &RepairEntry) -> Result<()> {
        self.faults.check()?;
        let mut entries = self.entries.write().await;
        let kind = entry.projection.kind();
        let key = entry.projection.key();
        if !entries
            .iter()
            .any(|e| e.projection.kind() == kind && e.projection.key() == key)
        {
            entries.push(entry.clone());
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RepairEntry>> {
        Ok(self.entries.read().await.clone())
    }

    async fn update(&self, entry: &RepairEntry) -> Result<()> {
        self.faults.check()?;
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) {
            existing.retry_count = entry.retry_count;
            existing.last_retry_at = entry.last_retry_at;
            existing.error_message = entry.error_message.clone();
        }
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        self.faults.check()?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() < before)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.read().await.len() as u64)
    }

    async fn find_certificate(&self, provider_id: ProviderId) -> Result<Option<CertificateRecord>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find_map(|e| match &e.projection {
            PendingProjection::Certificate(record) if record.provider_id == provider_id => {
                Some(record.clone())
            }
            _ => None,
        }))
    }

    async fn find_application(&self, identity_hash: &Hash256) -> Result<Option<ApplicationRecord>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find_map(|e| match &e.projection {
            PendingProjection::Application(record) if record.identity_hash == *identity_hash => {
                Some(record.clone())
            }
            _ => None,
        }))
    }
}

// ============================================================================
// Sequence
// ============================================================================

/// In-memory [`CertificateSequence`]
#[derive(Default)]
pub struct InMemoryCertificateSequence {
    counters: Mutex<HashMap<(String, String, i32), u32>>,
}

impl InMemoryCertificateSequence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CertificateSequence for InMemoryCertificateSequence {
    async fn next(&self, region: &str, prefix: &str, year: i32) -> Result<u32> {
        let mut counters = self.counters.lock().await;
        let counter = counters
            .entry((region.to_string(), prefix.to_string(), year))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}
