//! In-process ledger for development and testing
//!
//! Mirrors the registry contract: ids start at fixed offsets and grow by
//! one, approvals and certificate generation are idempotent per key, and a
//! payment reference can be spent once. Faults can be queued per operation
//! to exercise the coordinator's reconciliation paths.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{
    LedgerApplication, LedgerCertificate, LedgerClient, LedgerError, LedgerResult,
    LedgerStatistics, LedgerVerification, NewLedgerApplication, ProviderDetails,
};
use crate::crypto::{compute_certificate_hash, sha256};
use crate::domain::{
    ApplicationId, Clock, Hash256, ProviderId, SystemClock, MAX_VERIFICATION_SCORE,
};

/// Ledger operations that can carry an injected fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    Register,
    Approve,
    Issue,
    ProviderDetails,
    Verify,
}

/// Injected failure mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerFault {
    /// Fail before touching state
    Unavailable,
    /// Apply the write, then report a timeout
    TimeoutAfterApply,
    /// Report a timeout without applying anything
    TimeoutBeforeApply,
    /// Apply the write, then report a lost receipt
    AmbiguousAfterApply,
}

#[derive(Debug, Clone)]
struct ApplicationEntry {
    record: LedgerApplication,
}

#[derive(Debug, Clone)]
struct ProviderEntry {
    details: ProviderDetails,
    identity_hash: Hash256,
}

#[derive(Debug, Clone)]
struct CertificateEntry {
    certificate: LedgerCertificate,
    issued_date: DateTime<Utc>,
}

#[derive(Debug)]
struct LedgerState {
    next_application_id: u64,
    next_provider_id: u64,
    next_tx: u64,
    applications: BTreeMap<u64, ApplicationEntry>,
    latest_by_identity: HashMap<Hash256, u64>,
    used_payments: HashSet<String>,
    providers: BTreeMap<u64, ProviderEntry>,
    provider_by_application: HashMap<u64, u64>,
    certificates: HashMap<u64, CertificateEntry>,
    faults: HashMap<LedgerOp, VecDeque<LedgerFault>>,
    calls: HashMap<LedgerOp, u64>,
}

impl LedgerState {
    fn next_tx_hash(&mut self) -> Hash256 {
        self.next_tx += 1;
        sha256(format!("ledger-tx-{}", self.next_tx).as_bytes())
    }

    fn take_fault(&mut self, op: LedgerOp) -> Option<LedgerFault> {
        *self.calls.entry(op).or_insert(0) += 1;
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }
}

/// In-memory [`LedgerClient`]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    reachable: AtomicBool,
    validity: ChronoDuration,
    clock: Arc<dyn Clock>,
}

impl InMemoryLedger {
    /// Ledger numbering application ids from 101 and provider ids from 501
    pub fn new() -> Self {
        Self::with_start_ids(101, 501)
    }

    pub fn with_start_ids(first_application_id: u64, first_provider_id: u64) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                next_application_id: first_application_id,
                next_provider_id: first_provider_id,
                next_tx: 0,
                applications: BTreeMap::new(),
                latest_by_identity: HashMap::new(),
                used_payments: HashSet::new(),
                providers: BTreeMap::new(),
                provider_by_application: HashMap::new(),
                certificates: HashMap::new(),
                faults: HashMap::new(),
                calls: HashMap::new(),
            }),
            reachable: AtomicBool::new(true),
            validity: ChronoDuration::days(365),
            clock: Arc::new(SystemClock),
        }
    }

    /// Certification validity period applied at approval
    pub fn with_validity(mut self, validity: ChronoDuration) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Queue a fault for the next call of `op`.
    pub async fn inject_fault(&self, op: LedgerOp, fault: LedgerFault) {
        let mut state = self.state.lock().await;
        state.faults.entry(op).or_default().push_back(fault);
    }

    /// Toggle reachability for every operation.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of calls made to `op`, faulted ones included
    pub async fn call_count(&self, op: LedgerOp) -> u64 {
        let state = self.state.lock().await;
        state.calls.get(&op).copied().unwrap_or(0)
    }

    /// Deactivate a provider on the ledger side.
    pub async fn suspend_provider(&self, provider_id: ProviderId) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        let entry = state
            .providers
            .get_mut(&provider_id.as_u64())
            .ok_or_else(|| LedgerError::NotFound(format!("provider {provider_id}")))?;
        entry.details.is_active = false;
        Ok(())
    }

    fn ensure_reachable(&self) -> LedgerResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LedgerError::Unavailable("ledger node unreachable".into()))
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a fault into (fail before apply, error to report after apply).
fn fault_plan(fault: Option<LedgerFault>) -> (Option<LedgerError>, Option<LedgerError>) {
    match fault {
        None => (None, None),
        Some(LedgerFault::Unavailable) => {
            (Some(LedgerError::Unavailable("injected fault".into())), None)
        }
        Some(LedgerFault::TimeoutBeforeApply) => {
            (Some(LedgerError::Timeout(Duration::from_secs(30))), None)
        }
        Some(LedgerFault::TimeoutAfterApply) => {
            (None, Some(LedgerError::Timeout(Duration::from_secs(30))))
        }
        Some(LedgerFault::AmbiguousAfterApply) => {
            (None, Some(LedgerError::Ambiguous("receipt lost".into())))
        }
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn register_application(
        &self,
        application: &NewLedgerApplication,
    ) -> LedgerResult<ApplicationId> {
        self.ensure_reachable()?;
        let mut state = self.state.lock().await;
        let (before, after) = fault_plan(state.take_fault(LedgerOp::Register));
        if let Some(err) = before {
            return Err(err);
        }

        if application.payment_reference.trim().is_empty() {
            return Err(LedgerError::Rejected("payment reference required".into()));
        }
        if state.used_payments.contains(&application.payment_reference) {
            return Err(LedgerError::Conflict("payment already used".into()));
        }

        let id = state.next_application_id;
        state.next_application_id += 1;
        state.used_payments.insert(application.payment_reference.clone());
        state.latest_by_identity.insert(application.identity_hash, id);
        state.applications.insert(
            id,
            ApplicationEntry {
                record: LedgerApplication {
                    application_id: ApplicationId(id),
                    identity_hash: application.identity_hash,
                    content_hash: application.content_hash,
                    documents_hash: application.documents_hash,
                    vendor_type: application.vendor_type,
                    payment_reference: application.payment_reference.clone(),
                    submitted_at: self.clock.now(),
                    processed: false,
                },
            },
        );

        match after {
            Some(err) => Err(err),
            None => Ok(ApplicationId(id)),
        }
    }

    async fn approve_application(
        &self,
        application_id: ApplicationId,
        _notes: &str,
        score: u8,
    ) -> LedgerResult<ProviderId> {
        self.ensure_reachable()?;
        let mut state = self.state.lock().await;
        let (before, after) = fault_plan(state.take_fault(LedgerOp::Approve));
        if let Some(err) = before {
            return Err(err);
        }

        if score > MAX_VERIFICATION_SCORE {
            return Err(LedgerError::Rejected(format!("invalid score {score}")));
        }
        let (identity_hash, vendor_type) = match state.applications.get(&application_id.as_u64()) {
            Some(entry) => (entry.record.identity_hash, entry.record.vendor_type),
            None => return Err(LedgerError::NotFound(format!("application {application_id}"))),
        };

        if let Some(existing) = state.provider_by_application.get(&application_id.as_u64()) {
            return Ok(ProviderId(*existing));
        }

        let provider_id = state.next_provider_id;
        state.next_provider_id += 1;
        let now = self.clock.now();
        state.provider_by_application.insert(application_id.as_u64(), provider_id);
        if let Some(entry) = state.applications.get_mut(&application_id.as_u64()) {
            entry.record.processed = true;
        }
        state.providers.insert(
            provider_id,
            ProviderEntry {
                details: ProviderDetails {
                    provider_id: ProviderId(provider_id),
                    application_id,
                    vendor_type,
                    registration_date: now,
                    expiry_date: now + self.validity,
                    is_active: true,
                    verification_score: score,
                },
                identity_hash,
            },
        );

        match after {
            Some(err) => Err(err),
            None => Ok(ProviderId(provider_id)),
        }
    }

    async fn issue_certificate(&self, provider_id: ProviderId) -> LedgerResult<LedgerCertificate> {
        self.ensure_reachable()?;
        let mut state = self.state.lock().await;
        let (before, after) = fault_plan(state.take_fault(LedgerOp::Issue));
        if let Some(err) = before {
            return Err(err);
        }

        if !state.providers.contains_key(&provider_id.as_u64()) {
            return Err(LedgerError::NotFound(format!("provider {provider_id}")));
        }
        if let Some(existing) = state.certificates.get(&provider_id.as_u64()) {
            return Ok(existing.certificate.clone());
        }

        let sequence = state.certificates.len() as u64 + 1;
        let certificate = LedgerCertificate {
            certificate_hash: compute_certificate_hash(provider_id.as_u64(), sequence),
            tx_hash: state.next_tx_hash(),
        };
        state.certificates.insert(
            provider_id.as_u64(),
            CertificateEntry {
                certificate: certificate.clone(),
                issued_date: self.clock.now(),
            },
        );

        match after {
            Some(err) => Err(err),
            None => Ok(certificate),
        }
    }

    async fn get_provider_details(&self, provider_id: ProviderId) -> LedgerResult<ProviderDetails> {
        self.ensure_reachable()?;
        let mut state = self.state.lock().await;
        let (before, _) = fault_plan(state.take_fault(LedgerOp::ProviderDetails));
        if let Some(err) = before {
            return Err(err);
        }

        state
            .providers
            .get(&provider_id.as_u64())
            .map(|entry| entry.details.clone())
            .ok_or_else(|| LedgerError::NotFound(format!("provider {provider_id}")))
    }

    async fn verify_certificate(
        &self,
        identity_hash: &Hash256,
    ) -> LedgerResult<Option<LedgerVerification>> {
        self.ensure_reachable()?;
        let mut state = self.state.lock().await;
        let (before, _) = fault_plan(state.take_fault(LedgerOp::Verify));
        if let Some(err) = before {
            return Err(err);
        }

        let provider = state
            .providers
            .values()
            .filter(|entry| entry.identity_hash == *identity_hash)
            .max_by_key(|entry| entry.details.provider_id);
        let Some(provider) = provider else {
            return Ok(None);
        };

        let provider_id = provider.details.provider_id;
        let certificate = state.certificates.get(&provider_id.as_u64());
        let now = self.clock.now();
        let is_valid = provider.details.is_active
            && now <= provider.details.expiry_date
            && certificate.is_some();

        Ok(Some(LedgerVerification {
            is_valid,
            provider_id,
            certificate_hash: certificate.map(|c| c.certificate.certificate_hash),
            issued_date: certificate.map(|c| c.issued_date),
            expiry_date: provider.details.expiry_date,
        }))
    }

    async fn find_application(
        &self,
        identity_hash: &Hash256,
    ) -> LedgerResult<Option<LedgerApplication>> {
        self.ensure_reachable()?;
        let state = self.state.lock().await;
        Ok(state
            .latest_by_identity
            .get(identity_hash)
            .and_then(|id| state.applications.get(id))
            .map(|entry| entry.record.clone()))
    }

    async fn find_provider(
        &self,
        application_id: ApplicationId,
    ) -> LedgerResult<Option<ProviderId>> {
        self.ensure_reachable()?;
        let state = self.state.lock().await;
        Ok(state
            .provider_by_application
            .get(&application_id.as_u64())
            .map(|id| ProviderId(*id)))
    }

    async fn find_certificate(
        &self,
        provider_id: ProviderId,
    ) -> LedgerResult<Option<LedgerCertificate>> {
        self.ensure_reachable()?;
        let state = self.state.lock().await;
        Ok(state
            .certificates
            .get(&provider_id.as_u64())
            .map(|entry| entry.certificate.clone()))
    }

    async fn statistics(&self) -> LedgerResult<LedgerStatistics> {
        self.ensure_reachable()?;
        let state = self.state.lock().await;
        Ok(LedgerStatistics {
            total_applications: state.applications.len() as u64,
            total_approvals: state.provider_by_application.len() as u64,
            total_providers: state.providers.len() as u64,
            total_certificates: state.certificates.len() as u64,
        })
    }
}
