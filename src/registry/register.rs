//! Application register
//!
//! Submission, approval and rejection of vendor applications. Submission and
//! approval are ledger-first: the local record is only written once the
//! ledger has confirmed the id it assigned.
//!
//! An approval claims the pending record before its ledger write. A rejection
//! refuses a claimed record unless the ledger shows no approval and the claim
//! is older than `approval_claim_ttl`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::coordinator::{run_to_completion, Coordinator, PendingProjection, ProjectionOutcome};
use super::RegistryConfig;
use crate::crypto::{compute_content_hash, compute_documents_hash};
use crate::domain::{
    hash256_hex_0x, hash256_vec_hex_0x, ApplicationFields, ApplicationId, ApplicationRecord,
    ApplicationStatistics, ApplicationStatus, Approval, Clock, Hash256, PaymentReceipt,
    ProviderId, Rejection, VendorId, VendorType, MAX_VERIFICATION_SCORE,
};
use crate::infra::{ApplicationStore, PaymentVerifier, RegistryError, Result};
use crate::ledger::{with_timeout, LedgerClient, LedgerError, NewLedgerApplication};
use crate::metrics::{metric_names, MetricsRegistry};

/// A vendor's registration submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitApplication {
    pub vendor_id: VendorId,
    #[serde(with = "hash256_hex_0x")]
    pub identity_hash: Hash256,
    pub vendor_type: VendorType,
    pub fields: ApplicationFields,
    /// Per-file digests from the document store, in submission order
    #[serde(with = "hash256_vec_hex_0x")]
    pub document_digests: Vec<Hash256>,
    pub payment_receipt: PaymentReceipt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedApplication {
    pub application_id: ApplicationId,
    pub projection: ProjectionOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedApplication {
    pub application_id: ApplicationId,
    pub provider_id: ProviderId,
    pub projection: ProjectionOutcome,
}

/// State machine over vendor application records
#[derive(Clone)]
pub struct ApplicationRegister {
    config: Arc<RegistryConfig>,
    applications: Arc<dyn ApplicationStore>,
    ledger: Arc<dyn LedgerClient>,
    payments: Arc<dyn PaymentVerifier>,
    coordinator: Arc<Coordinator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
}

impl ApplicationRegister {
    pub fn new(
        config: Arc<RegistryConfig>,
        applications: Arc<dyn ApplicationStore>,
        ledger: Arc<dyn LedgerClient>,
        payments: Arc<dyn PaymentVerifier>,
        coordinator: Arc<Coordinator>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            applications,
            ledger,
            payments,
            coordinator,
            clock,
            metrics,
        }
    }

    /// Validate, register on the ledger, then record locally.
    #[tracing::instrument(
        skip(self, request),
        fields(vendor_id = %request.vendor_id, vendor_type = %request.vendor_type)
    )]
    pub async fn submit(&self, request: SubmitApplication) -> Result<SubmittedApplication> {
        validate_submission(&request)?;

        if self
            .applications
            .find_active_by_identity(&request.identity_hash)
            .await?
            .is_some()
        {
            self.metrics
                .inc_counter(metric_names::DUPLICATE_IDENTITIES)
                .await;
            return Err(RegistryError::DuplicateIdentity);
        }
        if let Some(parked) = self
            .coordinator
            .parked_application(&request.identity_hash)
            .await?
        {
            tracing::warn!(
                application_id = %parked.application_id,
                "Identity held by an application awaiting repair"
            );
            self.metrics
                .inc_counter(metric_names::DUPLICATE_IDENTITIES)
                .await;
            return Err(RegistryError::DuplicateIdentity);
        }

        request
            .payment_receipt
            .check_covers(self.config.min_registration_fee)
            .map_err(RegistryError::PaymentInvalid)?;
        self.payments.verify(&request.payment_receipt).await?;

        let this = self.clone();
        run_to_completion(async move { this.register_and_record(request).await }).await
    }

    async fn register_and_record(&self, request: SubmitApplication) -> Result<SubmittedApplication> {
        let content_hash = compute_content_hash(&request.fields);
        let documents_hash = compute_documents_hash(&request.document_digests);

        let ledger_request = NewLedgerApplication {
            identity_hash: request.identity_hash,
            content_hash,
            documents_hash,
            vendor_type: request.vendor_type,
            payment_reference: request.payment_receipt.payment_id.clone(),
        };

        let application_id = self
            .coordinator
            .ledger_write(
                "register_application",
                || self.ledger.register_application(&ledger_request),
                || self.find_registration(&ledger_request),
            )
            .await?;

        let record = ApplicationRecord {
            application_id,
            identity_hash: request.identity_hash,
            application_data_hash: content_hash,
            documents_hash,
            payment_reference: ledger_request.payment_reference.clone(),
            vendor_type: request.vendor_type,
            vendor_id: request.vendor_id,
            status: ApplicationStatus::Pending,
            submitted_at: self.clock.now(),
            approved_at: None,
            provider_id: None,
            verifier_notes: None,
            verification_score: None,
            rejected_at: None,
            rejection_reason: None,
            approval_started_at: None,
            fields: request.fields,
        };

        let projection = match self
            .coordinator
            .project(PendingProjection::Application(record))
            .await
        {
            Ok(outcome) => outcome,
            Err(RegistryError::UniqueViolation(constraint)) => {
                // Lost a race with a concurrent submission for the same identity.
                tracing::warn!(
                    application_id = %application_id,
                    constraint = %constraint,
                    "Ledger accepted an application whose identity is already active locally"
                );
                self.metrics
                    .inc_counter(metric_names::DUPLICATE_IDENTITIES)
                    .await;
                return Err(RegistryError::DuplicateIdentity);
            }
            Err(err) => return Err(err),
        };

        self.metrics
            .inc_counter(metric_names::APPLICATIONS_SUBMITTED)
            .await;
        tracing::info!(
            application_id = %application_id,
            projection = ?projection,
            "Application submitted"
        );

        Ok(SubmittedApplication {
            application_id,
            projection,
        })
    }

    /// The ledger entry for this exact submission, if it landed.
    ///
    /// An entry that is already projected locally belongs to an earlier
    /// submission with identical content, not to this one.
    async fn find_registration(
        &self,
        request: &NewLedgerApplication,
    ) -> std::result::Result<Option<ApplicationId>, LedgerError> {
        let Some(found) = self.ledger.find_application(&request.identity_hash).await? else {
            return Ok(None);
        };
        if !found.matches(request) || found.processed {
            return Ok(None);
        }
        match self.applications.get(found.application_id).await {
            Ok(None) => Ok(Some(found.application_id)),
            Ok(Some(_)) => Ok(None),
            Err(err) => Err(LedgerError::Ambiguous(format!("local lookup failed: {err}"))),
        }
    }

    /// Approve a pending application on the ledger, then locally.
    #[tracing::instrument(skip(self, notes), fields(application_id = %application_id))]
    pub async fn approve(
        &self,
        application_id: ApplicationId,
        notes: String,
        score: i64,
    ) -> Result<ApprovedApplication> {
        let record = self.get(application_id).await?;
        if !record.status.can_transition_to(ApplicationStatus::Approved) {
            return Err(RegistryError::InvalidTransition {
                application_id,
                from: record.status,
                to: ApplicationStatus::Approved,
            });
        }

        let score = u8::try_from(score)
            .ok()
            .filter(|s| *s <= MAX_VERIFICATION_SCORE)
            .ok_or(RegistryError::InvalidScore(score))?;

        let this = self.clone();
        run_to_completion(async move { this.approve_and_record(application_id, notes, score).await })
            .await
    }

    async fn approve_and_record(
        &self,
        application_id: ApplicationId,
        notes: String,
        score: u8,
    ) -> Result<ApprovedApplication> {
        let started_at = self.clock.now();
        if !self
            .applications
            .begin_approval(application_id, started_at)
            .await?
        {
            let current = self.get(application_id).await?;
            return Err(RegistryError::InvalidTransition {
                application_id,
                from: current.status,
                to: ApplicationStatus::Approved,
            });
        }

        let provider_id = match self
            .coordinator
            .ledger_write(
                "approve_application",
                || self.ledger.approve_application(application_id, &notes, score),
                || self.ledger.find_provider(application_id),
            )
            .await
        {
            Ok(provider_id) => provider_id,
            // The write may have landed; the claim stays until the ledger says otherwise.
            Err(err @ RegistryError::OutcomeUnknown(_)) => return Err(err),
            Err(err) => {
                self.release_claim(application_id, started_at).await;
                return Err(err);
            }
        };

        let approval = Approval {
            provider_id,
            approved_at: self.clock.now(),
            notes,
            score,
        };

        let projection = self
            .coordinator
            .project(PendingProjection::Approval {
                application_id,
                approval,
            })
            .await
            .inspect_err(|err| {
                tracing::error!(
                    application_id = %application_id,
                    provider_id = %provider_id,
                    error = %err,
                    "Approval confirmed on the ledger but not recorded locally"
                );
            })?;

        self.metrics
            .inc_counter(metric_names::APPLICATIONS_APPROVED)
            .await;
        tracing::info!(
            application_id = %application_id,
            provider_id = %provider_id,
            score,
            "Application approved"
        );

        Ok(ApprovedApplication {
            application_id,
            provider_id,
            projection,
        })
    }

    async fn release_claim(&self, application_id: ApplicationId, started_at: DateTime<Utc>) {
        if let Err(err) = self
            .applications
            .cancel_approval(application_id, started_at)
            .await
        {
            tracing::warn!(
                application_id = %application_id,
                error = %err,
                "Approval claim not released, it lapses after the claim ttl"
            );
        }
    }

    /// Reject a pending application. Local only, the ledger keeps no rejections.
    #[tracing::instrument(skip(self, reason), fields(application_id = %application_id))]
    pub async fn reject(&self, application_id: ApplicationId, reason: &str) -> Result<()> {
        let record = self.get(application_id).await?;
        if !record.status.can_transition_to(ApplicationStatus::Rejected) {
            return Err(RegistryError::InvalidTransition {
                application_id,
                from: record.status,
                to: ApplicationStatus::Rejected,
            });
        }

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(RegistryError::Validation(
                "a rejection reason is required".to_string(),
            ));
        }

        let now = self.clock.now();
        let claim_cutoff = now - self.config.approval_claim_ttl;
        if record.approval_started_at.is_some() {
            self.ensure_not_approved_on_ledger(&record, claim_cutoff)
                .await?;
        }

        let rejection = Rejection {
            rejected_at: now,
            reason: reason.to_string(),
        };
        if !self
            .applications
            .mark_rejected(application_id, &rejection, claim_cutoff)
            .await?
        {
            // Claimed or moved out of pending since the read above.
            let current = self.get(application_id).await?;
            if current.approval_in_flight(claim_cutoff) {
                return Err(RegistryError::ApprovalInFlight(application_id));
            }
            return Err(RegistryError::InvalidTransition {
                application_id,
                from: current.status,
                to: ApplicationStatus::Rejected,
            });
        }

        self.metrics
            .inc_counter(metric_names::APPLICATIONS_REJECTED)
            .await;
        tracing::info!(application_id = %application_id, "Application rejected");
        Ok(())
    }

    /// Refuse to reject a record whose approval may still land.
    async fn ensure_not_approved_on_ledger(
        &self,
        record: &ApplicationRecord,
        claim_cutoff: DateTime<Utc>,
    ) -> Result<()> {
        let application_id = record.application_id;
        let found = with_timeout(
            self.config.ledger_call_timeout,
            self.ledger.find_provider(application_id),
        )
        .await;

        match found {
            Ok(Some(provider_id)) => {
                tracing::warn!(
                    application_id = %application_id,
                    provider_id = %provider_id,
                    "Rejection refused, the ledger already approved this application"
                );
                Err(RegistryError::ApprovalInFlight(application_id))
            }
            Ok(None) if record.approval_in_flight(claim_cutoff) => {
                Err(RegistryError::ApprovalInFlight(application_id))
            }
            Ok(None) => {
                tracing::info!(
                    application_id = %application_id,
                    "Stale approval claim with no ledger approval, rejecting"
                );
                Ok(())
            }
            Err(_) if record.approval_in_flight(claim_cutoff) => {
                Err(RegistryError::ApprovalInFlight(application_id))
            }
            Err(err) => Err(RegistryError::LedgerUnavailable(err.to_string())),
        }
    }

    pub async fn get(&self, application_id: ApplicationId) -> Result<ApplicationRecord> {
        self.applications
            .get(application_id)
            .await?
            .ok_or(RegistryError::ApplicationNotFound(application_id))
    }

    /// Admin review queue, optionally filtered by status
    pub async fn list(&self, status: Option<ApplicationStatus>) -> Result<Vec<ApplicationRecord>> {
        self.applications.list(status).await
    }

    pub async fn statistics(&self) -> Result<ApplicationStatistics> {
        self.applications.statistics().await
    }
}

fn validate_submission(request: &SubmitApplication) -> Result<()> {
    if request.vendor_id.as_str().trim().is_empty() {
        return Err(RegistryError::Validation("vendor id is required".to_string()));
    }

    let declared = request.fields.vendor_type();
    if declared != request.vendor_type {
        return Err(RegistryError::Validation(format!(
            "fields describe {declared} but the application is for {}",
            request.vendor_type
        )));
    }

    let missing = request.fields.missing_fields();
    if !missing.is_empty() {
        return Err(RegistryError::Validation(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    }

    if request.document_digests.is_empty() {
        return Err(RegistryError::Validation(
            "at least one document is required".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommonFields, FixedClock, GuideFields, TransportFields};
    use crate::infra::{
        InMemoryApplicationStore, InMemoryCertificateStore, InMemoryRepairStore,
        MockPaymentVerifier, ReceiptShapeVerifier, RetryConfig,
    };
    use crate::ledger::memory::{InMemoryLedger, LedgerFault, LedgerOp};
    use chrono::TimeZone;
    use std::time::Duration;

    struct Harness {
        register: ApplicationRegister,
        ledger: Arc<InMemoryLedger>,
        applications: Arc<InMemoryApplicationStore>,
    }

    fn harness_with(payments: Arc<dyn PaymentVerifier>) -> Harness {
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()));
        let metrics = Arc::new(MetricsRegistry::new());
        let applications = Arc::new(InMemoryApplicationStore::new());
        let ledger = Arc::new(InMemoryLedger::new().with_clock(clock.clone()));
        let config = Arc::new(RegistryConfig {
            ledger_retry: RetryConfig::fast().with_jitter(0.0),
            local_retry: RetryConfig::fast().with_jitter(0.0),
            ledger_call_timeout: Duration::from_millis(500),
            ..RegistryConfig::default()
        });
        let coordinator = Arc::new(Coordinator::new(
            applications.clone(),
            Arc::new(InMemoryCertificateStore::new()),
            Arc::new(InMemoryRepairStore::new()),
            config.ledger_retry.clone(),
            config.local_retry.clone(),
            config.ledger_call_timeout,
            clock.clone(),
            metrics.clone(),
        ));
        let register = ApplicationRegister::new(
            config,
            applications.clone(),
            ledger.clone(),
            payments,
            coordinator,
            clock,
            metrics,
        );
        Harness {
            register,
            ledger,
            applications,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(ReceiptShapeVerifier))
    }

    fn guide_fields() -> ApplicationFields {
        ApplicationFields::Guide(GuideFields {
            common: CommonFields {
                full_name: "Asha Munda".to_string(),
                email: "asha@example.com".to_string(),
                phone: "+91-9000000000".to_string(),
                address: "Main Road".to_string(),
                city: "Ranchi".to_string(),
                state: "Jharkhand".to_string(),
                description: "Waterfall treks".to_string(),
            },
            experience: "5 years".to_string(),
            specialization: "trekking".to_string(),
            languages: vec!["hi".to_string()],
            certifications: String::new(),
            emergency_contact: "112".to_string(),
            photo_ref: Some("photos/asha.jpg".to_string()),
        })
    }

    fn submission(identity: u8, payment_id: &str, amount: u64) -> SubmitApplication {
        SubmitApplication {
            vendor_id: VendorId::new("user_1"),
            identity_hash: [identity; 32],
            vendor_type: VendorType::Guide,
            fields: guide_fields(),
            document_digests: vec![[7; 32], [8; 32]],
            payment_receipt: PaymentReceipt {
                payment_id: payment_id.to_string(),
                order_id: "order_1".to_string(),
                signature: "sig".to_string(),
                amount,
            },
        }
    }

    #[tokio::test]
    async fn test_submit_records_ledger_id() {
        let h = harness();
        let submitted = h.register.submit(submission(1, "pay_1", 10_000)).await.unwrap();

        assert_eq!(submitted.application_id, ApplicationId(101));
        assert_eq!(submitted.projection, ProjectionOutcome::Applied);

        let record = h.register.get(ApplicationId(101)).await.unwrap();
        assert_eq!(record.status, ApplicationStatus::Pending);
        assert_eq!(record.application_data_hash, compute_content_hash(&guide_fields()));
        assert!(record.is_consistent());
    }

    #[tokio::test]
    async fn test_duplicate_identity_is_refused_before_ledger() {
        let h = harness();
        h.register.submit(submission(1, "pay_1", 10_000)).await.unwrap();

        let again = h.register.submit(submission(1, "pay_2", 10_000)).await;
        assert!(matches!(again, Err(RegistryError::DuplicateIdentity)));
        assert_eq!(h.ledger.call_count(LedgerOp::Register).await, 1);
    }

    #[tokio::test]
    async fn test_underpayment_is_refused() {
        let h = harness();
        let result = h.register.submit(submission(1, "pay_1", 9_999)).await;
        assert!(matches!(result, Err(RegistryError::PaymentInvalid(_))));
        assert_eq!(h.ledger.call_count(LedgerOp::Register).await, 0);
    }

    #[tokio::test]
    async fn test_gateway_refusal_is_payment_invalid() {
        let mut payments = MockPaymentVerifier::new();
        payments
            .expect_verify()
            .returning(|_| Err(RegistryError::PaymentInvalid("bad signature".into())));
        let h = harness_with(Arc::new(payments));

        let result = h.register.submit(submission(1, "pay_1", 10_000)).await;
        assert!(matches!(result, Err(RegistryError::PaymentInvalid(_))));
    }

    #[tokio::test]
    async fn test_mismatched_vendor_type_is_validation_error() {
        let h = harness();
        let mut request = submission(1, "pay_1", 10_000);
        request.vendor_type = VendorType::Transportation;
        assert!(matches!(
            h.register.submit(request).await,
            Err(RegistryError::Validation(_))
        ));

        let mut missing = submission(2, "pay_2", 10_000);
        missing.fields = ApplicationFields::Transportation(TransportFields {
            common: guide_fields().common().clone(),
            license_number: String::new(),
            vehicle_type: "bus".to_string(),
            vehicle_registration: "JH01AB1234".to_string(),
            seating_capacity: 40,
        });
        missing.vendor_type = VendorType::Transportation;
        assert!(matches!(
            h.register.submit(missing).await,
            Err(RegistryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_ledger_down_leaves_no_local_record() {
        let h = harness();
        h.ledger.set_reachable(false);

        let result = h.register.submit(submission(1, "pay_1", 10_000)).await;
        assert!(matches!(result, Err(RegistryError::LedgerUnavailable(_))));
        assert!(h.applications.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_after_apply_reconciles_without_resubmitting() {
        let h = harness();
        h.ledger
            .inject_fault(LedgerOp::Register, LedgerFault::TimeoutAfterApply)
            .await;

        let submitted = h.register.submit(submission(1, "pay_1", 10_000)).await.unwrap();
        assert_eq!(submitted.application_id, ApplicationId(101));
        assert_eq!(h.ledger.call_count(LedgerOp::Register).await, 1);
    }

    #[tokio::test]
    async fn test_approve_and_reject_transitions() {
        let h = harness();
        h.register.submit(submission(1, "pay_1", 10_000)).await.unwrap();
        h.register.submit(submission(2, "pay_2", 10_000)).await.unwrap();

        assert!(matches!(
            h.register.approve(ApplicationId(101), "ok".into(), 101).await,
            Err(RegistryError::InvalidScore(101))
        ));
        assert!(matches!(
            h.register.approve(ApplicationId(101), "ok".into(), -1).await,
            Err(RegistryError::InvalidScore(-1))
        ));

        let approved = h
            .register
            .approve(ApplicationId(101), "documents verified".into(), 85)
            .await
            .unwrap();
        assert_eq!(approved.provider_id, ProviderId(501));

        assert!(matches!(
            h.register.reject(ApplicationId(101), "late").await,
            Err(RegistryError::InvalidTransition { .. })
        ));
        assert!(matches!(
            h.register.reject(ApplicationId(102), "  ").await,
            Err(RegistryError::Validation(_))
        ));
        h.register.reject(ApplicationId(102), "blurry documents").await.unwrap();
        assert!(matches!(
            h.register.approve(ApplicationId(102), "ok".into(), 50).await,
            Err(RegistryError::InvalidTransition { .. })
        ));
        assert!(matches!(
            h.register.approve(ApplicationId(999), "ok".into(), 50).await,
            Err(RegistryError::ApplicationNotFound(_))
        ));

        let stats = h.register.statistics().await.unwrap();
        assert_eq!((stats.pending, stats.approved, stats.rejected), (0, 1, 1));
    }

    #[tokio::test]
    async fn test_rejected_identity_may_resubmit() {
        let h = harness();
        h.register.submit(submission(1, "pay_1", 10_000)).await.unwrap();
        h.register.reject(ApplicationId(101), "incomplete").await.unwrap();

        let again = h.register.submit(submission(1, "pay_2", 10_000)).await.unwrap();
        assert_eq!(again.application_id, ApplicationId(102));
    }

    #[tokio::test]
    async fn test_concurrent_approvals_agree_on_provider() {
        let h = harness();
        h.register.submit(submission(1, "pay_1", 10_000)).await.unwrap();

        let a = h.register.clone();
        let b = h.register.clone();
        let (first, second) = tokio::join!(
            a.approve(ApplicationId(101), "ok".into(), 80),
            b.approve(ApplicationId(101), "ok".into(), 80),
        );

        let providers: Vec<ProviderId> = [first, second]
            .into_iter()
            .filter_map(|r| r.ok().map(|a| a.provider_id))
            .collect();
        assert!(!providers.is_empty());
        assert!(providers.iter().all(|p| *p == ProviderId(501)));

        let on_ledger = h.ledger.find_provider(ApplicationId(101)).await.unwrap();
        let record = h.register.get(ApplicationId(101)).await.unwrap();
        assert_eq!(record.status, ApplicationStatus::Approved);
        assert_eq!(record.provider_id, on_ledger);
        assert!(record.approval_started_at.is_none());
        assert!(record.is_consistent());
    }

    #[tokio::test]
    async fn test_claimed_record_cannot_be_rejected() {
        let h = harness();
        h.register.submit(submission(1, "pay_1", 10_000)).await.unwrap();
        let now = h.register.clock.now();
        assert!(h
            .applications
            .begin_approval(ApplicationId(101), now)
            .await
            .unwrap());

        assert!(matches!(
            h.register.reject(ApplicationId(101), "blurry").await,
            Err(RegistryError::ApprovalInFlight(ApplicationId(101)))
        ));
        let record = h.register.get(ApplicationId(101)).await.unwrap();
        assert_eq!(record.status, ApplicationStatus::Pending);
    }

    #[tokio::test]
    async fn test_stale_claim_without_ledger_approval_allows_reject() {
        let h = harness();
        h.register.submit(submission(1, "pay_1", 10_000)).await.unwrap();
        let long_ago = h.register.clock.now() - chrono::Duration::hours(1);
        h.applications
            .begin_approval(ApplicationId(101), long_ago)
            .await
            .unwrap();

        h.register.reject(ApplicationId(101), "abandoned").await.unwrap();
        let record = h.register.get(ApplicationId(101)).await.unwrap();
        assert_eq!(record.status, ApplicationStatus::Rejected);
    }

    #[tokio::test]
    async fn test_stale_claim_with_ledger_approval_refuses_reject() {
        let h = harness();
        h.register.submit(submission(1, "pay_1", 10_000)).await.unwrap();
        h.ledger
            .approve_application(ApplicationId(101), "ok", 80)
            .await
            .unwrap();
        let long_ago = h.register.clock.now() - chrono::Duration::hours(1);
        h.applications
            .begin_approval(ApplicationId(101), long_ago)
            .await
            .unwrap();

        assert!(matches!(
            h.register.reject(ApplicationId(101), "late").await,
            Err(RegistryError::ApprovalInFlight(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_ledger_releases_claim() {
        let h = harness();
        h.register.submit(submission(1, "pay_1", 10_000)).await.unwrap();
        h.ledger.set_reachable(false);

        assert!(matches!(
            h.register.approve(ApplicationId(101), "ok".into(), 80).await,
            Err(RegistryError::LedgerUnavailable(_))
        ));
        let record = h.register.get(ApplicationId(101)).await.unwrap();
        assert!(record.approval_started_at.is_none());

        h.ledger.set_reachable(true);
        h.register.reject(ApplicationId(101), "withdrawn").await.unwrap();
    }
}
