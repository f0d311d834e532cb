//! Certificate issuance
//!
//! One certificate per provider, minted once. The certificate hash comes from
//! the ledger, the human-readable number from an atomic per-scope counter, and
//! the local unique constraints settle any race between concurrent issuers:
//! the loser returns the winner's record.

use chrono::Datelike;
use std::sync::Arc;

use super::artifact::ArtifactPipeline;
use super::coordinator::{run_to_completion, Coordinator, PendingProjection, ProjectionOutcome};
use super::RegistryConfig;
use crate::domain::{
    hash_to_hex, ApplicationRecord, ApplicationStatus, CertificateNumber, CertificateRecord, Clock,
    DisplaySnapshot, IssuedCertificate, ProviderId,
};
use crate::infra::{
    ApplicationStore, CertificateSequence, CertificateStore, RegistryError, Result,
};
use crate::ledger::{with_timeout, LedgerClient};
use crate::metrics::{metric_names, MetricsRegistry};

#[derive(Clone)]
pub struct CertificateIssuer {
    config: Arc<RegistryConfig>,
    applications: Arc<dyn ApplicationStore>,
    certificates: Arc<dyn CertificateStore>,
    sequence: Arc<dyn CertificateSequence>,
    ledger: Arc<dyn LedgerClient>,
    coordinator: Arc<Coordinator>,
    artifacts: ArtifactPipeline,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
}

impl CertificateIssuer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<RegistryConfig>,
        applications: Arc<dyn ApplicationStore>,
        certificates: Arc<dyn CertificateStore>,
        sequence: Arc<dyn CertificateSequence>,
        ledger: Arc<dyn LedgerClient>,
        coordinator: Arc<Coordinator>,
        artifacts: ArtifactPipeline,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            applications,
            certificates,
            sequence,
            ledger,
            coordinator,
            artifacts,
            clock,
            metrics,
        }
    }

    /// Issue the provider's certificate, or return the one already issued.
    #[tracing::instrument(skip(self), fields(provider_id = %provider_id))]
    pub async fn issue(&self, provider_id: ProviderId) -> Result<IssuedCertificate> {
        if let Some(existing) = self.certificates.get_by_provider(provider_id).await? {
            return Ok(issued(&existing, false));
        }
        // Minted on the ledger, local record still owed to the repair log.
        if let Some(parked) = self.coordinator.parked_certificate(provider_id).await? {
            return Ok(issued(&parked, false));
        }

        let application = self
            .applications
            .find_by_provider(provider_id)
            .await?
            .filter(|a| a.status == ApplicationStatus::Approved)
            .ok_or(RegistryError::ProviderNotFound(provider_id))?;

        let this = self.clone();
        run_to_completion(async move { this.mint(provider_id, application).await }).await
    }

    async fn mint(
        &self,
        provider_id: ProviderId,
        application: ApplicationRecord,
    ) -> Result<IssuedCertificate> {
        let minted = self
            .coordinator
            .ledger_write(
                "issue_certificate",
                || self.ledger.issue_certificate(provider_id),
                || self.ledger.find_certificate(provider_id),
            )
            .await?;

        // A concurrent issuer may have projected the same ledger certificate already.
        if let Some(existing) = self
            .certificates
            .get_by_hash(&minted.certificate_hash)
            .await?
        {
            return Ok(issued(&existing, false));
        }
        if let Some(parked) = self.coordinator.parked_certificate(provider_id).await? {
            return Ok(issued(&parked, false));
        }

        let issued_date = self.clock.now();
        let expiry_date = self.expiry_for(provider_id, issued_date).await;

        let prefix = application.vendor_type.service_prefix();
        let year = issued_date.year();
        let sequence = self.sequence.next(&self.config.region, prefix, year).await?;
        let certificate_number =
            CertificateNumber::new(&self.config.region, application.vendor_type, year, sequence);

        let common = application.fields.common();
        let record = CertificateRecord {
            certificate_hash: minted.certificate_hash,
            provider_id,
            application_id: application.application_id,
            certificate_number,
            issued_date,
            expiry_date,
            verification_score: application.verification_score.unwrap_or_default(),
            is_active: true,
            artifact_location: None,
            ledger_tx_reference: minted.tx_hash,
            qr_payload: format!(
                "{}/{}",
                self.config.verify_base_url,
                hash_to_hex(&minted.certificate_hash)
            ),
            snapshot: DisplaySnapshot {
                full_name: common.full_name.trim().to_string(),
                city: common.city.trim().to_string(),
                vendor_type: application.vendor_type,
                service_type: application.vendor_type.display_name().to_string(),
                detail: application.fields.certificate_detail(),
            },
        };

        match self
            .coordinator
            .project(PendingProjection::Certificate(record.clone()))
            .await
        {
            Ok(ProjectionOutcome::Applied) => {
                let stored = self
                    .certificates
                    .get_by_provider(provider_id)
                    .await?
                    .ok_or_else(|| {
                        RegistryError::Internal(format!(
                            "certificate for provider {provider_id} missing after insert"
                        ))
                    })?;
                let newly_issued = stored.certificate_number == record.certificate_number;
                if newly_issued {
                    self.record_issued(&stored).await;
                    self.artifacts.enqueue(stored.clone());
                }
                Ok(issued(&stored, newly_issued))
            }
            Ok(ProjectionOutcome::Deferred) => {
                // The artifact follows once the sweep has written the record.
                self.record_issued(&record).await;
                Ok(issued(&record, true))
            }
            Err(RegistryError::UniqueViolation(constraint)) => {
                tracing::info!(
                    constraint = %constraint,
                    "Concurrent issuance won, returning its certificate"
                );
                self.certificates
                    .get_by_provider(provider_id)
                    .await?
                    .map(|existing| issued(&existing, false))
                    .ok_or(RegistryError::UniqueViolation(constraint))
            }
            Err(err) => Err(err),
        }
    }

    /// Expiry reported by the ledger, or the configured validity when it cannot say.
    async fn expiry_for(
        &self,
        provider_id: ProviderId,
        issued_date: chrono::DateTime<chrono::Utc>,
    ) -> chrono::DateTime<chrono::Utc> {
        let fallback = issued_date + self.config.certificate_validity;
        match with_timeout(
            self.config.ledger_call_timeout,
            self.ledger.get_provider_details(provider_id),
        )
        .await
        {
            Ok(details) if details.expiry_date > issued_date => details.expiry_date,
            Ok(details) => {
                tracing::warn!(
                    expiry = %details.expiry_date,
                    "Ledger expiry is not after the issue date, using configured validity"
                );
                fallback
            }
            Err(err) => {
                tracing::warn!(error = %err, "Provider details unavailable, using configured validity");
                fallback
            }
        }
    }

    async fn record_issued(&self, record: &CertificateRecord) {
        self.metrics
            .inc_counter(metric_names::CERTIFICATES_ISSUED)
            .await;
        tracing::info!(
            certificate_number = %record.certificate_number,
            certificate_hash = %hash_to_hex(&record.certificate_hash),
            expiry = %record.expiry_date,
            "Certificate issued"
        );
    }
}

fn issued(record: &CertificateRecord, newly_issued: bool) -> IssuedCertificate {
    IssuedCertificate {
        certificate_hash: record.certificate_hash,
        certificate_number: record.certificate_number.clone(),
        qr_payload: record.qr_payload.clone(),
        newly_issued,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ApplicationFields, ApplicationId, CommonFields, FixedClock, GuideFields, PaymentReceipt,
        VendorId, VendorType,
    };
    use crate::infra::{
        InMemoryApplicationStore, InMemoryCertificateSequence, InMemoryCertificateStore,
        InMemoryRepairStore, ReceiptShapeVerifier, RetryConfig,
    };
    use crate::ledger::memory::{InMemoryLedger, LedgerFault, LedgerOp};
    use crate::registry::artifact::MockArtifactStore;
    use crate::registry::{HtmlTemplateRenderer, Registry, RegistryDeps, SubmitApplication};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    struct Harness {
        registry: Registry,
        ledger: Arc<InMemoryLedger>,
        certificates: Arc<InMemoryCertificateStore>,
    }

    fn harness() -> Harness {
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()));
        let ledger = Arc::new(InMemoryLedger::new().with_clock(clock.clone()));
        let certificates = Arc::new(InMemoryCertificateStore::new());

        let mut artifact_store = MockArtifactStore::new();
        artifact_store
            .expect_put()
            .returning(|name, _, _| Ok(format!("mem://{name}")));

        let config = RegistryConfig {
            ledger_retry: RetryConfig::fast().with_jitter(0.0),
            local_retry: RetryConfig::fast().with_jitter(0.0),
            ledger_call_timeout: Duration::from_millis(500),
            ..RegistryConfig::default()
        };
        let registry = Registry::new(
            config,
            RegistryDeps {
                applications: Arc::new(InMemoryApplicationStore::new()),
                certificates: certificates.clone(),
                repairs: Arc::new(InMemoryRepairStore::new()),
                sequence: Arc::new(InMemoryCertificateSequence::new()),
                ledger: ledger.clone(),
                payments: Arc::new(ReceiptShapeVerifier),
                renderer: Arc::new(HtmlTemplateRenderer),
                artifact_store: Arc::new(artifact_store),
                clock,
                metrics: Arc::new(MetricsRegistry::new()),
            },
        );
        Harness {
            registry,
            ledger,
            certificates,
        }
    }

    async fn approved_provider(h: &Harness, identity: u8) -> ProviderId {
        let submitted = h
            .registry
            .register
            .submit(SubmitApplication {
                vendor_id: VendorId::new(format!("user_{identity}")),
                identity_hash: [identity; 32],
                vendor_type: VendorType::Guide,
                fields: ApplicationFields::Guide(GuideFields {
                    common: CommonFields {
                        full_name: " Asha Munda ".to_string(),
                        email: "asha@example.com".to_string(),
                        phone: "1".to_string(),
                        address: "Main Road".to_string(),
                        city: "Ranchi".to_string(),
                        state: String::new(),
                        description: "treks".to_string(),
                    },
                    experience: "5".to_string(),
                    specialization: "trekking".to_string(),
                    languages: vec![],
                    certifications: String::new(),
                    emergency_contact: "112".to_string(),
                    photo_ref: None,
                }),
                document_digests: vec![[identity; 32]],
                payment_receipt: PaymentReceipt {
                    payment_id: format!("pay_{identity}"),
                    order_id: "order".to_string(),
                    signature: "sig".to_string(),
                    amount: 10_000,
                },
            })
            .await
            .unwrap();
        h.registry
            .register
            .approve(submitted.application_id, "ok".into(), 85)
            .await
            .unwrap()
            .provider_id
    }

    #[tokio::test]
    async fn test_issue_formats_number_and_qr() {
        let h = harness();
        let provider = approved_provider(&h, 1).await;

        let issued = h.registry.issuer.issue(provider).await.unwrap();
        assert!(issued.newly_issued);
        assert_eq!(issued.certificate_number.to_string(), "JH-GUI-2025-001");
        assert_eq!(
            issued.qr_payload,
            format!(
                "http://localhost:8080/api/v1/verify/{}",
                hash_to_hex(&issued.certificate_hash)
            )
        );

        let record = h
            .certificates
            .get_by_provider(provider)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.snapshot.full_name, "Asha Munda");
        assert_eq!(record.application_id, ApplicationId(101));
        assert_eq!(record.verification_score, 85);
        assert!(record.expiry_date > record.issued_date);
    }

    #[tokio::test]
    async fn test_issue_is_idempotent() {
        let h = harness();
        let provider = approved_provider(&h, 1).await;

        let first = h.registry.issuer.issue(provider).await.unwrap();
        let second = h.registry.issuer.issue(provider).await.unwrap();

        assert!(!second.newly_issued);
        assert_eq!(first.certificate_hash, second.certificate_hash);
        assert_eq!(first.certificate_number, second.certificate_number);
        assert_eq!(h.ledger.call_count(LedgerOp::Issue).await, 1);
    }

    #[tokio::test]
    async fn test_unknown_or_unapproved_provider() {
        let h = harness();
        assert!(matches!(
            h.registry.issuer.issue(ProviderId(999)).await,
            Err(RegistryError::ProviderNotFound(ProviderId(999)))
        ));
    }

    #[tokio::test]
    async fn test_missing_provider_details_fall_back_to_validity() {
        let h = harness();
        let provider = approved_provider(&h, 1).await;
        h.ledger
            .inject_fault(LedgerOp::ProviderDetails, LedgerFault::Unavailable)
            .await;

        h.registry.issuer.issue(provider).await.unwrap();
        let record = h
            .certificates
            .get_by_provider(provider)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            record.expiry_date,
            record.issued_date + chrono::Duration::days(365)
        );
    }

    #[tokio::test]
    async fn test_ambiguous_issue_reconciles() {
        let h = harness();
        let provider = approved_provider(&h, 1).await;
        h.ledger
            .inject_fault(LedgerOp::Issue, LedgerFault::AmbiguousAfterApply)
            .await;

        let issued = h.registry.issuer.issue(provider).await.unwrap();
        assert!(issued.newly_issued);
        assert_eq!(h.ledger.call_count(LedgerOp::Issue).await, 1);
    }

    #[tokio::test]
    async fn test_distinct_providers_get_distinct_numbers() {
        let h = harness();
        let a = approved_provider(&h, 1).await;
        let b = approved_provider(&h, 2).await;

        let (first, second) = tokio::join!(h.registry.issuer.issue(a), h.registry.issuer.issue(b));
        let first = first.unwrap();
        let second = second.unwrap();

        assert_ne!(first.certificate_hash, second.certificate_hash);
        assert_ne!(first.certificate_number, second.certificate_number);
    }

    #[tokio::test]
    async fn test_reissue_returns_parked_certificate() {
        let h = harness();
        let provider = approved_provider(&h, 1).await;

        h.certificates.fail_next_writes(100);
        let first = h.registry.issuer.issue(provider).await.unwrap();
        assert!(first.newly_issued);

        let again = h.registry.issuer.issue(provider).await.unwrap();
        assert!(!again.newly_issued);
        assert_eq!(again.certificate_number, first.certificate_number);
        assert_eq!(again.certificate_hash, first.certificate_hash);
        assert_eq!(h.ledger.call_count(LedgerOp::Issue).await, 1);

        h.certificates.fail_next_writes(0);
        assert_eq!(h.registry.coordinator.sweep().await.repaired, 1);
        let stored = h
            .certificates
            .get_by_provider(provider)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.certificate_number, first.certificate_number);
    }
}
