//! Certificate verification and admin activation
//!
//! The local record answers every verification. When the certificate is
//! active and unexpired the ledger is asked as well: a disagreement makes the
//! certificate unverified, an unreachable ledger only degrades the answer.

use std::sync::Arc;

use super::RegistryConfig;
use crate::domain::{
    hash_to_hex, CertificateLookup, CertificateRecord, CertificateVerification, Clock, Hash256,
    LedgerCheck,
};
use crate::infra::{ApplicationStore, CertificateStore, RegistryError, Result};
use crate::ledger::{with_timeout, LedgerClient};
use crate::metrics::{metric_names, MetricsRegistry};

#[derive(Clone)]
pub struct VerificationService {
    config: Arc<RegistryConfig>,
    applications: Arc<dyn ApplicationStore>,
    certificates: Arc<dyn CertificateStore>,
    ledger: Arc<dyn LedgerClient>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
}

impl VerificationService {
    pub fn new(
        config: Arc<RegistryConfig>,
        applications: Arc<dyn ApplicationStore>,
        certificates: Arc<dyn CertificateStore>,
        ledger: Arc<dyn LedgerClient>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            applications,
            certificates,
            ledger,
            clock,
            metrics,
        }
    }

    #[tracing::instrument(skip(self), fields(certificate_hash = %hash_to_hex(certificate_hash)))]
    pub async fn verify(&self, certificate_hash: &Hash256) -> Result<CertificateVerification> {
        let record = self
            .certificates
            .get_by_hash(certificate_hash)
            .await?
            .ok_or_else(|| RegistryError::CertificateNotFound(hash_to_hex(certificate_hash)))?;
        self.metrics.inc_counter(metric_names::VERIFICATIONS).await;

        let is_expired = record.is_expired_at(self.clock.now());
        let ledger_check = if !record.is_active || is_expired {
            LedgerCheck::Skipped
        } else {
            match self.applications.get(record.application_id).await? {
                Some(application) => self.cross_check(&record, &application.identity_hash).await,
                None => {
                    tracing::warn!(
                        application_id = %record.application_id,
                        "Originating application missing, skipping ledger check"
                    );
                    LedgerCheck::Skipped
                }
            }
        };

        let verified = record.is_active && !is_expired && ledger_check != LedgerCheck::Mismatch;

        Ok(CertificateVerification {
            verified,
            is_expired,
            ledger_confirmed: ledger_check == LedgerCheck::Confirmed,
            ledger_check,
            certificate: record,
        })
    }

    async fn cross_check(&self, record: &CertificateRecord, identity_hash: &Hash256) -> LedgerCheck {
        let answer = with_timeout(
            self.config.ledger_call_timeout,
            self.ledger.verify_certificate(identity_hash),
        )
        .await;

        match answer {
            Ok(Some(found))
                if found.is_valid && found.certificate_hash == Some(record.certificate_hash) =>
            {
                LedgerCheck::Confirmed
            }
            Ok(found) => {
                tracing::warn!(
                    certificate_number = %record.certificate_number,
                    ledger_valid = ?found.as_ref().map(|f| f.is_valid),
                    ledger_hash = ?found.as_ref().and_then(|f| f.certificate_hash).map(|h| hash_to_hex(&h)),
                    "Ledger disagrees with local certificate"
                );
                self.metrics
                    .inc_counter(metric_names::VERIFICATIONS_MISMATCH)
                    .await;
                LedgerCheck::Mismatch
            }
            Err(err) => {
                tracing::warn!(error = %err, "Ledger unreachable, answering from local record");
                self.metrics
                    .inc_counter(metric_names::VERIFICATIONS_DEGRADED)
                    .await;
                LedgerCheck::Unavailable
            }
        }
    }

    /// Revoke or reactivate a certificate. Local only, takes effect immediately.
    #[tracing::instrument(skip(self), fields(certificate_hash = %hash_to_hex(certificate_hash)))]
    pub async fn set_active(&self, certificate_hash: &Hash256, active: bool) -> Result<()> {
        if !self.certificates.set_active(certificate_hash, active).await? {
            return Err(RegistryError::CertificateNotFound(hash_to_hex(
                certificate_hash,
            )));
        }
        if !active {
            self.metrics
                .inc_counter(metric_names::CERTIFICATES_REVOKED)
                .await;
        }
        tracing::info!(active, "Certificate activation changed");
        Ok(())
    }

    pub async fn find(&self, lookup: &CertificateLookup) -> Result<CertificateRecord> {
        let (found, key) = match lookup {
            CertificateLookup::Hash(hash) => {
                (self.certificates.get_by_hash(hash).await?, hash_to_hex(hash))
            }
            CertificateLookup::Provider(provider_id) => (
                self.certificates.get_by_provider(*provider_id).await?,
                format!("provider {provider_id}"),
            ),
            CertificateLookup::Number(number) => (
                self.certificates.get_by_number(number).await?,
                number.to_string(),
            ),
        };
        found.ok_or(RegistryError::CertificateNotFound(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ApplicationFields, ApplicationId, ApplicationRecord, ApplicationStatus, CertificateDetail,
        CertificateNumber, CommonFields, DisplaySnapshot, FixedClock, GuideFields, ProviderId,
        VendorId, VendorType,
    };
    use crate::infra::{InMemoryApplicationStore, InMemoryCertificateStore};
    use crate::ledger::{LedgerError, LedgerVerification, MockLedgerClient};
    use chrono::{DateTime, TimeZone, Utc};

    const IDENTITY: Hash256 = [4; 32];
    const CERT: Hash256 = [9; 32];

    fn issued_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    async fn stores() -> (Arc<InMemoryApplicationStore>, Arc<InMemoryCertificateStore>) {
        let applications = Arc::new(InMemoryApplicationStore::new());
        applications
            .insert(&ApplicationRecord {
                application_id: ApplicationId(101),
                identity_hash: IDENTITY,
                application_data_hash: [2; 32],
                documents_hash: [3; 32],
                payment_reference: "pay_1".to_string(),
                vendor_type: VendorType::Guide,
                vendor_id: VendorId::new("user_1"),
                status: ApplicationStatus::Pending,
                submitted_at: issued_at(),
                approved_at: None,
                provider_id: None,
                verifier_notes: None,
                verification_score: None,
                rejected_at: None,
                rejection_reason: None,
                approval_started_at: None,
                fields: ApplicationFields::Guide(GuideFields {
                    common: CommonFields {
                        full_name: "Asha".to_string(),
                        email: "a@example.com".to_string(),
                        phone: "1".to_string(),
                        address: "x".to_string(),
                        city: "Ranchi".to_string(),
                        state: String::new(),
                        description: "d".to_string(),
                    },
                    experience: "1".to_string(),
                    specialization: "s".to_string(),
                    languages: vec![],
                    certifications: String::new(),
                    emergency_contact: "112".to_string(),
                    photo_ref: None,
                }),
            })
            .await
            .unwrap();

        let certificates = Arc::new(InMemoryCertificateStore::new());
        certificates
            .insert(&CertificateRecord {
                certificate_hash: CERT,
                provider_id: ProviderId(501),
                application_id: ApplicationId(101),
                certificate_number: CertificateNumber::new("JH", VendorType::Guide, 2025, 1),
                issued_date: issued_at(),
                expiry_date: issued_at() + chrono::Duration::days(365),
                verification_score: 85,
                is_active: true,
                artifact_location: None,
                ledger_tx_reference: [1; 32],
                qr_payload: "http://localhost/verify/0x09".to_string(),
                snapshot: DisplaySnapshot {
                    full_name: "Asha".to_string(),
                    city: "Ranchi".to_string(),
                    vendor_type: VendorType::Guide,
                    service_type: "Tourist Guide".to_string(),
                    detail: CertificateDetail::PhotoRef(None),
                },
            })
            .await
            .unwrap();

        (applications, certificates)
    }

    async fn service(ledger: MockLedgerClient, days_after_issue: i64) -> VerificationService {
        let (applications, certificates) = stores().await;
        VerificationService::new(
            Arc::new(RegistryConfig::default()),
            applications,
            certificates,
            Arc::new(ledger),
            Arc::new(FixedClock(issued_at() + chrono::Duration::days(days_after_issue))),
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn ledger_answer(hash: Hash256, is_valid: bool) -> LedgerVerification {
        LedgerVerification {
            is_valid,
            provider_id: ProviderId(501),
            certificate_hash: Some(hash),
            issued_date: Some(issued_at()),
            expiry_date: issued_at() + chrono::Duration::days(365),
        }
    }

    #[tokio::test]
    async fn test_confirmed_by_ledger() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_verify_certificate()
            .withf(|identity| *identity == IDENTITY)
            .times(1)
            .returning(|_| Ok(Some(ledger_answer(CERT, true))));

        let verdict = service(ledger, 10).await.verify(&CERT).await.unwrap();
        assert!(verdict.verified);
        assert!(verdict.ledger_confirmed);
        assert_eq!(verdict.ledger_check, LedgerCheck::Confirmed);
        assert!(!verdict.is_expired);
    }

    #[tokio::test]
    async fn test_ledger_mismatch_fails_verification() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_verify_certificate()
            .returning(|_| Ok(Some(ledger_answer([7; 32], true))));

        let verdict = service(ledger, 10).await.verify(&CERT).await.unwrap();
        assert!(!verdict.verified);
        assert_eq!(verdict.ledger_check, LedgerCheck::Mismatch);
    }

    #[tokio::test]
    async fn test_unreachable_ledger_degrades() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_verify_certificate()
            .returning(|_| Err(LedgerError::Unavailable("rpc down".into())));

        let verdict = service(ledger, 10).await.verify(&CERT).await.unwrap();
        assert!(verdict.verified);
        assert!(!verdict.ledger_confirmed);
        assert_eq!(verdict.ledger_check, LedgerCheck::Unavailable);
    }

    #[tokio::test]
    async fn test_revoked_certificate_skips_ledger() {
        let mut ledger = MockLedgerClient::new();
        ledger.expect_verify_certificate().times(0);

        let service = service(ledger, 10).await;
        service.set_active(&CERT, false).await.unwrap();

        let verdict = service.verify(&CERT).await.unwrap();
        assert!(!verdict.verified);
        assert!(!verdict.certificate.is_active);
        assert_eq!(verdict.ledger_check, LedgerCheck::Skipped);
    }

    #[tokio::test]
    async fn test_expired_certificate_skips_ledger() {
        let mut ledger = MockLedgerClient::new();
        ledger.expect_verify_certificate().times(0);

        let verdict = service(ledger, 366).await.verify(&CERT).await.unwrap();
        assert!(verdict.is_expired);
        assert!(!verdict.verified);
    }

    #[tokio::test]
    async fn test_unknown_certificate() {
        let service = service(MockLedgerClient::new(), 0).await;
        assert!(matches!(
            service.verify(&[0; 32]).await,
            Err(RegistryError::CertificateNotFound(_))
        ));
        assert!(matches!(
            service.set_active(&[0; 32], false).await,
            Err(RegistryError::CertificateNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_by_each_key() {
        let service = service(MockLedgerClient::new(), 0).await;
        let number: CertificateNumber = "JH-GUI-2025-001".parse().unwrap();

        for lookup in [
            CertificateLookup::Hash(CERT),
            CertificateLookup::Provider(ProviderId(501)),
            CertificateLookup::Number(number),
        ] {
            assert_eq!(service.find(&lookup).await.unwrap().certificate_hash, CERT);
        }
        assert!(service
            .find(&CertificateLookup::Provider(ProviderId(1)))
            .await
            .is_err());
    }
}
