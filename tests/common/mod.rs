//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use vendor_registry::domain::{
    ApplicationFields, Clock, CommonFields, FixedClock, GuideFields, Hash256, PaymentReceipt,
    ProviderId, TransportFields, VendorId, VendorType,
};
use vendor_registry::infra::{
    InMemoryApplicationStore, InMemoryCertificateSequence, InMemoryCertificateStore,
    InMemoryRepairStore, ReceiptShapeVerifier, RetryConfig,
};
use vendor_registry::ledger::memory::InMemoryLedger;
use vendor_registry::ledger::LedgerClient;
use vendor_registry::metrics::MetricsRegistry;
use vendor_registry::registry::{
    FsArtifactStore, HtmlTemplateRenderer, SubmitApplication, VerificationService,
};
use vendor_registry::{Registry, RegistryConfig, RegistryDeps};

/// Registration fee accepted by default
pub const FEE: u64 = 10_000;

/// Instant every test registry is pinned to
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
}

/// Registry over in-memory stores and ledger, with handles to each collaborator
pub struct TestRegistry {
    pub registry: Registry,
    pub ledger: Arc<InMemoryLedger>,
    pub applications: Arc<InMemoryApplicationStore>,
    pub certificates: Arc<InMemoryCertificateStore>,
    pub repairs: Arc<InMemoryRepairStore>,
    pub metrics: Arc<MetricsRegistry>,
    pub artifact_dir: PathBuf,
}

impl TestRegistry {
    /// Verification service over the same stores, reading the clock at `now`
    pub fn verifier_at(&self, now: DateTime<Utc>) -> VerificationService {
        VerificationService::new(
            self.registry.config.clone(),
            self.applications.clone(),
            self.certificates.clone(),
            self.ledger.clone(),
            Arc::new(FixedClock(now)),
            self.metrics.clone(),
        )
    }

    /// A fresh registry over the same stores, as after a process restart
    pub fn restarted(&self) -> Registry {
        Registry::new(
            (*self.registry.config).clone(),
            RegistryDeps {
                applications: self.applications.clone(),
                certificates: self.certificates.clone(),
                repairs: self.repairs.clone(),
                sequence: Arc::new(InMemoryCertificateSequence::new()),
                ledger: self.ledger.clone(),
                payments: Arc::new(ReceiptShapeVerifier),
                renderer: Arc::new(HtmlTemplateRenderer),
                artifact_store: Arc::new(FsArtifactStore::new(self.artifact_dir.clone())),
                clock: Arc::new(FixedClock(test_now())),
                metrics: self.metrics.clone(),
            },
        )
    }

    pub fn identity(&self, raw: &str) -> Hash256 {
        self.registry.config.identity_hash(raw)
    }
}

/// Fast retries so fault tests finish quickly
pub fn test_config() -> RegistryConfig {
    RegistryConfig {
        ledger_retry: RetryConfig::fast().with_jitter(0.0),
        local_retry: RetryConfig::fast().with_jitter(0.0),
        ledger_call_timeout: Duration::from_millis(500),
        ..RegistryConfig::default()
    }
}

pub fn test_registry() -> TestRegistry {
    test_registry_with(test_config())
}

pub fn test_registry_with(config: RegistryConfig) -> TestRegistry {
    test_registry_over(config, |ledger| ledger)
}

/// Registry whose ledger client wraps the in-memory ledger
pub fn test_registry_over<F>(config: RegistryConfig, client: F) -> TestRegistry
where
    F: FnOnce(Arc<InMemoryLedger>) -> Arc<dyn LedgerClient>,
{
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(test_now()));
    let ledger = Arc::new(InMemoryLedger::new().with_clock(clock.clone()));
    let applications = Arc::new(InMemoryApplicationStore::new());
    let certificates = Arc::new(InMemoryCertificateStore::new());
    let repairs = Arc::new(InMemoryRepairStore::new());
    let metrics = Arc::new(MetricsRegistry::new());
    let artifact_dir = std::env::temp_dir().join(format!("vendor-registry-test-{}", Uuid::new_v4()));

    let registry = Registry::new(
        config,
        RegistryDeps {
            applications: applications.clone(),
            certificates: certificates.clone(),
            repairs: repairs.clone(),
            sequence: Arc::new(InMemoryCertificateSequence::new()),
            ledger: client(ledger.clone()),
            payments: Arc::new(ReceiptShapeVerifier),
            renderer: Arc::new(HtmlTemplateRenderer),
            artifact_store: Arc::new(FsArtifactStore::new(artifact_dir.clone())),
            clock,
            metrics: metrics.clone(),
        },
    );

    TestRegistry {
        registry,
        ledger,
        applications,
        certificates,
        repairs,
        metrics,
        artifact_dir,
    }
}

pub fn common_fields(full_name: &str, city: &str) -> CommonFields {
    CommonFields {
        full_name: full_name.to_string(),
        email: "vendor@example.com".to_string(),
        phone: "+91 90000 00000".to_string(),
        address: "12 Main Road".to_string(),
        city: city.to_string(),
        state: "Jharkhand".to_string(),
        description: "Guided treks around the falls".to_string(),
    }
}

pub fn guide_fields(full_name: &str) -> ApplicationFields {
    ApplicationFields::Guide(GuideFields {
        common: common_fields(full_name, "Ranchi"),
        experience: "5 years".to_string(),
        specialization: "Trekking".to_string(),
        languages: vec!["Hindi".to_string(), "English".to_string()],
        certifications: String::new(),
        emergency_contact: "+91 90000 00001".to_string(),
        photo_ref: Some("photos/guide.jpg".to_string()),
    })
}

pub fn transport_fields(full_name: &str) -> ApplicationFields {
    ApplicationFields::Transportation(TransportFields {
        common: common_fields(full_name, "Dhanbad"),
        license_number: "JH01-2020-0001234".to_string(),
        vehicle_type: "SUV".to_string(),
        vehicle_registration: "JH01AB1234".to_string(),
        seating_capacity: 6,
    })
}

pub fn receipt(payment_id: &str, amount: u64) -> PaymentReceipt {
    PaymentReceipt {
        payment_id: payment_id.to_string(),
        order_id: format!("order_{payment_id}"),
        signature: "sig".to_string(),
        amount,
    }
}

/// A complete GUIDE submission with one document and the default fee
pub fn guide_submission(identity_hash: Hash256, payment_id: &str) -> SubmitApplication {
    SubmitApplication {
        vendor_id: VendorId::new(format!("vendor_{payment_id}")),
        identity_hash,
        vendor_type: VendorType::Guide,
        fields: guide_fields("Asha Munda"),
        document_digests: vec![[7u8; 32]],
        payment_receipt: receipt(payment_id, FEE),
    }
}

/// Submit and approve a GUIDE application for `raw_identity`.
pub async fn approved_guide(t: &TestRegistry, raw_identity: &str) -> ProviderId {
    let submitted = t
        .registry
        .register
        .submit(guide_submission(
            t.identity(raw_identity),
            &format!("pay_{raw_identity}"),
        ))
        .await
        .unwrap();

    t.registry
        .register
        .approve(submitted.application_id, "documents verified".to_string(), 85)
        .await
        .unwrap()
        .provider_id
}
