//! Registry services
//!
//! The application register, the reconciliation coordinator that sequences
//! ledger and local writes, certificate issuance with its artifact pipeline,
//! and the verification read path.

pub mod artifact;
pub mod coordinator;
pub mod issuance;
pub mod register;
pub mod verification;

use std::sync::Arc;
use std::time::Duration;

use crate::crypto::compute_identity_hash;
use crate::domain::{Clock, Hash256, DEFAULT_MIN_REGISTRATION_FEE};
use crate::infra::{
    ApplicationStore, CertificateSequence, CertificateStore, PaymentVerifier, RegistryError,
    RepairStore, Result, RetryConfig,
};
use crate::ledger::LedgerClient;
use crate::metrics::MetricsRegistry;

pub use artifact::{
    ArtifactError, ArtifactPipeline, ArtifactRenderer, ArtifactStore, CertificateTemplate,
    FsArtifactStore, HtmlTemplateRenderer,
};
pub use coordinator::{
    Coordinator, PendingProjection, ProjectionOutcome, RepairEntry, SweepReport,
};
pub use issuance::CertificateIssuer;
pub use register::{
    ApplicationRegister, ApprovedApplication, SubmitApplication, SubmittedApplication,
};
pub use verification::VerificationService;

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Salt mixed into identity hashes; never leaves the service
    pub identity_salt: Vec<u8>,
    /// Minimum captured amount for a registration, smallest currency unit
    pub min_registration_fee: u64,
    /// Region segment of certificate numbers
    pub region: String,
    /// Base URL encoded in certificate QR payloads
    pub verify_base_url: String,
    /// Fallback validity when the ledger cannot report an expiry
    pub certificate_validity: chrono::Duration,
    /// Deadline for a single ledger call
    pub ledger_call_timeout: Duration,
    /// Name printed on rendered certificates
    pub issuing_authority: String,
    /// How long an approval claim blocks a rejection without a ledger answer
    pub approval_claim_ttl: chrono::Duration,
    pub ledger_retry: RetryConfig,
    pub local_retry: RetryConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            identity_salt: b"vendor-registry-dev-salt".to_vec(),
            min_registration_fee: DEFAULT_MIN_REGISTRATION_FEE,
            region: "JH".to_string(),
            verify_base_url: "http://localhost:8080/api/v1/verify".to_string(),
            certificate_validity: chrono::Duration::days(365),
            ledger_call_timeout: Duration::from_secs(30),
            issuing_authority: "Department of Tourism".to_string(),
            approval_claim_ttl: chrono::Duration::minutes(5),
            ledger_retry: RetryConfig::ledger(),
            local_retry: RetryConfig::local_write(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let identity_salt = match std::env::var("IDENTITY_HASH_SALT") {
            Ok(salt) if !salt.trim().is_empty() => salt.into_bytes(),
            _ => {
                tracing::warn!("IDENTITY_HASH_SALT not set, using development salt");
                defaults.identity_salt
            }
        };

        let min_registration_fee = parse_env("MIN_REGISTRATION_FEE")?
            .unwrap_or(defaults.min_registration_fee);

        let region = std::env::var("CERTIFICATE_REGION")
            .ok()
            .map(|r| r.trim().to_ascii_uppercase())
            .filter(|r| !r.is_empty())
            .unwrap_or(defaults.region);
        if region.contains('-') {
            return Err(RegistryError::Configuration(
                "CERTIFICATE_REGION must not contain '-'".to_string(),
            ));
        }

        let verify_base_url = std::env::var("VERIFY_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.verify_base_url);

        let certificate_validity = parse_env::<i64>("CERTIFICATE_VALIDITY_DAYS")?
            .map(chrono::Duration::days)
            .unwrap_or(defaults.certificate_validity);
        if certificate_validity <= chrono::Duration::zero() {
            return Err(RegistryError::Configuration(
                "CERTIFICATE_VALIDITY_DAYS must be positive".to_string(),
            ));
        }

        let ledger_call_timeout = parse_env::<u64>("LEDGER_CALL_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.ledger_call_timeout);

        let issuing_authority =
            std::env::var("ISSUING_AUTHORITY").unwrap_or(defaults.issuing_authority);

        let approval_claim_ttl = parse_env::<i64>("APPROVAL_CLAIM_TTL_SECS")?
            .map(chrono::Duration::seconds)
            .unwrap_or(defaults.approval_claim_ttl);
        if approval_claim_ttl <= chrono::Duration::zero() {
            return Err(RegistryError::Configuration(
                "APPROVAL_CLAIM_TTL_SECS must be positive".to_string(),
            ));
        }

        Ok(Self {
            identity_salt,
            min_registration_fee,
            region,
            verify_base_url,
            certificate_validity,
            ledger_call_timeout,
            issuing_authority,
            approval_claim_ttl,
            ..defaults
        })
    }

    /// Hash a raw identity document number with the configured salt.
    pub fn identity_hash(&self, raw_id: &str) -> Hash256 {
        compute_identity_hash(raw_id, &self.identity_salt)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RegistryError::Configuration(format!("{name} is not a valid value"))),
        Err(_) => Ok(None),
    }
}

/// Collaborators shared by the registry services
#[derive(Clone)]
pub struct RegistryDeps {
    pub applications: Arc<dyn ApplicationStore>,
    pub certificates: Arc<dyn CertificateStore>,
    pub repairs: Arc<dyn RepairStore>,
    pub sequence: Arc<dyn CertificateSequence>,
    pub ledger: Arc<dyn LedgerClient>,
    pub payments: Arc<dyn PaymentVerifier>,
    pub renderer: Arc<dyn ArtifactRenderer>,
    pub artifact_store: Arc<dyn ArtifactStore>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<MetricsRegistry>,
}

/// All registry services wired over one set of collaborators
#[derive(Clone)]
pub struct Registry {
    pub config: Arc<RegistryConfig>,
    pub coordinator: Arc<Coordinator>,
    pub register: ApplicationRegister,
    pub issuer: CertificateIssuer,
    pub verifier: VerificationService,
    pub artifacts: ArtifactPipeline,
    pub metrics: Arc<MetricsRegistry>,
    ledger: Arc<dyn LedgerClient>,
}

impl Registry {
    pub fn new(config: RegistryConfig, deps: RegistryDeps) -> Self {
        let config = Arc::new(config);

        let coordinator = Arc::new(Coordinator::new(
            deps.applications.clone(),
            deps.certificates.clone(),
            deps.repairs.clone(),
            config.ledger_retry.clone(),
            config.local_retry.clone(),
            config.ledger_call_timeout,
            deps.clock.clone(),
            deps.metrics.clone(),
        ));

        let artifacts = ArtifactPipeline::new(
            deps.certificates.clone(),
            deps.renderer.clone(),
            deps.artifact_store.clone(),
            config.issuing_authority.clone(),
            deps.metrics.clone(),
        );

        let register = ApplicationRegister::new(
            config.clone(),
            deps.applications.clone(),
            deps.ledger.clone(),
            deps.payments.clone(),
            coordinator.clone(),
            deps.clock.clone(),
            deps.metrics.clone(),
        );

        let issuer = CertificateIssuer::new(
            config.clone(),
            deps.applications.clone(),
            deps.certificates.clone(),
            deps.sequence.clone(),
            deps.ledger.clone(),
            coordinator.clone(),
            artifacts.clone(),
            deps.clock.clone(),
            deps.metrics.clone(),
        );

        let verifier = VerificationService::new(
            config.clone(),
            deps.applications.clone(),
            deps.certificates.clone(),
            deps.ledger.clone(),
            deps.clock.clone(),
            deps.metrics.clone(),
        );

        Self {
            config,
            coordinator,
            register,
            issuer,
            verifier,
            artifacts,
            metrics: deps.metrics,
            ledger: deps.ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.region, "JH");
        assert_eq!(config.min_registration_fee, 10_000);
        assert_eq!(config.certificate_validity, chrono::Duration::days(365));
        assert_eq!(config.approval_claim_ttl, chrono::Duration::minutes(5));
    }

    #[test]
    fn test_identity_hash_uses_salt() {
        let a = RegistryConfig::default();
        let mut b = RegistryConfig::default();
        b.identity_salt = b"other".to_vec();
        assert_eq!(a.identity_hash("abcde1234f"), a.identity_hash(" ABCDE1234F "));
        assert_ne!(a.identity_hash("ABCDE1234F"), b.identity_hash("ABCDE1234F"));
    }
}
