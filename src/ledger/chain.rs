//! EVM registry contract client
//!
//! Submits registry writes to the vendor registry contract and reads state
//! back through its view functions. Writes are confirmed by waiting for the
//! receipt; the assigned ids are then read by deterministic key, the same
//! lookups used for reconciliation after an ambiguous outcome.

use alloy::primitives::{Address, FixedBytes, U256};
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::transports::RpcError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, instrument};

use super::{
    with_timeout, LedgerApplication, LedgerCertificate, LedgerClient, LedgerError, LedgerResult,
    LedgerStatistics, LedgerVerification, NewLedgerApplication, ProviderDetails,
};
use crate::domain::{hash_to_hex, ApplicationId, Hash256, ProviderId, VendorType};

// Generate contract bindings
sol! {
    #[sol(rpc)]
    interface IVendorRegistry {
        function submitApplication(
            uint8 serviceType,
            bytes32 identityHash,
            bytes32 applicationDataHash,
            bytes32 documentsHash,
            string paymentReference
        ) external;

        function approveApplication(
            uint256 applicationId,
            string verifierNotes,
            uint8 verificationScore
        ) external;

        function generateCertificate(uint256 providerId) external;

        function latestApplicationFor(bytes32 identityHash) external view returns (uint256);

        function applications(uint256 applicationId) external view returns (
            uint8 serviceType,
            bytes32 identityHash,
            bytes32 applicationDataHash,
            bytes32 documentsHash,
            string paymentReference,
            uint256 applicationDate,
            bool processed
        );

        function providerIdForApplication(uint256 applicationId) external view returns (uint256);

        function serviceProviders(uint256 providerId) external view returns (
            uint256 applicationId,
            uint8 serviceType,
            uint256 registrationDate,
            uint256 expiryDate,
            bool isActive,
            uint8 verificationScore
        );

        function certificateOf(uint256 providerId) external view returns (
            bytes32 certificateHash,
            bytes32 txReference
        );

        function verifyCertificateByIdentity(bytes32 identityHash) external view returns (
            bool isValid,
            uint256 providerId,
            bytes32 certificateHash,
            uint256 issuedDate,
            uint256 expiryDate
        );

        function getStatistics() external view returns (
            uint256 totalApplications,
            uint256 totalApprovals,
            uint256 totalProviders,
            uint256 totalCertificates
        );
    }
}

/// Chain ledger configuration
#[derive(Debug, Clone)]
pub struct ChainLedgerConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// Registry contract address
    pub registry_address: Address,
    /// Private key for signing transactions
    pub private_key: String,
    pub chain_id: u64,
    /// Upper bound on waiting for a transaction receipt
    pub confirmation_timeout: Duration,
}

impl ChainLedgerConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` when any required variable is missing.
    pub fn from_env() -> Option<Self> {
        let rpc_url = std::env::var("LEDGER_RPC_URL").ok()?;
        let registry_address = std::env::var("LEDGER_REGISTRY_ADDRESS")
            .ok()
            .and_then(|s| s.parse().ok())?;
        let private_key = std::env::var("LEDGER_PRIVATE_KEY").ok()?;
        let chain_id = std::env::var("LEDGER_CHAIN_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(80002);
        let confirmation_timeout = std::env::var("LEDGER_CONFIRMATION_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(120));

        Some(Self {
            rpc_url,
            registry_address,
            private_key,
            chain_id,
            confirmation_timeout,
        })
    }
}

/// Ledger client backed by the registry contract
pub struct ChainLedger {
    config: ChainLedgerConfig,
}

impl ChainLedger {
    pub fn new(config: ChainLedgerConfig) -> Self {
        Self { config }
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    fn to_bytes32(hash: &Hash256) -> FixedBytes<32> {
        FixedBytes::from_slice(hash)
    }

    fn rpc_url(&self) -> LedgerResult<alloy::transports::http::reqwest::Url> {
        self.config
            .rpc_url
            .parse()
            .map_err(|e| LedgerError::Rejected(format!("Invalid RPC URL: {}", e)))
    }

    fn signer(&self) -> LedgerResult<PrivateKeySigner> {
        self.config
            .private_key
            .parse()
            .map_err(|e| LedgerError::Rejected(format!("Invalid private key: {}", e)))
    }

    async fn latest_application_id(&self, identity_hash: &Hash256) -> LedgerResult<Option<u64>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url()?);
        let contract = IVendorRegistry::new(self.config.registry_address, &provider);

        let id = contract
            .latestApplicationFor(Self::to_bytes32(identity_hash))
            .call()
            .await
            .map_err(classify_call_error)?
            ._0;
        let id = u256_to_u64(id)?;
        Ok((id != 0).then_some(id))
    }
}

/// Map a failed send or view call onto the ledger error taxonomy.
fn classify_call_error(err: alloy::contract::Error) -> LedgerError {
    match err {
        alloy::contract::Error::TransportError(RpcError::ErrorResp(payload)) => {
            classify_revert(&payload.message)
        }
        alloy::contract::Error::TransportError(RpcError::Transport(kind)) => {
            LedgerError::Unavailable(kind.to_string())
        }
        alloy::contract::Error::TransportError(other) => LedgerError::Ambiguous(other.to_string()),
        other => LedgerError::Rejected(other.to_string()),
    }
}

/// Sends differ from views: a transport failure after dispatch may still
/// have delivered the transaction, so only refused connections are safe to
/// treat as never sent.
fn classify_send_error(err: alloy::contract::Error) -> LedgerError {
    match classify_call_error(err) {
        LedgerError::Unavailable(message) if !is_connection_refused(&message) => {
            LedgerError::Ambiguous(message)
        }
        other => other,
    }
}

fn is_connection_refused(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("connection refused") || lower.contains("dns error")
}

fn classify_revert(message: &str) -> LedgerError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("already") || lower.contains("used") || lower.contains("processed") {
        LedgerError::Conflict(message.to_string())
    } else if lower.contains("not found") || lower.contains("does not exist") {
        LedgerError::NotFound(message.to_string())
    } else {
        LedgerError::Rejected(message.to_string())
    }
}

fn u256_to_u64(value: U256) -> LedgerResult<u64> {
    u64::try_from(value).map_err(|_| LedgerError::Rejected(format!("value out of range: {value}")))
}

fn timestamp(value: U256) -> LedgerResult<DateTime<Utc>> {
    let secs = i64::try_from(u256_to_u64(value)?)
        .map_err(|_| LedgerError::Rejected(format!("timestamp out of range: {value}")))?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| LedgerError::Rejected(format!("timestamp out of range: {value}")))
}

fn vendor_type(code: u8) -> LedgerResult<VendorType> {
    VendorType::from_service_type_code(code)
        .ok_or_else(|| LedgerError::Rejected(format!("unknown service type {code}")))
}

#[async_trait]
impl LedgerClient for ChainLedger {
    #[instrument(skip(self, application), fields(identity_hash = %hash_to_hex(&application.identity_hash)))]
    async fn register_application(
        &self,
        application: &NewLedgerApplication,
    ) -> LedgerResult<ApplicationId> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(alloy::network::EthereumWallet::from(self.signer()?))
            .on_http(self.rpc_url()?);
        let contract = IVendorRegistry::new(self.config.registry_address, &provider);

        let tx = contract.submitApplication(
            application.vendor_type.service_type_code(),
            Self::to_bytes32(&application.identity_hash),
            Self::to_bytes32(&application.content_hash),
            Self::to_bytes32(&application.documents_hash),
            application.payment_reference.clone(),
        );

        let pending = tx.send().await.map_err(classify_send_error)?;
        info!(tx_hash = ?pending.tx_hash(), "Application transaction sent");

        let receipt = with_timeout(self.config.confirmation_timeout, async {
            pending
                .get_receipt()
                .await
                .map_err(|e| LedgerError::Ambiguous(format!("Failed to get receipt: {}", e)))
        })
        .await?;
        if !receipt.status() {
            return Err(LedgerError::Rejected("submitApplication reverted".into()));
        }

        let id = self
            .latest_application_id(&application.identity_hash)
            .await?
            .ok_or_else(|| LedgerError::Ambiguous("confirmed application not readable".into()))?;

        info!(
            application_id = id,
            block = receipt.block_number.unwrap_or(0),
            "Application registered on ledger"
        );
        Ok(ApplicationId(id))
    }

    #[instrument(skip(self, notes))]
    async fn approve_application(
        &self,
        application_id: ApplicationId,
        notes: &str,
        score: u8,
    ) -> LedgerResult<ProviderId> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(alloy::network::EthereumWallet::from(self.signer()?))
            .on_http(self.rpc_url()?);
        let contract = IVendorRegistry::new(self.config.registry_address, &provider);

        let tx = contract.approveApplication(
            U256::from(application_id.as_u64()),
            notes.to_string(),
            score,
        );
        let pending = tx.send().await.map_err(classify_send_error)?;
        info!(tx_hash = ?pending.tx_hash(), "Approval transaction sent");

        let receipt = with_timeout(self.config.confirmation_timeout, async {
            pending
                .get_receipt()
                .await
                .map_err(|e| LedgerError::Ambiguous(format!("Failed to get receipt: {}", e)))
        })
        .await?;
        if !receipt.status() {
            return Err(LedgerError::Rejected("approveApplication reverted".into()));
        }

        self.find_provider(application_id)
            .await?
            .ok_or_else(|| LedgerError::Ambiguous("confirmed approval not readable".into()))
    }

    #[instrument(skip(self))]
    async fn issue_certificate(&self, provider_id: ProviderId) -> LedgerResult<LedgerCertificate> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(alloy::network::EthereumWallet::from(self.signer()?))
            .on_http(self.rpc_url()?);
        let contract = IVendorRegistry::new(self.config.registry_address, &provider);

        let pending = contract
            .generateCertificate(U256::from(provider_id.as_u64()))
            .send()
            .await
            .map_err(classify_send_error)?;
        info!(tx_hash = ?pending.tx_hash(), "Certificate transaction sent");

        let receipt = with_timeout(self.config.confirmation_timeout, async {
            pending
                .get_receipt()
                .await
                .map_err(|e| LedgerError::Ambiguous(format!("Failed to get receipt: {}", e)))
        })
        .await?;
        if !receipt.status() {
            return Err(LedgerError::Rejected("generateCertificate reverted".into()));
        }

        let mut certificate = self
            .find_certificate(provider_id)
            .await?
            .ok_or_else(|| LedgerError::Ambiguous("confirmed certificate not readable".into()))?;
        certificate.tx_hash = receipt.transaction_hash.0;

        info!(
            provider_id = %provider_id,
            certificate_hash = %hash_to_hex(&certificate.certificate_hash),
            "Certificate generated on ledger"
        );
        Ok(certificate)
    }

    async fn get_provider_details(&self, provider_id: ProviderId) -> LedgerResult<ProviderDetails> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url()?);
        let contract = IVendorRegistry::new(self.config.registry_address, &provider);

        let details = contract
            .serviceProviders(U256::from(provider_id.as_u64()))
            .call()
            .await
            .map_err(classify_call_error)?;

        let application_id = u256_to_u64(details.applicationId)?;
        if application_id == 0 {
            return Err(LedgerError::NotFound(format!("provider {provider_id}")));
        }

        Ok(ProviderDetails {
            provider_id,
            application_id: ApplicationId(application_id),
            vendor_type: vendor_type(details.serviceType)?,
            registration_date: timestamp(details.registrationDate)?,
            expiry_date: timestamp(details.expiryDate)?,
            is_active: details.isActive,
            verification_score: details.verificationScore,
        })
    }

    async fn verify_certificate(
        &self,
        identity_hash: &Hash256,
    ) -> LedgerResult<Option<LedgerVerification>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url()?);
        let contract = IVendorRegistry::new(self.config.registry_address, &provider);

        let result = contract
            .verifyCertificateByIdentity(Self::to_bytes32(identity_hash))
            .call()
            .await
            .map_err(classify_call_error)?;

        let provider_id = u256_to_u64(result.providerId)?;
        if provider_id == 0 {
            return Ok(None);
        }

        let certificate_hash = result.certificateHash.0;
        let has_certificate = certificate_hash != [0u8; 32];
        Ok(Some(LedgerVerification {
            is_valid: result.isValid,
            provider_id: ProviderId(provider_id),
            certificate_hash: has_certificate.then_some(certificate_hash),
            issued_date: if has_certificate {
                Some(timestamp(result.issuedDate)?)
            } else {
                None
            },
            expiry_date: timestamp(result.expiryDate)?,
        }))
    }

    async fn find_application(
        &self,
        identity_hash: &Hash256,
    ) -> LedgerResult<Option<LedgerApplication>> {
        let Some(id) = self.latest_application_id(identity_hash).await? else {
            return Ok(None);
        };

        let provider = ProviderBuilder::new().on_http(self.rpc_url()?);
        let contract = IVendorRegistry::new(self.config.registry_address, &provider);
        let entry = contract
            .applications(U256::from(id))
            .call()
            .await
            .map_err(classify_call_error)?;

        Ok(Some(LedgerApplication {
            application_id: ApplicationId(id),
            identity_hash: entry.identityHash.0,
            content_hash: entry.applicationDataHash.0,
            documents_hash: entry.documentsHash.0,
            vendor_type: vendor_type(entry.serviceType)?,
            payment_reference: entry.paymentReference,
            submitted_at: timestamp(entry.applicationDate)?,
            processed: entry.processed,
        }))
    }

    async fn find_provider(
        &self,
        application_id: ApplicationId,
    ) -> LedgerResult<Option<ProviderId>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url()?);
        let contract = IVendorRegistry::new(self.config.registry_address, &provider);

        let id = contract
            .providerIdForApplication(U256::from(application_id.as_u64()))
            .call()
            .await
            .map_err(classify_call_error)?
            ._0;
        let id = u256_to_u64(id)?;
        Ok((id != 0).then_some(ProviderId(id)))
    }

    async fn find_certificate(
        &self,
        provider_id: ProviderId,
    ) -> LedgerResult<Option<LedgerCertificate>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url()?);
        let contract = IVendorRegistry::new(self.config.registry_address, &provider);

        let result = contract
            .certificateOf(U256::from(provider_id.as_u64()))
            .call()
            .await
            .map_err(classify_call_error)?;

        if result.certificateHash.0 == [0u8; 32] {
            return Ok(None);
        }
        Ok(Some(LedgerCertificate {
            certificate_hash: result.certificateHash.0,
            tx_hash: result.txReference.0,
        }))
    }

    async fn statistics(&self) -> LedgerResult<LedgerStatistics> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url()?);
        let contract = IVendorRegistry::new(self.config.registry_address, &provider);

        let stats = contract
            .getStatistics()
            .call()
            .await
            .map_err(classify_call_error)?;

        Ok(LedgerStatistics {
            total_applications: u256_to_u64(stats.totalApplications)?,
            total_approvals: u256_to_u64(stats.totalApprovals)?,
            total_providers: u256_to_u64(stats.totalProviders)?,
            total_certificates: u256_to_u64(stats.totalCertificates)?,
        })
    }
}
