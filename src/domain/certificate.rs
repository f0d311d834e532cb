//! Certificate records, numbering and verification verdicts

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{hash256_hex_0x, ApplicationId, CertificateDetail, Hash256, ProviderId, VendorType};

/// Human-readable certificate number: `{REGION}-{SERVICE_PREFIX}-{YEAR}-{SEQ}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CertificateNumber {
    pub region: String,
    pub prefix: String,
    pub year: i32,
    pub sequence: u32,
}

impl CertificateNumber {
    pub fn new(region: impl Into<String>, vendor_type: VendorType, year: i32, sequence: u32) -> Self {
        Self {
            region: region.into(),
            prefix: vendor_type.service_prefix().to_string(),
            year,
            sequence,
        }
    }
}

impl fmt::Display for CertificateNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{:03}",
            self.region, self.prefix, self.year, self.sequence
        )
    }
}

impl FromStr for CertificateNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 4 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(format!("malformed certificate number: {s}"));
        }
        let year = parts[2]
            .parse::<i32>()
            .map_err(|_| format!("malformed certificate year: {s}"))?;
        let sequence = parts[3]
            .parse::<u32>()
            .map_err(|_| format!("malformed certificate sequence: {s}"))?;
        Ok(Self {
            region: parts[0].to_string(),
            prefix: parts[1].to_string(),
            year,
            sequence,
        })
    }
}

impl TryFrom<String> for CertificateNumber {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CertificateNumber> for String {
    fn from(value: CertificateNumber) -> Self {
        value.to_string()
    }
}

/// Display fields copied from the application at issuance time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySnapshot {
    pub full_name: String,
    pub city: String,
    pub vendor_type: VendorType,
    pub service_type: String,
    pub detail: CertificateDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateRecord {
    #[serde(with = "hash256_hex_0x")]
    pub certificate_hash: Hash256,
    pub provider_id: ProviderId,
    /// Originating application (one-directional, non-owning)
    pub application_id: ApplicationId,
    pub certificate_number: CertificateNumber,
    pub issued_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub verification_score: u8,
    pub is_active: bool,
    /// Set once the out-of-band artifact job has stored the rendered document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
    #[serde(with = "hash256_hex_0x")]
    pub ledger_tx_reference: Hash256,
    pub qr_payload: String,
    pub snapshot: DisplaySnapshot,
}

impl CertificateRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry_date
    }

    pub fn issued_year(&self) -> i32 {
        self.issued_date.year()
    }
}

/// Result of a successful issuance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    #[serde(with = "hash256_hex_0x")]
    pub certificate_hash: Hash256,
    pub certificate_number: CertificateNumber,
    pub qr_payload: String,
    /// False when the record already existed and was returned unchanged
    pub newly_issued: bool,
}

/// Outcome of the ledger cross-check during verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerCheck {
    /// Ledger agrees with the local record
    Confirmed,
    /// Ledger answered but disagrees (unknown identity or different hash)
    Mismatch,
    /// Ledger could not be reached in time
    Unavailable,
    /// No cross-check was attempted
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateVerification {
    pub verified: bool,
    pub is_expired: bool,
    pub ledger_confirmed: bool,
    pub ledger_check: LedgerCheck,
    pub certificate: CertificateRecord,
}

/// Ways to look a certificate up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateLookup {
    Hash(Hash256),
    Provider(ProviderId),
    Number(CertificateNumber),
}
