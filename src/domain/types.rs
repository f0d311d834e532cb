//! Core type definitions for the vendor registry
//!
//! Identifier newtypes, the 32-byte digest type, and the clock abstraction
//! used wherever "now" influences a persisted value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 32-byte hash (SHA-256)
pub type Hash256 = [u8; 32];

/// Render a digest as a `0x`-prefixed lowercase hex string.
pub fn hash_to_hex(hash: &Hash256) -> String {
    format!("0x{}", hex::encode(hash))
}

/// Parse a digest from hex, with or without the `0x` prefix.
pub fn hash_from_hex(s: &str) -> Option<Hash256> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}

/// Serde module for Hash256 with 0x prefix
pub mod hash256_hex_0x {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let hex_str = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes for Hash256"))
    }
}

/// Serde module for a list of Hash256 values with 0x prefix
pub mod hash256_vec_hex_0x {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(hashes: &[[u8; 32]], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(hashes.iter().map(|h| format!("0x{}", hex::encode(h))))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Vec<String> = Vec::deserialize(deserializer)?;
        raw.iter()
            .map(|s| {
                super::hash_from_hex(s)
                    .ok_or_else(|| serde::de::Error::custom("expected 32-byte hex digest"))
            })
            .collect()
    }
}

/// Ledger-assigned application identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(pub u64);

impl ApplicationId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ledger-assigned provider identifier, minted on approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub u64);

impl ProviderId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated principal id supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorId(pub String);

impl VendorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of tourism service provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VendorType {
    Guide,
    Accommodation,
    FoodRestaurant,
    Transportation,
    Activity,
}

impl VendorType {
    pub const ALL: [VendorType; 5] = [
        VendorType::Guide,
        VendorType::Accommodation,
        VendorType::FoodRestaurant,
        VendorType::Transportation,
        VendorType::Activity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VendorType::Guide => "GUIDE",
            VendorType::Accommodation => "ACCOMMODATION",
            VendorType::FoodRestaurant => "FOOD_RESTAURANT",
            VendorType::Transportation => "TRANSPORTATION",
            VendorType::Activity => "ACTIVITY",
        }
    }

    /// Service type discriminant used by the registry contract
    pub fn service_type_code(&self) -> u8 {
        match self {
            VendorType::Guide => 0,
            VendorType::Accommodation => 1,
            VendorType::FoodRestaurant => 2,
            VendorType::Transportation => 3,
            VendorType::Activity => 4,
        }
    }

    pub fn from_service_type_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(VendorType::Guide),
            1 => Some(VendorType::Accommodation),
            2 => Some(VendorType::FoodRestaurant),
            3 => Some(VendorType::Transportation),
            4 => Some(VendorType::Activity),
            _ => None,
        }
    }

    /// Three-letter segment of the certificate number
    pub fn service_prefix(&self) -> &'static str {
        match self {
            VendorType::Guide => "GUI",
            VendorType::Accommodation => "ACC",
            VendorType::FoodRestaurant => "RES",
            VendorType::Transportation => "TRN",
            VendorType::Activity => "ACT",
        }
    }

    /// Human-readable service name printed on certificates
    pub fn display_name(&self) -> &'static str {
        match self {
            VendorType::Guide => "Tourist Guide",
            VendorType::Accommodation => "Accommodation Provider",
            VendorType::FoodRestaurant => "Food & Restaurant",
            VendorType::Transportation => "Transportation",
            VendorType::Activity => "Activity Provider",
        }
    }
}

impl fmt::Display for VendorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VendorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GUIDE" => Ok(VendorType::Guide),
            "ACCOMMODATION" | "HOTEL" => Ok(VendorType::Accommodation),
            "FOOD_RESTAURANT" | "RESTAURANT" => Ok(VendorType::FoodRestaurant),
            "TRANSPORTATION" | "TRANSPORT" => Ok(VendorType::Transportation),
            "ACTIVITY" | "ACTIVITIES" => Ok(VendorType::Activity),
            other => Err(format!("unknown vendor type: {other}")),
        }
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a single instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex_roundtrip_accepts_both_forms() {
        let hash: Hash256 = [0xab; 32];
        let hex = hash_to_hex(&hash);
        assert!(hex.starts_with("0xabab"));
        assert_eq!(hash_from_hex(&hex), Some(hash));
        assert_eq!(hash_from_hex(&hex[2..]), Some(hash));
        assert_eq!(hash_from_hex("0x1234"), None);
    }

    #[test]
    fn test_vendor_type_codes_are_stable() {
        for vendor_type in VendorType::ALL {
            let code = vendor_type.service_type_code();
            assert_eq!(VendorType::from_service_type_code(code), Some(vendor_type));
        }
        assert_eq!(VendorType::from_service_type_code(9), None);
    }

    #[test]
    fn test_vendor_type_parses_legacy_aliases() {
        assert_eq!("transport".parse::<VendorType>(), Ok(VendorType::Transportation));
        assert_eq!("FOOD_RESTAURANT".parse::<VendorType>(), Ok(VendorType::FoodRestaurant));
        assert!("spaceship".parse::<VendorType>().is_err());
    }

    #[test]
    fn test_vendor_type_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&VendorType::FoodRestaurant).unwrap();
        assert_eq!(json, "\"FOOD_RESTAURANT\"");
    }
}
