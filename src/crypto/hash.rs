//! Deterministic hashing with domain separation
//!
//! Every digest in the registry is SHA-256 over a domain prefix followed by
//! a length-prefixed or canonical encoding of its inputs:
//! - Identity hashes: salted, so raw identity numbers never leave the request
//! - Content hashes: RFC 8785 JSON Canonicalization Scheme (JCS), so key order
//!   never changes the digest
//! - Documents hashes: per-file digests in submission order
//!
//! # RFC 8785 Compliance
//!
//! This module uses `serde_json_canonicalizer` for RFC 8785 compliant JSON
//! canonicalization:
//! - Deterministic key ordering (lexicographic UTF-8)
//! - ES6-compatible number serialization
//! - Proper Unicode handling

use sha2::{Digest, Sha256};

use crate::domain::{ApplicationFields, Hash256};

// ============================================================================
// Domain Separation Constants
// ============================================================================

/// Domain prefix for salted identity hashing
pub const DOMAIN_IDENTITY: &[u8] = b"VENDOR_REGISTRY_IDENTITY_V1";

/// Domain prefix for application content hashing
pub const DOMAIN_CONTENT: &[u8] = b"VENDOR_REGISTRY_CONTENT_V1";

/// Domain prefix for submitted document bundles
pub const DOMAIN_DOCUMENTS: &[u8] = b"VENDOR_REGISTRY_DOCUMENTS_V1";

/// Domain prefix for certificate hashes minted by the in-process ledger
pub const DOMAIN_CERTIFICATE: &[u8] = b"VENDOR_REGISTRY_CERTIFICATE_V1";

// ============================================================================
// Binary Encoding Helpers
// ============================================================================

/// Encode a u32 as 4 bytes big-endian
#[inline]
pub fn u32_be(n: u32) -> [u8; 4] {
    n.to_be_bytes()
}

/// Encode a u64 as 8 bytes big-endian
#[inline]
pub fn u64_be(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

/// Encode a byte string as length-prefixed bytes
/// Format: U32_BE(len) || bytes
pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(4 + bytes.len());
    result.extend_from_slice(&u32_be(bytes.len() as u32));
    result.extend_from_slice(bytes);
    result
}

// ============================================================================
// Canonical JSON (RFC 8785 JCS)
// ============================================================================

/// Convert JSON value to canonical string representation per RFC 8785 (JCS).
///
/// # Panics
///
/// Panics if the JSON value contains a float that cannot be represented
/// (NaN or Infinity). `serde_json::Value` cannot hold either, so this only
/// fires for values built with the `arbitrary_precision` feature.
pub fn canonicalize_json(value: &serde_json::Value) -> String {
    serde_json_canonicalizer::to_string(value)
        .expect("Failed to canonicalize JSON - contains invalid values (NaN or Infinity)")
}

/// Trim surrounding whitespace from every string in a JSON tree.
fn normalize_value(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;

    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// ============================================================================
// Registry Hashes
// ============================================================================

/// Compute the salted identity hash used as the ledger lookup key.
///
/// ```text
/// identity_hash = SHA256(b"VENDOR_REGISTRY_IDENTITY_V1" ||
///                        ENC(salt) || ENC(UPPER(TRIM(raw_id))))
/// ```
///
/// Identity numbers are case-insensitive, so `abcde1234f` and `ABCDE1234F`
/// hash identically.
pub fn compute_identity_hash(raw_id: &str, salt: &[u8]) -> Hash256 {
    let normalized = raw_id.trim().to_ascii_uppercase();

    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_IDENTITY);
    hasher.update(encode_bytes(salt));
    hasher.update(encode_bytes(normalized.as_bytes()));
    hasher.finalize().into()
}

/// Compute the content hash of an arbitrary JSON field map.
///
/// ```text
/// content_hash = SHA256(b"VENDOR_REGISTRY_CONTENT_V1" || JCS(normalize(fields)))
/// ```
pub fn compute_content_hash_value(fields: &serde_json::Value) -> Hash256 {
    let canonical = canonicalize_json(&normalize_value(fields));

    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_CONTENT);
    hasher.update(canonical.as_bytes());
    hasher.finalize().into()
}

/// Compute the content hash of a schema-checked application.
pub fn compute_content_hash(fields: &ApplicationFields) -> Hash256 {
    // Derived Serialize on plain structs of strings, integers and string
    // lists cannot fail.
    let value = serde_json::to_value(fields).unwrap_or(serde_json::Value::Null);
    compute_content_hash_value(&value)
}

/// Compute the hash of a document bundle from per-file digests.
///
/// ```text
/// documents_hash = SHA256(b"VENDOR_REGISTRY_DOCUMENTS_V1" ||
///                         U32_BE(count) || digest_0 || ... || digest_n)
/// ```
///
/// Order is significant: reordering files is a different submission.
pub fn compute_documents_hash(ordered_digests: &[Hash256]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_DOCUMENTS);
    hasher.update(u32_be(ordered_digests.len() as u32));
    for digest in ordered_digests {
        hasher.update(digest);
    }
    hasher.finalize().into()
}

/// Derive a certificate hash for a provider.
///
/// Used by the in-process ledger; a chain ledger mints its own.
pub fn compute_certificate_hash(provider_id: u64, ledger_sequence: u64) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_CERTIFICATE);
    hasher.update(u64_be(provider_id));
    hasher.update(u64_be(ledger_sequence));
    hasher.finalize().into()
}

/// Plain SHA-256 of a byte slice (per-file document digests)
pub fn sha256(bytes: &[u8]) -> Hash256 {
    Sha256::digest(bytes).into()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_key_ordering() {
        let value = json!({"z": 1, "a": 2, "m": 3});
        assert_eq!(canonicalize_json(&value), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn test_canonical_json_nested_objects() {
        let value = json!({"outer": {"z": 1, "a": 2}, "first": true});
        assert_eq!(
            canonicalize_json(&value),
            r#"{"first":true,"outer":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn test_identity_hash_deterministic_and_salted() {
        let a = compute_identity_hash("ABCDE1234F", b"salt-1");
        let b = compute_identity_hash("ABCDE1234F", b"salt-1");
        let c = compute_identity_hash("ABCDE1234F", b"salt-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_identity_hash_normalizes_case_and_whitespace() {
        assert_eq!(
            compute_identity_hash("  abcde1234f ", b"s"),
            compute_identity_hash("ABCDE1234F", b"s")
        );
    }

    #[test]
    fn test_length_prefix_prevents_salt_boundary_collisions() {
        assert_ne!(
            compute_identity_hash("BC", b"A"),
            compute_identity_hash("C", b"AB")
        );
    }

    #[test]
    fn test_content_hash_ignores_key_order() {
        let a = json!({"full_name": "Asha", "city": "Ranchi", "languages": ["hi", "en"]});
        let b = json!({"languages": ["hi", "en"], "city": "Ranchi", "full_name": "Asha"});
        assert_eq!(compute_content_hash_value(&a), compute_content_hash_value(&b));
    }

    #[test]
    fn test_content_hash_sensitive_to_values_and_array_order() {
        let base = json!({"city": "Ranchi", "languages": ["hi", "en"]});
        let changed = json!({"city": "Dhanbad", "languages": ["hi", "en"]});
        let reordered = json!({"city": "Ranchi", "languages": ["en", "hi"]});
        assert_ne!(compute_content_hash_value(&base), compute_content_hash_value(&changed));
        assert_ne!(compute_content_hash_value(&base), compute_content_hash_value(&reordered));
    }

    #[test]
    fn test_content_hash_trims_strings() {
        let a = json!({"city": " Ranchi "});
        let b = json!({"city": "Ranchi"});
        assert_eq!(compute_content_hash_value(&a), compute_content_hash_value(&b));
    }

    #[test]
    fn test_documents_hash_is_order_sensitive() {
        let one = sha256(b"id-proof.pdf");
        let two = sha256(b"photo.jpg");
        assert_ne!(
            compute_documents_hash(&[one, two]),
            compute_documents_hash(&[two, one])
        );
        assert_eq!(
            compute_documents_hash(&[one, two]),
            compute_documents_hash(&[one, two])
        );
    }

    #[test]
    fn test_documents_hash_of_empty_bundle_is_stable() {
        assert_eq!(compute_documents_hash(&[]), compute_documents_hash(&[]));
        assert_ne!(compute_documents_hash(&[]), compute_documents_hash(&[[0u8; 32]]));
    }

    #[test]
    fn test_domain_prefix_difference() {
        // Same payload under different domains must never collide.
        let digest = [7u8; 32];
        assert_ne!(compute_documents_hash(&[digest]), compute_certificate_hash(7, 7));
    }

    #[test]
    fn test_big_endian_encoding() {
        assert_eq!(u32_be(1), [0, 0, 0, 1]);
        assert_eq!(u64_be(256), [0, 0, 0, 0, 0, 0, 1, 0]);
        assert_eq!(encode_bytes(b"ab"), vec![0, 0, 0, 2, b'a', b'b']);
    }
}
