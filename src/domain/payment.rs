//! Payment gateway receipt
//!
//! The receipt is an opaque capability proof. Signature verification is
//! delegated to a [`crate::infra::PaymentVerifier`]; this crate only checks
//! that the captured amount covers the registration fee.

use serde::{Deserialize, Serialize};

/// Default registration fee in the smallest currency unit (paise)
pub const DEFAULT_MIN_REGISTRATION_FEE: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment_id: String,
    pub order_id: String,
    pub signature: String,
    /// Captured amount in the smallest currency unit
    pub amount: u64,
}

impl PaymentReceipt {
    /// Check the structural preconditions that do not need the gateway.
    pub fn check_covers(&self, minimum_fee: u64) -> Result<(), String> {
        if self.payment_id.trim().is_empty() {
            return Err("payment id is missing".to_string());
        }
        if self.amount < minimum_fee {
            return Err(format!(
                "payment amount {} is below the registration fee {}",
                self.amount, minimum_fee
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(amount: u64) -> PaymentReceipt {
        PaymentReceipt {
            payment_id: "pay_1".to_string(),
            order_id: "order_1".to_string(),
            signature: "sig".to_string(),
            amount,
        }
    }

    #[test]
    fn test_fee_boundary() {
        assert!(receipt(DEFAULT_MIN_REGISTRATION_FEE).check_covers(DEFAULT_MIN_REGISTRATION_FEE).is_ok());
        assert!(receipt(DEFAULT_MIN_REGISTRATION_FEE - 1)
            .check_covers(DEFAULT_MIN_REGISTRATION_FEE)
            .is_err());
    }

    #[test]
    fn test_blank_payment_id_rejected() {
        let mut r = receipt(20_000);
        r.payment_id = " ".to_string();
        assert!(r.check_covers(DEFAULT_MIN_REGISTRATION_FEE).is_err());
    }
}
