//! Payment verifiers
//!
//! Gateway signature checks live with the gateway integration. The verifier
//! here only refuses receipts that could not have come from a capture.

use async_trait::async_trait;

use crate::domain::PaymentReceipt;
use crate::infra::{PaymentVerifier, RegistryError, Result};

/// Accepts any receipt carrying an order id and a gateway signature
#[derive(Debug, Default, Clone, Copy)]
pub struct ReceiptShapeVerifier;

#[async_trait]
impl PaymentVerifier for ReceiptShapeVerifier {
    async fn verify(&self, receipt: &PaymentReceipt) -> Result<()> {
        if receipt.order_id.trim().is_empty() {
            return Err(RegistryError::PaymentInvalid("order id is missing".into()));
        }
        if receipt.signature.trim().is_empty() {
            return Err(RegistryError::PaymentInvalid(
                "gateway signature is missing".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(order_id: &str, signature: &str) -> PaymentReceipt {
        PaymentReceipt {
            payment_id: "pay_1".into(),
            order_id: order_id.into(),
            signature: signature.into(),
            amount: 10_000,
        }
    }

    #[tokio::test]
    async fn test_requires_order_and_signature() {
        let verifier = ReceiptShapeVerifier;
        assert!(verifier.verify(&receipt("order_1", "sig")).await.is_ok());
        assert!(matches!(
            verifier.verify(&receipt("", "sig")).await,
            Err(RegistryError::PaymentInvalid(_))
        ));
        assert!(matches!(
            verifier.verify(&receipt("order_1", " ")).await,
            Err(RegistryError::PaymentInvalid(_))
        ));
    }
}
