//! HMAC-SHA256 signatures as issued by the payment gateway.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::domain::{GatewayPaymentId, OrderId};
use crate::ports::SignatureVerifier;

type HmacSha256 = Hmac<Sha256>;

/// Verifies client and webhook signatures with two separate secrets.
#[derive(Clone)]
pub struct HmacSignatures {
    key_secret: String,
    webhook_secret: String,
}

impl HmacSignatures {
    pub fn new(key_secret: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            key_secret: key_secret.into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Hex signature the gateway attaches to a client-side success callback.
    pub fn sign_payment(&self, order_id: &OrderId, payment_id: &GatewayPaymentId) -> Option<String> {
        sign(&self.key_secret, payment_payload(order_id, payment_id).as_bytes())
    }

    /// Hex signature the gateway sends in the webhook signature header.
    pub fn sign_webhook(&self, body: &[u8]) -> Option<String> {
        sign(&self.webhook_secret, body)
    }
}

impl std::fmt::Debug for HmacSignatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSignatures").finish_non_exhaustive()
    }
}

fn payment_payload(order_id: &OrderId, payment_id: &GatewayPaymentId) -> String {
    format!("{}|{}", order_id.as_str(), payment_id.as_str())
}

fn mac_for(secret: &str, payload: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(mac)
}

fn sign(secret: &str, payload: &[u8]) -> Option<String> {
    Some(hex::encode(mac_for(secret, payload)?.finalize().into_bytes()))
}

/// Constant-time check of a hex signature.
fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        debug!("signature is not valid hex");
        return false;
    };
    mac_for(secret, payload).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}

impl SignatureVerifier for HmacSignatures {
    fn verify_payment(
        &self,
        order_id: &OrderId,
        payment_id: &GatewayPaymentId,
        signature: &str,
    ) -> bool {
        verify(
            &self.key_secret,
            payment_payload(order_id, payment_id).as_bytes(),
            signature,
        )
    }

    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool {
        verify(&self.webhook_secret, body, signature)
    }
}
