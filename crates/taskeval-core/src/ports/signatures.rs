//! SignatureVerifier port: authenticity of payment acknowledgements.

use crate::domain::{GatewayPaymentId, OrderId};

pub trait SignatureVerifier: Send + Sync {
    /// Client-side acknowledgement: signature over `order_id|payment_id`.
    fn verify_payment(
        &self,
        order_id: &OrderId,
        payment_id: &GatewayPaymentId,
        signature: &str,
    ) -> bool;

    /// Webhook delivery: signature over the raw request body.
    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool;
}
