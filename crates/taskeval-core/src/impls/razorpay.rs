//! RazorpayGateway - `PaymentGateway` over the Razorpay orders REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::OrderId;
use crate::ports::{GatewayError, GatewayOrder, OrderNotes, OrderRequest, PaymentGateway};

pub const DEFAULT_BASE_URL: &str = "https://api.razorpay.com";

#[derive(Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl RazorpayConfig {
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for RazorpayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpayConfig")
            .field("key_id", &self.key_id)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub struct RazorpayGateway {
    client: reqwest::Client,
    config: RazorpayConfig,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn orders_url(&self) -> String {
        format!("{}/v1/orders", self.config.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: u64,
    currency: &'a str,
    receipt: &'a str,
    notes: &'a OrderNotes,
}

impl<'a> From<&'a OrderRequest> for CreateOrderBody<'a> {
    fn from(request: &'a OrderRequest) -> Self {
        Self {
            amount: request.amount_minor,
            currency: &request.currency,
            receipt: &request.receipt,
            notes: &request.notes,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    amount: u64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

fn parse_order(body: &str) -> Result<GatewayOrder, GatewayError> {
    let order: OrderResponse =
        serde_json::from_str(body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
    if order.id.is_empty() {
        return Err(GatewayError::Malformed("order id is empty".into()));
    }
    Ok(GatewayOrder {
        order_id: OrderId::new(order.id),
        amount_minor: order.amount,
        currency: order.currency,
    })
}

fn rejection(status: u16, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.description.or(e.error.code))
        .unwrap_or_else(|| "order creation failed".to_string());
    GatewayError::Rejected { status, message }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable(e.without_url().to_string())
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, GatewayError> {
        debug!(
            amount = request.amount_minor,
            currency = %request.currency,
            receipt = %request.receipt,
            "creating gateway order"
        );
        let response = self
            .client
            .post(self.orders_url())
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&CreateOrderBody::from(request))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            let err = rejection(status.as_u16(), &text);
            warn!(error = %err, "gateway refused order");
            return Err(err);
        }
        parse_order(&text)
    }
}
