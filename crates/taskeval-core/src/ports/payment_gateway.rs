//! PaymentGateway port: order creation on the hosted checkout provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::OrderId;

/// Tag stored in order notes so the gateway dashboard shows why an order exists.
pub const UNLOCK_PURPOSE: &str = "evaluation_unlock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotes {
    pub task_id: String,
    pub user_id: String,
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub amount_minor: u64,
    pub currency: String,
    pub receipt: String,
    pub notes: OrderNotes,
}

/// Order as acknowledged by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrder {
    pub order_id: OrderId,
    pub amount_minor: u64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Unavailable(String),

    #[error("gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("gateway timed out")]
    Timeout,

    #[error("unexpected gateway response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, GatewayError>;
}
