//! Gateway webhook payloads.
//!
//! Only parsed after the body signature has been verified.

use serde::Deserialize;

use crate::domain::{GatewayPaymentId, OrderId};

/// Webhook event the coordinator knows how to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    PaymentAuthorized {
        order_id: OrderId,
        payment_id: GatewayPaymentId,
    },
    PaymentCaptured {
        order_id: OrderId,
        payment_id: GatewayPaymentId,
    },
    PaymentFailed {
        order_id: OrderId,
        payment_id: Option<GatewayPaymentId>,
    },
    PaymentRefunded {
        order_id: OrderId,
    },
    OrderPaid {
        order_id: OrderId,
        payment_id: Option<GatewayPaymentId>,
    },
    /// Anything else; acknowledged without effect.
    Other(String),
}

impl GatewayEvent {
    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::PaymentAuthorized { .. } => "payment.authorized",
            GatewayEvent::PaymentCaptured { .. } => "payment.captured",
            GatewayEvent::PaymentFailed { .. } => "payment.failed",
            GatewayEvent::PaymentRefunded { .. } => "payment.refunded",
            GatewayEvent::OrderPaid { .. } => "order.paid",
            GatewayEvent::Other(name) => name,
        }
    }

    pub fn order_id(&self) -> Option<&OrderId> {
        match self {
            GatewayEvent::PaymentAuthorized { order_id, .. }
            | GatewayEvent::PaymentCaptured { order_id, .. }
            | GatewayEvent::PaymentFailed { order_id, .. }
            | GatewayEvent::PaymentRefunded { order_id }
            | GatewayEvent::OrderPaid { order_id, .. } => Some(order_id),
            GatewayEvent::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WebhookParseError {
    #[error("webhook body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("{event} is missing {field}")]
    MissingField {
        event: String,
        field: &'static str,
    },
}

impl WebhookParseError {
    /// Event name to acknowledge the delivery under.
    pub fn event(&self) -> &str {
        match self {
            WebhookParseError::InvalidJson(_) => "unparsable",
            WebhookParseError::MissingField { event, .. } => event,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    payment: Option<Wrapped<PaymentEntity>>,
    #[serde(default)]
    order: Option<Wrapped<OrderEntity>>,
}

#[derive(Debug, Deserialize)]
struct Wrapped<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    #[serde(default)]
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderEntity {
    id: String,
}

pub fn parse_event(body: &[u8]) -> Result<GatewayEvent, WebhookParseError> {
    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| WebhookParseError::InvalidJson(e.to_string()))?;
    let event = envelope.event;
    let payment = envelope.payload.payment.map(|w| w.entity);
    let order = envelope.payload.order.map(|w| w.entity);

    let missing = |field| WebhookParseError::MissingField {
        event: event.clone(),
        field,
    };
    let payment_order = |payment: &Option<PaymentEntity>| {
        payment
            .as_ref()
            .and_then(|p| p.order_id.clone())
            .filter(|id| !id.is_empty())
            .map(OrderId::new)
    };

    let parsed = match event.as_str() {
        "payment.authorized" | "payment.captured" => {
            let order_id = payment_order(&payment).ok_or_else(|| missing("payment.order_id"))?;
            let payment_id = payment
                .map(|p| GatewayPaymentId::new(p.id))
                .ok_or_else(|| missing("payment.id"))?;
            if event == "payment.authorized" {
                GatewayEvent::PaymentAuthorized {
                    order_id,
                    payment_id,
                }
            } else {
                GatewayEvent::PaymentCaptured {
                    order_id,
                    payment_id,
                }
            }
        }
        "payment.failed" => GatewayEvent::PaymentFailed {
            order_id: payment_order(&payment).ok_or_else(|| missing("payment.order_id"))?,
            payment_id: payment.map(|p| GatewayPaymentId::new(p.id)),
        },
        "payment.refunded" => GatewayEvent::PaymentRefunded {
            order_id: payment_order(&payment).ok_or_else(|| missing("payment.order_id"))?,
        },
        "order.paid" => {
            let order_id = order
                .map(|o| OrderId::new(o.id))
                .or_else(|| payment_order(&payment))
                .ok_or_else(|| missing("order.id"))?;
            GatewayEvent::OrderPaid {
                order_id,
                payment_id: payment.map(|p| GatewayPaymentId::new(p.id)),
            }
        }
        _ => GatewayEvent::Other(event.clone()),
    };
    Ok(parsed)
}
