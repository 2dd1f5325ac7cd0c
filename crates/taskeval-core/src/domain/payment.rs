//! Payment attempts and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{GatewayPaymentId, OrderId, PaymentId, TaskId, UserId};

/// Gateway receipts are capped at 40 characters.
pub const MAX_RECEIPT_LEN: usize = 40;

/// Payment attempt status.
///
/// State transitions:
/// - Created -> Attempted | Paid | Failed
/// - Attempted -> Paid | Failed
/// - Paid -> Refunded
///
/// Failed and Refunded are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Attempted,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Created,
        PaymentStatus::Attempted,
        PaymentStatus::Paid,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    /// Statuses that still block a new order for the same (user, task).
    pub const UNRESOLVED: [PaymentStatus; 2] = [PaymentStatus::Created, PaymentStatus::Attempted];

    pub fn is_unresolved(self) -> bool {
        Self::UNRESOLVED.contains(&self)
    }

    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Created, Attempted)
                | (Created, Paid)
                | (Created, Failed)
                | (Attempted, Paid)
                | (Attempted, Failed)
                | (Paid, Refunded)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Attempted => "attempted",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown payment status: {s}"))
    }
}

/// Which acknowledgement path observed the gateway outcome. Audit only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckSource {
    ClientVerify,
    Webhook,
}

impl AckSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AckSource::ClientVerify => "client_verify",
            AckSource::Webhook => "webhook",
        }
    }
}

impl fmt::Display for AckSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One order requested from the gateway for a (user, task) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: PaymentId,
    pub owner: UserId,
    pub task_id: TaskId,
    pub order_id: OrderId,
    pub gateway_payment_id: Option<GatewayPaymentId>,
    pub signature: Option<String>,
    /// Amount in minor currency units (paise for INR).
    pub amount_minor: u64,
    pub currency: String,
    pub receipt: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentAttempt {
    #[allow(clippy::too_many_arguments)]
    pub fn created(
        id: PaymentId,
        owner: UserId,
        task_id: TaskId,
        order_id: OrderId,
        amount_minor: u64,
        currency: impl Into<String>,
        receipt: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            task_id,
            order_id,
            gateway_payment_id: None,
            signature: None,
            amount_minor,
            currency: currency.into(),
            receipt: receipt.into(),
            status: PaymentStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A confirmed payment observed by one of the acknowledgement paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCapture {
    pub order_id: OrderId,
    pub gateway_payment_id: Option<GatewayPaymentId>,
    pub signature: Option<String>,
    pub source: AckSource,
}

/// How a capture landed in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The attempt moved to paid and the evaluation was unlocked.
    Applied,
    /// Someone else got there first; nothing changed.
    AlreadyPaid,
    /// The attempt is in a status that cannot become paid.
    Rejected(PaymentStatus),
}

/// Receipt id for a new order: `rcpt_<task suffix>_<millis suffix>`.
pub fn receipt_for(task_id: TaskId, now: DateTime<Utc>) -> String {
    let ulid = task_id.as_ulid().to_string();
    let suffix = &ulid[ulid.len() - 10..];
    let millis = now.timestamp_millis().rem_euclid(1_000_000);
    let mut receipt = format!("rcpt_{suffix}_{millis:06}");
    receipt.truncate(MAX_RECEIPT_LEN);
    receipt
}

/// Convert a major-unit amount (rupees) into minor units (paise).
pub fn to_minor_units(amount: f64) -> Option<u64> {
    if !amount.is_finite() || amount <= 0.0 {
        return None;
    }
    let minor = (amount * 100.0).round();
    if minor < 1.0 || minor > u64::MAX as f64 {
        return None;
    }
    Some(minor as u64)
}
