//! UnlockCoordinator - payment orders and the reconciliation of their
//! acknowledgements.
//!
//! Two paths report the same gateway outcome: the client calls back after
//! checkout, and the gateway delivers a webhook. They can race, repeat or
//! arrive in either order. Both end in `reconcile`, whose store write is a
//! single conditional transaction, so whichever lands second sees
//! `AlreadyPaid` and succeeds without side effects.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::settings::UnlockSettings;
use super::webhook::{GatewayEvent, parse_event};
use crate::domain::payment::{receipt_for, to_minor_units};
use crate::domain::{
    AckSource, CaptureOutcome, GatewayPaymentId, OrderId, PaymentAttempt, PaymentCapture,
    PaymentStatus, TaskId, UnlockError, UserId,
};
use crate::ports::{
    AttemptChange, Clock, IdGenerator, OrderNotes, OrderRequest, PaymentGateway,
    SignatureVerifier, StoreError, UNLOCK_PURPOSE, UnlockStore,
};

/// Order handed back to the client for checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order_id: OrderId,
    /// Minor units.
    pub amount: u64,
    pub currency: String,
}

/// Successful confirmation. Both variants mean the evaluation is unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// This call recorded the payment.
    Unlocked,
    /// The payment was already recorded; nothing changed.
    AlreadyPaid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEffect {
    Confirmed(Confirmation),
    MarkedAttempted,
    MarkedFailed,
    MarkedRefunded,
    /// Acknowledged without a state change.
    Ignored { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookAck {
    pub event: String,
    pub effect: WebhookEffect,
}

pub struct UnlockCoordinator {
    store: Arc<dyn UnlockStore>,
    gateway: Arc<dyn PaymentGateway>,
    signatures: Arc<dyn SignatureVerifier>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    settings: UnlockSettings,
}

impl UnlockCoordinator {
    pub fn new(
        store: Arc<dyn UnlockStore>,
        gateway: Arc<dyn PaymentGateway>,
        signatures: Arc<dyn SignatureVerifier>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        settings: UnlockSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            signatures,
            clock,
            ids,
            settings,
        }
    }

    /// Request a gateway order to unlock `task_id`'s evaluation.
    ///
    /// `amount` is in major units; `None` uses the configured price. Nothing
    /// is written when the gateway fails. Two concurrent calls for the same
    /// task leave one attempt; the other caller gets `Conflict`.
    pub async fn create_order(
        &self,
        user: UserId,
        task_id: TaskId,
        amount: Option<f64>,
    ) -> Result<CreatedOrder, UnlockError> {
        let amount = amount.unwrap_or(self.settings.default_amount);
        let amount_minor = to_minor_units(amount).ok_or_else(|| {
            UnlockError::InvalidInput(format!("amount must be positive, got {amount}"))
        })?;

        let task = self
            .store
            .get_task(task_id)
            .await?
            .filter(|task| task.is_owned_by(user))
            .ok_or_else(|| UnlockError::not_found(format!("task {task_id}")))?;
        let evaluation = self
            .store
            .get_evaluation(task.id)
            .await?
            .ok_or_else(|| UnlockError::not_found(format!("evaluation for task {task_id}")))?;
        if evaluation.unlocked {
            return Err(UnlockError::conflict("evaluation is already unlocked"));
        }
        let open = self
            .store
            .list_attempts(user)
            .await?
            .into_iter()
            .any(|attempt| attempt.task_id == task_id && attempt.status.is_unresolved());
        if open {
            return Err(UnlockError::conflict(
                "an unresolved payment already exists for this task",
            ));
        }

        let now = self.clock.now();
        let request = OrderRequest {
            amount_minor,
            currency: self.settings.currency.clone(),
            receipt: receipt_for(task_id, now),
            notes: OrderNotes {
                task_id: task_id.to_string(),
                user_id: user.to_string(),
                purpose: UNLOCK_PURPOSE.to_string(),
            },
        };
        let order = match tokio::time::timeout(
            self.settings.gateway_timeout(),
            self.gateway.create_order(&request),
        )
        .await
        {
            Ok(Ok(order)) => order,
            Ok(Err(err)) => {
                warn!(task_id = %task_id, error = %err, "gateway order creation failed");
                return Err(UnlockError::GatewayError(err.to_string()));
            }
            Err(_) => {
                warn!(task_id = %task_id, "gateway order creation timed out");
                return Err(UnlockError::GatewayError(
                    "order creation timed out".to_string(),
                ));
            }
        };

        let attempt = PaymentAttempt::created(
            self.ids.generate_payment_id(),
            user,
            task_id,
            order.order_id.clone(),
            order.amount_minor,
            order.currency.clone(),
            request.receipt,
            now,
        );
        self.store
            .insert_attempt(attempt)
            .await
            .map_err(|err| match err {
                StoreError::Conflict(why) => {
                    info!(task_id = %task_id, order_id = %order.order_id, %why, "lost order race");
                    UnlockError::conflict("an unresolved payment already exists for this task")
                }
                other => other.into(),
            })?;

        info!(
            task_id = %task_id,
            order_id = %order.order_id,
            amount = order.amount_minor,
            "payment order created"
        );
        Ok(CreatedOrder {
            order_id: order.order_id,
            amount: order.amount_minor,
            currency: order.currency,
        })
    }

    /// Authenticate a payment acknowledgement and record it.
    ///
    /// Idempotent: confirming an already paid order succeeds with
    /// `AlreadyPaid`. `source` is recorded in logs only.
    pub async fn confirm_payment(
        &self,
        order_id: &OrderId,
        payment_id: &GatewayPaymentId,
        signature: &str,
        source: AckSource,
    ) -> Result<Confirmation, UnlockError> {
        self.check_payment_signature(order_id, payment_id, signature, source)?;
        self.reconcile(PaymentCapture {
            order_id: order_id.clone(),
            gateway_payment_id: Some(payment_id.clone()),
            signature: Some(signature.to_string()),
            source,
        })
        .await
    }

    /// Client callback after checkout.
    ///
    /// The order must belong to `user` and reference `task_id`; anything
    /// else is reported as `NotFound`.
    pub async fn verify_client_payment(
        &self,
        user: UserId,
        task_id: TaskId,
        order_id: &OrderId,
        payment_id: &GatewayPaymentId,
        signature: &str,
    ) -> Result<Confirmation, UnlockError> {
        self.check_payment_signature(order_id, payment_id, signature, AckSource::ClientVerify)?;

        let attempt = self
            .store
            .find_attempt(order_id)
            .await?
            .filter(|attempt| attempt.owner == user && attempt.task_id == task_id)
            .ok_or_else(|| UnlockError::not_found(format!("order {order_id}")))?;

        self.reconcile(PaymentCapture {
            order_id: attempt.order_id,
            gateway_payment_id: Some(payment_id.clone()),
            signature: Some(signature.to_string()),
            source: AckSource::ClientVerify,
        })
        .await
    }

    /// Handle a webhook delivery.
    ///
    /// The body is parsed only after its signature checks out. Signed bodies
    /// that do not parse, unknown orders and refused transitions are all
    /// acknowledged so the gateway stops redelivering; store failures are
    /// returned.
    pub async fn handle_gateway_event(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, UnlockError> {
        let Some(signature) = signature.filter(|s| !s.is_empty()) else {
            warn!("webhook delivered without a signature");
            return Err(UnlockError::InvalidSignature);
        };
        if !self.signatures.verify_webhook(body, signature) {
            warn!(bytes = body.len(), "webhook signature mismatch");
            return Err(UnlockError::InvalidSignature);
        }
        let event = match parse_event(body) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, bytes = body.len(), "signed webhook body did not parse");
                return Ok(WebhookAck {
                    event: err.event().to_string(),
                    effect: WebhookEffect::Ignored {
                        reason: err.to_string(),
                    },
                });
            }
        };
        let name = event.name().to_string();
        debug!(event = %name, order_id = ?event.order_id(), "webhook received");

        let result = match event {
            GatewayEvent::PaymentCaptured {
                order_id,
                payment_id,
            } => self
                .reconcile(webhook_capture(order_id, Some(payment_id)))
                .await
                .map(WebhookEffect::Confirmed),
            GatewayEvent::OrderPaid {
                order_id,
                payment_id,
            } => self
                .reconcile(webhook_capture(order_id, payment_id))
                .await
                .map(WebhookEffect::Confirmed),
            GatewayEvent::PaymentAuthorized {
                order_id,
                payment_id,
            } => {
                self.advance(
                    &order_id,
                    PaymentStatus::Attempted,
                    Some(&payment_id),
                    WebhookEffect::MarkedAttempted,
                )
                .await
            }
            GatewayEvent::PaymentFailed {
                order_id,
                payment_id,
            } => {
                self.advance(
                    &order_id,
                    PaymentStatus::Failed,
                    payment_id.as_ref(),
                    WebhookEffect::MarkedFailed,
                )
                .await
            }
            GatewayEvent::PaymentRefunded { order_id } => {
                self.advance(&order_id, PaymentStatus::Refunded, None, WebhookEffect::MarkedRefunded)
                    .await
            }
            GatewayEvent::Other(_) => Ok(WebhookEffect::Ignored {
                reason: "unhandled event".to_string(),
            }),
        };

        let effect = match result {
            Ok(effect) => effect,
            Err(err @ (UnlockError::NotFound(_) | UnlockError::InvalidTransition { .. })) => {
                info!(event = %name, error = %err, "webhook acknowledged without effect");
                WebhookEffect::Ignored {
                    reason: err.to_string(),
                }
            }
            Err(err) => return Err(err),
        };
        Ok(WebhookAck {
            event: name,
            effect,
        })
    }

    fn check_payment_signature(
        &self,
        order_id: &OrderId,
        payment_id: &GatewayPaymentId,
        signature: &str,
        source: AckSource,
    ) -> Result<(), UnlockError> {
        if self.signatures.verify_payment(order_id, payment_id, signature) {
            return Ok(());
        }
        warn!(
            order_id = %order_id,
            payment_id = %payment_id,
            source = %source,
            "payment signature mismatch"
        );
        Err(UnlockError::InvalidSignature)
    }

    /// Record a capture, retrying store failures with backoff.
    async fn reconcile(&self, capture: PaymentCapture) -> Result<Confirmation, UnlockError> {
        let policy = self.settings.capture_retry();
        let store = &self.store;
        let clock = &self.clock;
        let capture = &capture;

        let outcome = policy
            .run(
                move |attempt| async move {
                    if attempt > 1 {
                        debug!(order_id = %capture.order_id, attempt, "retrying capture");
                    }
                    store
                        .apply_capture(capture, clock.now())
                        .await
                        .map_err(UnlockError::from)
                },
                UnlockError::is_retryable,
            )
            .await
            .inspect_err(|err| {
                if matches!(err, UnlockError::PersistenceError(_)) {
                    error!(order_id = %capture.order_id, error = %err, "could not record payment");
                }
            })?;

        match outcome {
            CaptureOutcome::Applied => {
                info!(
                    order_id = %capture.order_id,
                    source = %capture.source,
                    "payment confirmed, evaluation unlocked"
                );
                Ok(Confirmation::Unlocked)
            }
            CaptureOutcome::AlreadyPaid => {
                debug!(order_id = %capture.order_id, source = %capture.source, "payment already recorded");
                Ok(Confirmation::AlreadyPaid)
            }
            CaptureOutcome::Rejected(status) => {
                warn!(order_id = %capture.order_id, %status, "capture for a closed attempt");
                Err(UnlockError::invalid_transition(status, PaymentStatus::Paid))
            }
        }
    }

    async fn advance(
        &self,
        order_id: &OrderId,
        to: PaymentStatus,
        payment_id: Option<&GatewayPaymentId>,
        effect: WebhookEffect,
    ) -> Result<WebhookEffect, UnlockError> {
        match self
            .store
            .advance_attempt(order_id, to, payment_id, self.clock.now())
            .await?
        {
            AttemptChange::Applied => {
                info!(order_id = %order_id, status = %to, "payment attempt updated");
                Ok(effect)
            }
            AttemptChange::AlreadyThere => Ok(WebhookEffect::Ignored {
                reason: format!("already {to}"),
            }),
            AttemptChange::Rejected(from) => Err(UnlockError::invalid_transition(from, to)),
        }
    }
}

fn webhook_capture(order_id: OrderId, payment_id: Option<GatewayPaymentId>) -> PaymentCapture {
    PaymentCapture {
        order_id,
        gateway_payment_id: payment_id,
        signature: None,
        source: AckSource::Webhook,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testkit::Harness;
    use crate::domain::TaskStatus;
    use crate::ports::{AccountDirectory, EvaluationStore, GatewayError, PaymentLedger, TaskStore};
    use serde_json::json;
    use std::time::Duration;

    fn captured(order_id: &OrderId, payment: &str) -> serde_json::Value {
        json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": payment, "order_id": order_id.as_str()}}}
        })
    }

    fn payment_event(event: &str, order_id: &OrderId) -> serde_json::Value {
        json!({
            "event": event,
            "payload": {"payment": {"entity": {"id": "pay_evt", "order_id": order_id.as_str()}}}
        })
    }

    #[tokio::test]
    async fn order_then_verify_unlocks_everything() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;

        let order = coordinator.create_order(user, task.id, None).await.unwrap();
        assert_eq!(order.amount, 1000);
        assert_eq!(order.currency, "INR");
        let sent = h.gateway.orders();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].notes.task_id, task.id.to_string());
        assert_eq!(sent[0].notes.purpose, UNLOCK_PURPOSE);

        let payment = GatewayPaymentId::new("pay_1");
        let signature = h.sign(&order.order_id, &payment);
        let confirmed = coordinator
            .verify_client_payment(user, task.id, &order.order_id, &payment, &signature)
            .await
            .unwrap();
        assert_eq!(confirmed, Confirmation::Unlocked);

        let attempt = h.store.find_attempt(&order.order_id).await.unwrap().unwrap();
        assert_eq!(attempt.status, PaymentStatus::Paid);
        assert_eq!(attempt.gateway_payment_id, Some(payment));
        assert_eq!(attempt.signature, Some(signature));
        assert!(h.store.get_evaluation(task.id).await.unwrap().unwrap().unlocked);
        assert_eq!(
            h.store.get_task(task.id).await.unwrap().unwrap().status,
            TaskStatus::Evaluated
        );
        assert!(h.store.get_account(user).await.unwrap().unwrap().is_premium);
    }

    #[tokio::test]
    async fn double_confirmation_is_idempotent() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;
        let order = coordinator.create_order(user, task.id, Some(5.0)).await.unwrap();
        let payment = GatewayPaymentId::new("pay_twice");
        let signature = h.sign(&order.order_id, &payment);

        let (a, b) = tokio::join!(
            coordinator.confirm_payment(&order.order_id, &payment, &signature, AckSource::ClientVerify),
            coordinator.confirm_payment(&order.order_id, &payment, &signature, AckSource::Webhook),
        );
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|c| *c == Confirmation::AlreadyPaid);
        assert_eq!(outcomes, vec![Confirmation::Unlocked, Confirmation::AlreadyPaid]);

        let again = coordinator
            .confirm_payment(&order.order_id, &payment, &signature, AckSource::ClientVerify)
            .await
            .unwrap();
        assert_eq!(again, Confirmation::AlreadyPaid);
        assert!(h.store.get_evaluation(task.id).await.unwrap().unwrap().unlocked);
    }

    #[tokio::test]
    async fn tampered_signature_changes_nothing() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;
        let order = coordinator.create_order(user, task.id, None).await.unwrap();
        let payment = GatewayPaymentId::new("pay_1");
        let forged = h.sign(&order.order_id, &GatewayPaymentId::new("pay_other"));

        let err = coordinator
            .confirm_payment(&order.order_id, &payment, &forged, AckSource::ClientVerify)
            .await
            .unwrap_err();
        assert_eq!(err, UnlockError::InvalidSignature);

        let attempt = h.store.find_attempt(&order.order_id).await.unwrap().unwrap();
        assert_eq!(attempt.status, PaymentStatus::Created);
        assert!(!h.store.get_evaluation(task.id).await.unwrap().unwrap().unlocked);
        assert_eq!(
            h.store.get_task(task.id).await.unwrap().unwrap().status,
            TaskStatus::Locked
        );
    }

    #[tokio::test]
    async fn unknown_order_is_not_found_after_signature() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let order = OrderId::new("order_ghost");
        let payment = GatewayPaymentId::new("pay_ghost");
        let signature = h.sign(&order, &payment);

        let err = coordinator
            .confirm_payment(&order, &payment, &signature, AckSource::ClientVerify)
            .await
            .unwrap_err();
        assert!(matches!(err, UnlockError::NotFound(_)));
    }

    #[tokio::test]
    async fn client_verify_rejects_foreign_orders() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;
        let other_task = h.locked_task(user).await;
        let order = coordinator.create_order(user, task.id, None).await.unwrap();
        let payment = GatewayPaymentId::new("pay_1");
        let signature = h.sign(&order.order_id, &payment);

        let stranger = Harness::user();
        let err = coordinator
            .verify_client_payment(stranger, task.id, &order.order_id, &payment, &signature)
            .await
            .unwrap_err();
        assert!(matches!(err, UnlockError::NotFound(_)));

        let err = coordinator
            .verify_client_payment(user, other_task.id, &order.order_id, &payment, &signature)
            .await
            .unwrap_err();
        assert!(matches!(err, UnlockError::NotFound(_)));

        let attempt = h.store.find_attempt(&order.order_id).await.unwrap().unwrap();
        assert_eq!(attempt.status, PaymentStatus::Created);
    }

    #[tokio::test]
    async fn webhook_before_client_verify() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;
        let order = coordinator.create_order(user, task.id, None).await.unwrap();

        let (body, signature) = h.webhook(&captured(&order.order_id, "pay_w"));
        let ack = coordinator
            .handle_gateway_event(&body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(ack.event, "payment.captured");
        assert_eq!(ack.effect, WebhookEffect::Confirmed(Confirmation::Unlocked));
        let attempt = h.store.find_attempt(&order.order_id).await.unwrap().unwrap();
        assert_eq!(attempt.gateway_payment_id, Some(GatewayPaymentId::new("pay_w")));
        assert_eq!(attempt.signature, None);

        let payment = GatewayPaymentId::new("pay_w");
        let client_sig = h.sign(&order.order_id, &payment);
        let confirmed = coordinator
            .verify_client_payment(user, task.id, &order.order_id, &payment, &client_sig)
            .await
            .unwrap();
        assert_eq!(confirmed, Confirmation::AlreadyPaid);
        assert!(h.store.get_evaluation(task.id).await.unwrap().unwrap().unlocked);
    }

    #[tokio::test]
    async fn concurrent_orders_leave_one_attempt() {
        let h = Harness::new().with_gateway_delay(Duration::from_millis(20));
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;

        let (a, b) = tokio::join!(
            coordinator.create_order(user, task.id, None),
            coordinator.create_order(user, task.id, None),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(UnlockError::Conflict(_))))
        );
        assert_eq!(h.store.list_attempts(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_attempt_blocks_new_order() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;

        coordinator.create_order(user, task.id, None).await.unwrap();
        let err = coordinator.create_order(user, task.id, None).await.unwrap_err();
        assert!(matches!(err, UnlockError::Conflict(_)));
        assert_eq!(h.gateway.orders().len(), 1);
    }

    #[tokio::test]
    async fn failed_attempt_allows_a_new_order() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;
        let first = coordinator.create_order(user, task.id, None).await.unwrap();

        let (body, signature) = h.webhook(&payment_event("payment.failed", &first.order_id));
        let ack = coordinator
            .handle_gateway_event(&body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(ack.effect, WebhookEffect::MarkedFailed);
        let attempt = h.store.find_attempt(&first.order_id).await.unwrap().unwrap();
        assert_eq!(attempt.status, PaymentStatus::Failed);
        assert_eq!(
            attempt.gateway_payment_id,
            Some(GatewayPaymentId::new("pay_evt"))
        );

        let second = coordinator.create_order(user, task.id, None).await.unwrap();
        assert_ne!(first.order_id, second.order_id);
    }

    #[tokio::test]
    async fn order_preconditions() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;

        let err = coordinator.create_order(user, task.id, Some(0.0)).await.unwrap_err();
        assert!(matches!(err, UnlockError::InvalidInput(_)));
        let err = coordinator.create_order(user, task.id, Some(-3.0)).await.unwrap_err();
        assert!(matches!(err, UnlockError::InvalidInput(_)));

        let err = coordinator
            .create_order(Harness::user(), task.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, UnlockError::NotFound(_)));

        let pending = h
            .pipeline()
            .submit_task(user, Harness::submission())
            .await
            .unwrap();
        let err = coordinator.create_order(user, pending.id, None).await.unwrap_err();
        assert!(matches!(err, UnlockError::NotFound(_)));

        assert!(h.gateway.orders().is_empty());
    }

    #[tokio::test]
    async fn unlocked_evaluation_cannot_be_bought_again() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;
        let order = coordinator.create_order(user, task.id, None).await.unwrap();
        let payment = GatewayPaymentId::new("pay_1");
        let signature = h.sign(&order.order_id, &payment);
        coordinator
            .confirm_payment(&order.order_id, &payment, &signature, AckSource::ClientVerify)
            .await
            .unwrap();

        let err = coordinator.create_order(user, task.id, None).await.unwrap_err();
        assert!(matches!(err, UnlockError::Conflict(_)));
    }

    #[tokio::test]
    async fn gateway_failure_writes_nothing() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;
        h.gateway.fail_next(GatewayError::Rejected {
            status: 400,
            message: "bad receipt".into(),
        });

        let err = coordinator.create_order(user, task.id, None).await.unwrap_err();
        assert!(matches!(err, UnlockError::GatewayError(_)));
        assert!(h.store.list_attempts(user).await.unwrap().is_empty());

        coordinator.create_order(user, task.id, None).await.unwrap();
    }

    #[tokio::test]
    async fn slow_gateway_times_out() {
        let mut settings = Harness::settings();
        settings.gateway_timeout_ms = 10;
        let h = Harness::with_settings(settings).with_gateway_delay(Duration::from_millis(200));
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;

        let err = coordinator.create_order(user, task.id, None).await.unwrap_err();
        assert!(matches!(err, UnlockError::GatewayError(_)));
        assert!(h.store.list_attempts(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failures_are_retried() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;
        let order = coordinator.create_order(user, task.id, None).await.unwrap();
        let payment = GatewayPaymentId::new("pay_1");
        let signature = h.sign(&order.order_id, &payment);

        h.store.fail_next_captures(2);
        let confirmed = coordinator
            .confirm_payment(&order.order_id, &payment, &signature, AckSource::ClientVerify)
            .await
            .unwrap();
        assert_eq!(confirmed, Confirmation::Unlocked);
    }

    #[tokio::test]
    async fn persistent_store_failure_surfaces_and_commits_nothing() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;
        let order = coordinator.create_order(user, task.id, None).await.unwrap();
        let payment = GatewayPaymentId::new("pay_1");
        let signature = h.sign(&order.order_id, &payment);

        h.store.fail_next_captures(10);
        let err = coordinator
            .confirm_payment(&order.order_id, &payment, &signature, AckSource::ClientVerify)
            .await
            .unwrap_err();
        assert!(matches!(err, UnlockError::PersistenceError(_)));
        let attempt = h.store.find_attempt(&order.order_id).await.unwrap().unwrap();
        assert_eq!(attempt.status, PaymentStatus::Created);
        assert!(!h.store.get_evaluation(task.id).await.unwrap().unwrap().unlocked);
    }

    #[tokio::test]
    async fn webhook_signature_is_checked_before_parsing() {
        let h = Harness::new();
        let coordinator = h.coordinator();

        let err = coordinator
            .handle_gateway_event(b"not even json", None)
            .await
            .unwrap_err();
        assert_eq!(err, UnlockError::InvalidSignature);

        let err = coordinator
            .handle_gateway_event(b"not even json", Some("00ff"))
            .await
            .unwrap_err();
        assert_eq!(err, UnlockError::InvalidSignature);

        let body = b"not even json".to_vec();
        let signature = h.signatures.sign_webhook(&body).unwrap();
        let ack = coordinator
            .handle_gateway_event(&body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(ack.event, "unparsable");
        assert!(matches!(ack.effect, WebhookEffect::Ignored { .. }));
    }

    #[tokio::test]
    async fn signed_event_missing_its_order_is_acknowledged() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;
        let order = coordinator.create_order(user, task.id, None).await.unwrap();

        let (body, signature) = h.webhook(&json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": "pay_1"}}}
        }));
        let ack = coordinator
            .handle_gateway_event(&body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(ack.event, "payment.captured");
        assert!(matches!(ack.effect, WebhookEffect::Ignored { .. }));

        let attempt = h.store.find_attempt(&order.order_id).await.unwrap().unwrap();
        assert_eq!(attempt.status, PaymentStatus::Created);
    }

    #[tokio::test]
    async fn webhook_for_unknown_order_is_acknowledged() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let (body, signature) = h.webhook(&captured(&OrderId::new("order_nope"), "pay_x"));

        let ack = coordinator
            .handle_gateway_event(&body, Some(&signature))
            .await
            .unwrap();
        assert!(matches!(ack.effect, WebhookEffect::Ignored { .. }));
    }

    #[tokio::test]
    async fn capture_after_failure_is_ignored() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;
        let order = coordinator.create_order(user, task.id, None).await.unwrap();

        let (body, signature) = h.webhook(&payment_event("payment.failed", &order.order_id));
        coordinator
            .handle_gateway_event(&body, Some(&signature))
            .await
            .unwrap();
        let (body, signature) = h.webhook(&captured(&order.order_id, "pay_late"));
        let ack = coordinator
            .handle_gateway_event(&body, Some(&signature))
            .await
            .unwrap();
        assert!(matches!(ack.effect, WebhookEffect::Ignored { .. }));
        assert!(!h.store.get_evaluation(task.id).await.unwrap().unwrap().unlocked);

        let payment = GatewayPaymentId::new("pay_late");
        let client_sig = h.sign(&order.order_id, &payment);
        let err = coordinator
            .confirm_payment(&order.order_id, &payment, &client_sig, AckSource::ClientVerify)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            UnlockError::invalid_transition(PaymentStatus::Failed, PaymentStatus::Paid)
        );
    }

    #[tokio::test]
    async fn authorize_pay_refund_sequence() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let user = Harness::user();
        let task = h.locked_task(user).await;
        let order = coordinator.create_order(user, task.id, None).await.unwrap();

        let (body, sig) = h.webhook(&payment_event("payment.authorized", &order.order_id));
        let ack = coordinator.handle_gateway_event(&body, Some(&sig)).await.unwrap();
        assert_eq!(ack.effect, WebhookEffect::MarkedAttempted);

        let (body, sig) = h.webhook(&json!({
            "event": "order.paid",
            "payload": {
                "order": {"entity": {"id": order.order_id.as_str()}},
                "payment": {"entity": {"id": "pay_evt", "order_id": order.order_id.as_str()}}
            }
        }));
        let ack = coordinator.handle_gateway_event(&body, Some(&sig)).await.unwrap();
        assert_eq!(ack.effect, WebhookEffect::Confirmed(Confirmation::Unlocked));

        let (body, sig) = h.webhook(&payment_event("payment.refunded", &order.order_id));
        let ack = coordinator.handle_gateway_event(&body, Some(&sig)).await.unwrap();
        assert_eq!(ack.effect, WebhookEffect::MarkedRefunded);

        let attempt = h.store.find_attempt(&order.order_id).await.unwrap().unwrap();
        assert_eq!(attempt.status, PaymentStatus::Refunded);
        assert!(h.store.get_evaluation(task.id).await.unwrap().unwrap().unlocked);
        assert_eq!(
            h.store.get_task(task.id).await.unwrap().unwrap().status,
            TaskStatus::Evaluated
        );
    }

    #[tokio::test]
    async fn unknown_events_are_accepted() {
        let h = Harness::new();
        let coordinator = h.coordinator();
        let (body, sig) = h.webhook(&json!({"event": "refund.created", "payload": {}}));

        let ack = coordinator.handle_gateway_event(&body, Some(&sig)).await.unwrap();
        assert_eq!(ack.event, "refund.created");
        assert!(matches!(ack.effect, WebhookEffect::Ignored { .. }));
    }
}
