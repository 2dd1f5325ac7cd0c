//! Wiring shared by the app-layer tests: in-memory store, scripted
//! collaborators, real HMAC signatures and a fixed clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use ulid::Ulid;

use super::coordinator::UnlockCoordinator;
use super::pipeline::EvaluationPipeline;
use super::settings::UnlockSettings;
use crate::domain::{GatewayPaymentId, NewTask, OrderId, TaskRecord, TaskStatus, UserId};
use crate::impls::{HmacSignatures, InMemoryStore, ScriptedEvaluator, ScriptedGateway};
use crate::ports::{FixedClock, UlidGenerator};

pub const KEY_SECRET: &str = "test_key_secret";
pub const WEBHOOK_SECRET: &str = "test_webhook_secret";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub evaluator: Arc<ScriptedEvaluator>,
    pub gateway: Arc<ScriptedGateway>,
    pub signatures: Arc<HmacSignatures>,
    pub clock: Arc<FixedClock>,
    pub settings: UnlockSettings,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Self::settings())
    }

    pub fn with_settings(settings: UnlockSettings) -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            evaluator: Arc::new(ScriptedEvaluator::default()),
            gateway: Arc::new(ScriptedGateway::new()),
            signatures: Arc::new(HmacSignatures::new(KEY_SECRET, WEBHOOK_SECRET)),
            clock: Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
            )),
            settings,
        }
    }

    /// Defaults with short retry and poll intervals.
    pub fn settings() -> UnlockSettings {
        UnlockSettings {
            capture_retry_base_ms: 1,
            status_poll_interval_ms: 5,
            status_max_wait_ms: 500,
            ..UnlockSettings::default()
        }
    }

    pub fn with_gateway_delay(mut self, delay: Duration) -> Self {
        self.gateway = Arc::new(ScriptedGateway::new().with_delay(delay));
        self
    }

    pub fn with_evaluator_delay(mut self, delay: Duration) -> Self {
        self.evaluator = Arc::new(ScriptedEvaluator::default().with_delay(delay));
        self
    }

    pub fn user() -> UserId {
        UserId::from_ulid(Ulid::new())
    }

    pub fn submission() -> NewTask {
        NewTask {
            title: "FizzBuzz".into(),
            description: "print 1..100".into(),
            code_text: "for (let i = 1; i <= 100; i++) console.log(i)".into(),
            language: None,
        }
    }

    pub fn coordinator(&self) -> UnlockCoordinator {
        UnlockCoordinator::new(
            self.store.clone(),
            self.gateway.clone(),
            self.signatures.clone(),
            self.clock.clone(),
            Arc::new(UlidGenerator::new(self.clock.clone())),
            self.settings.clone(),
        )
    }

    pub fn pipeline(&self) -> EvaluationPipeline {
        EvaluationPipeline::new(
            self.store.clone(),
            self.evaluator.clone(),
            self.clock.clone(),
            Arc::new(UlidGenerator::new(self.clock.clone())),
            self.settings.clone(),
        )
    }

    /// Submitted and evaluated task whose result is still locked.
    pub async fn locked_task(&self, owner: UserId) -> TaskRecord {
        let mut settings = self.settings.clone();
        settings.lock_unpaid_results = true;
        settings.initial_credits = 0;
        let pipeline = EvaluationPipeline::new(
            self.store.clone(),
            self.evaluator.clone(),
            self.clock.clone(),
            Arc::new(UlidGenerator::new(self.clock.clone())),
            settings,
        );
        let task = pipeline.submit_task(owner, Self::submission()).await.unwrap();
        let view = pipeline.trigger_evaluation(owner, task.id).await.unwrap();
        assert!(!view.is_unlocked);
        let details = pipeline.task_details(owner, task.id).await.unwrap();
        assert_eq!(details.task.status, TaskStatus::Locked);
        details.task
    }

    pub fn sign(&self, order_id: &OrderId, payment_id: &GatewayPaymentId) -> String {
        self.signatures.sign_payment(order_id, payment_id).unwrap()
    }

    /// Serialized webhook body and its signature header value.
    pub fn webhook(&self, event: &serde_json::Value) -> (Vec<u8>, String) {
        let body = serde_json::to_vec(event).unwrap();
        let signature = self.signatures.sign_webhook(&body).unwrap();
        (body, signature)
    }
}
