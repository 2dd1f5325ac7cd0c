//! Scripted collaborators for offline development and tests.
//!
//! They answer from a queue of canned responses and fall back to a fixed
//! default once the queue is empty.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ulid::Ulid;

use crate::domain::{EvaluationReport, OrderId};
use crate::ports::{
    EvaluationRequest, Evaluator, EvaluatorError, GatewayError, GatewayOrder, OrderRequest,
    PaymentGateway,
};

enum EvaluatorStep {
    Report(EvaluationReport),
    Raw(String),
    Fail(EvaluatorError),
}

pub struct ScriptedEvaluator {
    steps: Mutex<VecDeque<EvaluatorStep>>,
    fallback: EvaluationReport,
    delay: Option<Duration>,
    seen: Mutex<Vec<EvaluationRequest>>,
}

impl ScriptedEvaluator {
    pub fn new(fallback: EvaluationReport) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_report(&self, report: EvaluationReport) {
        self.push(EvaluatorStep::Report(report));
    }

    /// Raw model output, validated like a real response.
    pub fn push_raw(&self, raw: impl Into<String>) {
        self.push(EvaluatorStep::Raw(raw.into()));
    }

    pub fn push_failure(&self, err: EvaluatorError) {
        self.push(EvaluatorStep::Fail(err));
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<EvaluationRequest> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, step: EvaluatorStep) {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
    }
}

impl Default for ScriptedEvaluator {
    fn default() -> Self {
        Self::new(EvaluationReport {
            score: 7.0,
            strengths: vec![
                "Readable structure".to_string(),
                "Sensible naming".to_string(),
            ],
            improvements: vec![
                "Add tests for edge cases".to_string(),
                "Handle invalid input explicitly".to_string(),
            ],
            summary: "Solid submission with room to harden edge cases.".to_string(),
        })
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationReport, EvaluatorError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let step = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match step {
            Some(EvaluatorStep::Report(report)) => Ok(report),
            Some(EvaluatorStep::Raw(raw)) => Ok(EvaluationReport::from_model_output(&raw)?),
            Some(EvaluatorStep::Fail(err)) => Err(err),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Gateway that mints `order_<ulid>` ids locally.
#[derive(Default)]
pub struct ScriptedGateway {
    failures: Mutex<VecDeque<GatewayError>>,
    delay: Option<Duration>,
    orders: Mutex<Vec<OrderRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_next(&self, err: GatewayError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(err);
    }

    /// Orders successfully created so far.
    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, GatewayError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        Ok(GatewayOrder {
            order_id: OrderId::new(format!("order_{}", Ulid::new())),
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
        })
    }
}
