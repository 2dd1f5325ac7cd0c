//! AppBuilder - wiring of the store, collaborators and settings.
//!
//! `build()` fails fast: every missing component is reported at once, and
//! invalid settings are rejected before anything serves a request.

use std::sync::Arc;

use super::coordinator::UnlockCoordinator;
use super::pipeline::EvaluationPipeline;
use super::rate_limit::RateLimiter;
use super::settings::UnlockSettings;
use crate::ports::{
    Clock, Evaluator, PaymentGateway, SignatureVerifier, SystemClock, UlidGenerator, UnlockStore,
};

/// # Example
/// ```ignore
/// let app = AppBuilder::new()
///     .with_store(Arc::new(InMemoryStore::new()))
///     .with_evaluator(Arc::new(ScriptedEvaluator::default()))
///     .with_gateway(Arc::new(ScriptedGateway::new()))
///     .with_signatures(Arc::new(HmacSignatures::new(key_secret, webhook_secret)))
///     .build()?;
/// ```
#[derive(Default)]
pub struct AppBuilder {
    store: Option<Arc<dyn UnlockStore>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    signatures: Option<Arc<dyn SignatureVerifier>>,
    clock: Option<Arc<dyn Clock>>,
    settings: UnlockSettings,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("missing components: {0:?}")]
    Missing(Vec<&'static str>),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn UnlockStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_signatures(mut self, signatures: Arc<dyn SignatureVerifier>) -> Self {
        self.signatures = Some(signatures);
        self
    }

    /// Defaults to the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_settings(mut self, settings: UnlockSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let mut missing = Vec::new();
        if self.store.is_none() {
            missing.push("store");
        }
        if self.evaluator.is_none() {
            missing.push("evaluator");
        }
        if self.gateway.is_none() {
            missing.push("gateway");
        }
        if self.signatures.is_none() {
            missing.push("signatures");
        }
        let (Some(store), Some(evaluator), Some(gateway), Some(signatures)) =
            (self.store, self.evaluator, self.gateway, self.signatures)
        else {
            return Err(BuildError::Missing(missing));
        };
        self.settings
            .validate()
            .map_err(BuildError::InvalidSettings)?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let ids = Arc::new(UlidGenerator::new(clock.clone()));

        let coordinator = UnlockCoordinator::new(
            store.clone(),
            gateway,
            signatures,
            clock.clone(),
            ids.clone(),
            self.settings.clone(),
        );
        let pipeline = EvaluationPipeline::new(
            store,
            evaluator,
            clock.clone(),
            ids,
            self.settings.clone(),
        );
        let rate_limiter = RateLimiter::new(self.settings.rate_limit(), clock);

        Ok(App {
            coordinator: Arc::new(coordinator),
            pipeline: Arc::new(pipeline),
            rate_limiter: Arc::new(rate_limiter),
            settings: self.settings,
        })
    }
}

/// The wired service. Cheap to clone.
#[derive(Clone)]
pub struct App {
    pub coordinator: Arc<UnlockCoordinator>,
    pub pipeline: Arc<EvaluationPipeline>,
    pub rate_limiter: Arc<RateLimiter>,
    pub settings: UnlockSettings,
}
