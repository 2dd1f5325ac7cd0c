use std::sync::Arc;

use taskeval_core::app::App;
use taskeval_core::impls::{
    GroqEvaluator, HmacSignatures, InMemoryStore, RazorpayGateway, ScriptedEvaluator,
    ScriptedGateway, SqliteStore,
};
use taskeval_core::ports::{
    Evaluator, EvaluatorError, GatewayError, PaymentGateway, StoreError, UnlockStore,
};
use taskeval_core::{AppBuilder, BuildError};
use thiserror::Error;
use tracing::info;

use crate::config::{CollaboratorMode, Config};

#[derive(Error, Debug)]
pub enum StateError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("evaluator: {0}")]
    Evaluator(#[from] EvaluatorError),

    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("{0}")]
    Build(#[from] BuildError),

    #[error("GROQ_API_KEY is required in remote mode")]
    MissingEvaluatorKey,
}

/// Shared by every handler.
#[derive(Clone)]
pub struct State {
    pub app: App,
    /// Public gateway key id the checkout widget needs.
    pub key_id: Arc<str>,
}

impl State {
    pub fn new(app: App, key_id: impl Into<Arc<str>>) -> Self {
        Self {
            app,
            key_id: key_id.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, StateError> {
        let store: Arc<dyn UnlockStore> = match &config.database_path {
            Some(path) => {
                info!("Opening SQLite store at {path}");
                Arc::new(SqliteStore::open(path)?)
            }
            None => {
                info!("Using in-memory store");
                Arc::new(InMemoryStore::new())
            }
        };

        let (evaluator, gateway): (Arc<dyn Evaluator>, Arc<dyn PaymentGateway>) = match config.mode
        {
            CollaboratorMode::Remote => {
                let groq = config.groq().ok_or(StateError::MissingEvaluatorKey)?;
                (
                    Arc::new(GroqEvaluator::new(groq)?),
                    Arc::new(RazorpayGateway::new(config.razorpay())?),
                )
            }
            CollaboratorMode::Offline => (
                Arc::new(ScriptedEvaluator::default()),
                Arc::new(ScriptedGateway::new()),
            ),
        };
        info!("Collaborators: {}", config.mode);

        let app = AppBuilder::new()
            .with_store(store)
            .with_evaluator(evaluator)
            .with_gateway(gateway)
            .with_signatures(Arc::new(HmacSignatures::new(
                &config.razorpay_key_secret,
                &config.razorpay_webhook_secret,
            )))
            .with_settings(config.settings.clone())
            .build()?;

        Ok(Self::new(app, config.razorpay_key_id.as_str()))
    }
}
