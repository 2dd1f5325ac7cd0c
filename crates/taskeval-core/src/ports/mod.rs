//! Ports: the traits the application layer depends on.
//!
//! Implementations live in `impls`; the app layer only sees these traits.

pub mod clock;
pub mod evaluator;
pub mod id_generator;
pub mod payment_gateway;
pub mod signatures;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::evaluator::{EvaluationRequest, Evaluator, EvaluatorError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::payment_gateway::{
    GatewayError, GatewayOrder, OrderNotes, OrderRequest, PaymentGateway, UNLOCK_PURPOSE,
};
pub use self::signatures::SignatureVerifier;
pub use self::store::{
    AccountDirectory, AttemptChange, CompletionOutcome, EvaluationCompletion, EvaluationStore,
    PaymentLedger, StoreError, TaskStore, UnlockStore,
};
