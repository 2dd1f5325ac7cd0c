//! Domain model (ids, records, state machines, errors).

pub mod account;
pub mod errors;
pub mod evaluation;
pub mod ids;
pub mod payment;
pub mod task;

pub use account::UserAccount;
pub use errors::{ErrorKind, UnlockError};
pub use evaluation::{EvaluationRecord, EvaluationReport, EvaluationView, ReportError};
pub use ids::{
    EvaluationId, GatewayPaymentId, Id, IdMarker, OrderId, ParseIdError, PaymentId, TaskId,
    UserId,
};
pub use payment::{AckSource, CaptureOutcome, PaymentAttempt, PaymentCapture, PaymentStatus};
pub use task::{NewTask, StatusChange, TaskFilter, TaskRecord, TaskStatus};
