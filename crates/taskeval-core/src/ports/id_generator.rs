//! IdGenerator port.

use crate::domain::ids::{EvaluationId, Id, IdMarker, PaymentId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// Issues ids for new records.
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_evaluation_id(&self) -> EvaluationId;

    fn generate_payment_id(&self) -> PaymentId;
}

/// ULID generator whose timestamp part comes from a `Clock`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Id::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        self.next()
    }

    fn generate_evaluation_id(&self) -> EvaluationId {
        self.next()
    }

    fn generate_payment_id(&self) -> PaymentId {
        self.next()
    }
}
