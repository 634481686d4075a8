//! IdGenerator port - abstracts task id generation
//!
//! Task ids are ULIDs built from the injected clock plus 80 random bits, so a
//! `FixedClock` pins the timestamp part in tests.

use ulid::Ulid;

use crate::domain::TaskId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        TaskId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
