//! Ports - seams between the core and its collaborators
//!
//! Traits for everything outside the queue state machine: the shared store,
//! the execution capability, time and id generation.

pub mod capability;
pub mod clock;
pub mod id_generator;
pub mod store;

pub use self::capability::{Capability, IsolatedContext, Isolation};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::store::{ListStore, StoreError, Subscription};
