//! Queue module: the reservation state machine and its recycling policy.

mod client;
mod counts;
mod recycle;
mod session;

pub use client::{QueueClient, SERVICE_STOPPING, TASK_AVAILABLE};
pub use counts::QueueCounts;
pub use recycle::{RecycleDecision, RecyclePolicy};
