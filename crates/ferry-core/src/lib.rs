//! ferry-core
//!
//! Durable task queue over a shared list / pub-sub store.
//!
//! # Modules
//! - **domain**: task records, ids, dispatch outcomes, queue naming
//! - **ports**: ListStore, Capability / Isolation, Clock, IdGenerator
//! - **impls**: InMemoryStore, RedisStore, ProcessIsolation, InProcessIsolation
//! - **queue**: QueueClient reservation state machine and recycling policy
//! - **sandbox**: SandboxManager (acquire / bounded-retry release)
//! - **worker**: WorkerMonitor background drain loop
//! - **listener**: QueueListener notification forwarder
//! - **config**: FerryConfig (TOML + `FERRY_*` environment)

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod listener;
pub mod ports;
pub mod queue;
pub mod sandbox;
pub mod worker;

pub use config::FerryConfig;
pub use domain::{Outcome, PerformResult, QueueName, TaskId, TaskRecord, TaskStatus, TaskStorage};
pub use error::{FerryError, Result};
pub use listener::QueueListener;
pub use queue::{QueueClient, QueueCounts, SERVICE_STOPPING, TASK_AVAILABLE};
pub use sandbox::SandboxManager;
pub use worker::{LoopExit, WakeReason, WorkerMonitor};
