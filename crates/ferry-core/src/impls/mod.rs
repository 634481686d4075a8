//! Impls - adapters for the ports
//!
//! - **InMemoryStore**: single-process store for development and tests
//! - **RedisStore**: shared store backed by Redis lists and pub/sub
//! - **ProcessIsolation**: one child process per sandbox
//! - **InProcessIsolation**: registry of capability factories

pub mod inproc_isolation;
pub mod memory_store;
pub mod process_isolation;
pub mod redis_store;

pub use self::inproc_isolation::{CapabilityFactory, InProcessIsolation};
pub use self::memory_store::InMemoryStore;
pub use self::process_isolation::ProcessIsolation;
pub use self::redis_store::RedisStore;
