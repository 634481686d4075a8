//! InProcessIsolation - entry points resolved from a registry of factories.
//!
//! Each load builds a brand-new capability from the factory, so state never
//! leaks from one sandbox generation to the next even though everything runs
//! inside the worker process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FerryError;
use crate::ports::{Capability, IsolatedContext, Isolation};

/// Builds a fresh capability for a newly created sandbox.
pub trait CapabilityFactory: Send + Sync {
    fn create(&self, sandbox_name: &str) -> Box<dyn Capability>;
}

impl<F> CapabilityFactory for F
where
    F: Fn(&str) -> Box<dyn Capability> + Send + Sync,
{
    fn create(&self, sandbox_name: &str) -> Box<dyn Capability> {
        self(sandbox_name)
    }
}

/// Registry of entry points (entry_point -> factory).
///
/// Built during initialization, read-only once handed to a sandbox manager.
#[derive(Default)]
pub struct InProcessIsolation {
    factories: HashMap<String, Arc<dyn CapabilityFactory>>,
}

impl InProcessIsolation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        entry_point: impl Into<String>,
        factory: Arc<dyn CapabilityFactory>,
    ) -> Result<(), FerryError> {
        let entry_point = entry_point.into();
        if self.factories.contains_key(&entry_point) {
            return Err(FerryError::DuplicateEntryPoint(entry_point));
        }
        self.factories.insert(entry_point, factory);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[async_trait]
impl Isolation for InProcessIsolation {
    async fn load(
        &self,
        _location: &Path,
        entry_point: &str,
        name: &str,
    ) -> Result<Box<dyn IsolatedContext>, FerryError> {
        let factory = self
            .factories
            .get(entry_point)
            .ok_or_else(|| FerryError::SandboxLoad(format!("unknown entry point: {entry_point}")))?;

        Ok(Box::new(InProcessContext {
            name: name.to_string(),
            capability: factory.create(name),
        }))
    }
}

struct InProcessContext {
    name: String,
    capability: Box<dyn Capability>,
}

#[async_trait]
impl IsolatedContext for InProcessContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&mut self) -> &mut dyn Capability {
        self.capability.as_mut()
    }

    async fn teardown(&mut self) -> Result<(), FerryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Outcome, PerformResult, TaskStorage};

    #[derive(Default)]
    struct Echo {
        storage: TaskStorage,
    }

    #[async_trait]
    impl Capability for Echo {
        async fn perform(&mut self, parameters: &str) -> Result<PerformResult, FerryError> {
            self.storage
                .insert("last".to_string(), parameters.to_string());
            Ok(PerformResult::success())
        }

        fn set_task_storage(&mut self, storage: TaskStorage) {
            self.storage = storage;
        }

        fn take_task_storage(&mut self) -> TaskStorage {
            std::mem::take(&mut self.storage)
        }
    }

    fn echo_factory() -> Arc<dyn CapabilityFactory> {
        Arc::new(|_: &str| Box::new(Echo::default()) as Box<dyn Capability>)
    }

    #[tokio::test]
    async fn loads_registered_entry_point() {
        let mut isolation = InProcessIsolation::new();
        isolation.register("echo", echo_factory()).unwrap();

        let mut ctx = isolation
            .load(Path::new("."), "echo", "sandbox-1")
            .await
            .unwrap();
        assert_eq!(ctx.name(), "sandbox-1");

        let cap = ctx.capability();
        let result = cap.perform("hi").await.unwrap();
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(cap.take_task_storage().get("last").map(String::as_str), Some("hi"));
    }

    #[tokio::test]
    async fn unknown_entry_point_fails_to_load() {
        let isolation = InProcessIsolation::new();
        let err = isolation
            .load(Path::new("."), "missing", "sandbox-1")
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown entry point"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut isolation = InProcessIsolation::new();
        isolation.register("echo", echo_factory()).unwrap();
        let err = isolation.register("echo", echo_factory()).unwrap_err();
        assert!(matches!(err, FerryError::DuplicateEntryPoint(name) if name == "echo"));
        assert_eq!(isolation.len(), 1);
    }
}
