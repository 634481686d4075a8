//! Sandbox lifecycle: at most one live isolated context per manager.
//!
//! - `acquire` resolves the code location, loads the entry point into a
//!   freshly named context, and reuses it while it stays live
//! - `release` tears it down, retrying transient failures a bounded number of
//!   times without backoff; on exhaustion the handle stays live and the error
//!   is the caller's to escalate

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::config::SandboxConfig;
use crate::error::{FerryError, Result};
use crate::ports::{Capability, IsolatedContext, Isolation};

pub struct SandboxManager {
    config: SandboxConfig,
    release_retries: u32,
    isolation: Arc<dyn Isolation>,
    handle: Option<Box<dyn IsolatedContext>>,
}

impl SandboxManager {
    pub fn new(config: SandboxConfig, release_retries: u32, isolation: Arc<dyn Isolation>) -> Self {
        Self {
            config,
            release_retries,
            isolation,
            handle: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle_name(&self) -> Option<&str> {
        self.handle.as_deref().map(|ctx| ctx.name())
    }

    pub fn capability(&mut self) -> Option<&mut dyn Capability> {
        self.handle.as_deref_mut().map(|ctx| ctx.capability())
    }

    /// The location as given if it exists, otherwise relative to the running
    /// executable's directory.
    pub fn resolve_location(&self) -> Result<PathBuf> {
        resolve_location(&self.config.location)
    }

    /// Load a context if none is live and return its capability.
    pub async fn acquire(&mut self) -> Result<&mut dyn Capability> {
        let ctx = match self.handle.take() {
            Some(ctx) => ctx,
            None => load(self.isolation.as_ref(), &self.config).await?,
        };
        Ok(self.handle.insert(ctx).capability())
    }

    /// Tear down the live context. A no-op when nothing is live.
    pub async fn release(&mut self) -> Result<()> {
        let Some(ctx) = self.handle.as_deref_mut() else {
            return Ok(());
        };

        teardown_with_retries(ctx, 1 + self.release_retries).await?;
        self.handle = None;
        Ok(())
    }
}

async fn load(isolation: &dyn Isolation, config: &SandboxConfig) -> Result<Box<dyn IsolatedContext>> {
    let location = resolve_location(&config.location)?;
    let name = format!("ferry-sandbox-{}", Ulid::new());

    let ctx = isolation.load(&location, &config.entry_point, &name).await?;

    info!(
        sandbox = %name,
        location = %location.display(),
        entry_point = %config.entry_point,
        "sandbox created"
    );
    Ok(ctx)
}

async fn teardown_with_retries(ctx: &mut dyn IsolatedContext, attempts: u32) -> Result<()> {
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match ctx.teardown().await {
            Ok(()) => {
                info!(sandbox = %ctx.name(), attempt, "sandbox released");
                return Ok(());
            }
            Err(e) => {
                warn!(sandbox = %ctx.name(), attempt, error = %e, "sandbox teardown failed");
                last_error = e.to_string();
            }
        }
    }
    Err(FerryError::SandboxRelease {
        attempts,
        last_error,
    })
}

fn resolve_location(location: &Path) -> Result<PathBuf> {
    if !location.as_os_str().is_empty() {
        if location.exists() {
            return Ok(location.to_path_buf());
        }
        if let Some(base) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            let candidate = base.join(location);
            debug!(candidate = %candidate.display(), "trying location next to executable");
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }
    Err(FerryError::ResourceNotFound(location.to_path_buf()))
}
