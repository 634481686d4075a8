//! ProcessIsolation - one child process per sandbox
//!
//! The resolved code location is spawned as an executable with
//! `FERRY_ENTRY_POINT` and `FERRY_SANDBOX_NAME` in its environment. Each
//! dispatch is one line of JSON each way over stdin/stdout:
//!
//! ```text
//! -> {"parameters":"...","storage":{"k":"v"}}
//! <- {"outcome":"Success","reason":null,"data":null,"storage":{"k":"v2"}}
//! ```
//!
//! stderr is inherited so the child's own logging ends up next to ours.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::domain::{Outcome, PerformResult, TaskStorage};
use crate::error::FerryError;
use crate::ports::{Capability, IsolatedContext, Isolation};

pub const ENTRY_POINT_ENV: &str = "FERRY_ENTRY_POINT";
pub const SANDBOX_NAME_ENV: &str = "FERRY_SANDBOX_NAME";

#[derive(Debug, Serialize)]
struct DispatchRequest<'a> {
    parameters: &'a str,
    storage: &'a TaskStorage,
}

#[derive(Debug, Deserialize)]
struct DispatchResponse {
    outcome: Outcome,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    storage: TaskStorage,
}

#[derive(Debug, Clone)]
pub struct ProcessIsolation {
    args: Vec<String>,
    teardown_timeout: Duration,
}

impl ProcessIsolation {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            teardown_timeout: Duration::from_secs(5),
        }
    }

    /// How long one teardown attempt waits for the killed child to exit.
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }
}

#[async_trait]
impl Isolation for ProcessIsolation {
    async fn load(
        &self,
        location: &Path,
        entry_point: &str,
        name: &str,
    ) -> Result<Box<dyn IsolatedContext>, FerryError> {
        let mut child = Command::new(location)
            .args(&self.args)
            .env(ENTRY_POINT_ENV, entry_point)
            .env(SANDBOX_NAME_ENV, name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FerryError::SandboxLoad(format!("{}: {e}", location.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FerryError::SandboxLoad("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FerryError::SandboxLoad("child stdout unavailable".to_string()))?;

        debug!(sandbox = name, pid = ?child.id(), "spawned sandbox process");

        Ok(Box::new(ProcessContext {
            name: name.to_string(),
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            storage: TaskStorage::new(),
            teardown_timeout: self.teardown_timeout,
        }))
    }
}

struct ProcessContext {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    storage: TaskStorage,
    teardown_timeout: Duration,
}

#[async_trait]
impl Capability for ProcessContext {
    async fn perform(&mut self, parameters: &str) -> Result<PerformResult, FerryError> {
        let mut line = serde_json::to_string(&DispatchRequest {
            parameters,
            storage: &self.storage,
        })?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| FerryError::Dispatch(format!("write to sandbox: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| FerryError::Dispatch(format!("flush to sandbox: {e}")))?;

        let reply = self
            .stdout
            .next_line()
            .await
            .map_err(|e| FerryError::Dispatch(format!("read from sandbox: {e}")))?
            .ok_or_else(|| FerryError::Dispatch("sandbox closed its output".to_string()))?;

        let response: DispatchResponse = serde_json::from_str(&reply)
            .map_err(|e| FerryError::Dispatch(format!("malformed sandbox reply: {e}")))?;
        self.storage = response.storage;

        Ok(PerformResult {
            outcome: response.outcome,
            reason: response.reason,
            data: response.data,
        })
    }

    fn set_task_storage(&mut self, storage: TaskStorage) {
        self.storage = storage;
    }

    fn take_task_storage(&mut self) -> TaskStorage {
        std::mem::take(&mut self.storage)
    }
}

#[async_trait]
impl IsolatedContext for ProcessContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&mut self) -> &mut dyn Capability {
        self
    }

    async fn teardown(&mut self) -> Result<(), FerryError> {
        let exited = self
            .child
            .try_wait()
            .map_err(|e| FerryError::Dispatch(format!("poll sandbox process: {e}")))?;
        if exited.is_some() {
            return Ok(());
        }

        self.child
            .start_kill()
            .map_err(|e| FerryError::Dispatch(format!("kill sandbox process: {e}")))?;

        match tokio::time::timeout(self.teardown_timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(sandbox = %self.name, %status, "sandbox process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(FerryError::Dispatch(format!("wait for sandbox process: {e}"))),
            Err(_) => Err(FerryError::Dispatch(format!(
                "sandbox process still running after {:?}",
                self.teardown_timeout
            ))),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const REPLY_SCRIPT: &str = r#"while read line; do echo '{"outcome":"Failure","reason":"nope","storage":{"seen":"yes"}}'; done"#;

    fn shell(script: &str) -> ProcessIsolation {
        ProcessIsolation::new(vec!["-c".to_string(), script.to_string()])
            .with_teardown_timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn dispatch_round_trips_one_json_line() {
        let isolation = shell(REPLY_SCRIPT);
        let mut ctx = isolation
            .load(Path::new("/bin/sh"), "main", "sandbox-test")
            .await
            .unwrap();

        let cap = ctx.capability();
        cap.set_task_storage(TaskStorage::new());
        let result = cap.perform("{}").await.unwrap();
        assert_eq!(result.outcome, Outcome::Failure);
        assert_eq!(result.reason.as_deref(), Some("nope"));
        assert_eq!(cap.take_task_storage().get("seen").map(String::as_str), Some("yes"));

        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn closed_output_is_a_dispatch_fault() {
        let isolation = shell("exit 0");
        let mut ctx = isolation
            .load(Path::new("/bin/sh"), "main", "sandbox-test")
            .await
            .unwrap();

        let err = ctx.capability().perform("{}").await.unwrap_err();
        assert!(matches!(err, FerryError::Dispatch(_)));
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn sandbox_sees_entry_point_in_environment() {
        let script = r#"read line; echo "{\"outcome\":\"Success\",\"reason\":\"$FERRY_ENTRY_POINT\"}""#;
        let isolation = shell(script);
        let mut ctx = isolation
            .load(Path::new("/bin/sh"), "Tasks.Resize", "sandbox-test")
            .await
            .unwrap();

        let result = ctx.capability().perform("{}").await.unwrap();
        assert_eq!(result.reason.as_deref(), Some("Tasks.Resize"));
        ctx.teardown().await.unwrap();
    }
}
