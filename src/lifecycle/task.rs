//! The `run-user-code` task body

use super::controller::CommandController;
use super::result::RunResult;
use crate::error::{ErrorCode, SandboxExecError};
use crate::sandbox::{CreateOptions, Sandbox, SandboxFile, SandboxProvider};
use crate::task::Task;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Name the task is registered under
pub const RUN_USER_CODE_TASK: &str = "run-user-code";

/// Where inline code is written before it runs
pub const USER_CODE_PATH: &str = "/tmp/user-code.js";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<SandboxFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    /// Lifetime of a newly created sandbox, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,
    #[serde(default = "default_wait")]
    pub wait: bool,
}

fn default_wait() -> bool {
    true
}

impl RunRequest {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn in_sandbox(mut self, sandbox_id: impl Into<String>) -> Self {
        self.sandbox_id = Some(sandbox_id.into());
        self
    }

    pub fn background(mut self) -> Self {
        self.wait = false;
        self
    }
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            code: None,
            command: None,
            files: None,
            sandbox_id: None,
            timeout: None,
            ports: None,
            wait: true,
        }
    }
}

/// Prepares a sandbox and runs one command in it
pub struct RunUserCodeTask {
    provider: Arc<dyn SandboxProvider>,
    default_timeout: Duration,
}

impl RunUserCodeTask {
    pub fn new(provider: Arc<dyn SandboxProvider>) -> Self {
        Self {
            provider,
            default_timeout: Duration::from_millis(600_000),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Errors before a sandbox exists are returned; later ones become a failed result.
    ///
    /// A request with neither `command` nor `code` is rejected before any
    /// sandbox is connected or created.
    pub async fn execute(&self, request: RunRequest) -> Result<RunResult, SandboxExecError> {
        let command = resolve_command(&request)?;
        let sandbox = self.acquire_sandbox(&request).await?;
        let sandbox_id = sandbox.sandbox_id().to_string();

        match self.run_in(sandbox, &request, &command).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(sandbox_id = %sandbox_id, "Run failed: {}", e);
                Ok(RunResult::failed(sandbox_id, e.message()))
            }
        }
    }

    async fn acquire_sandbox(
        &self,
        request: &RunRequest,
    ) -> Result<Arc<dyn Sandbox>, SandboxExecError> {
        match &request.sandbox_id {
            Some(sandbox_id) => self.provider.connect(sandbox_id).await,
            None => {
                let options = CreateOptions {
                    timeout: Some(
                        request
                            .timeout
                            .map(Duration::from_millis)
                            .unwrap_or(self.default_timeout),
                    ),
                    ports: request.ports.clone().unwrap_or_default(),
                };
                self.provider.create(options).await
            }
        }
    }

    async fn run_in(
        &self,
        sandbox: Arc<dyn Sandbox>,
        request: &RunRequest,
        command: &str,
    ) -> Result<RunResult, SandboxExecError> {
        if let Some(files) = request.files.as_deref().filter(|files| !files.is_empty()) {
            debug!(sandbox_id = %sandbox.sandbox_id(), "Writing {} files", files.len());
            sandbox.write_files(files).await?;
        }

        if let Some(code) = &request.code {
            sandbox
                .write_files(&[SandboxFile::new(USER_CODE_PATH, code.as_str())])
                .await?;
        }

        let controller = CommandController::new(sandbox);
        let handle = if request.wait {
            controller.run_to_completion(command).await?
        } else {
            controller.start_detached(command).await?
        };
        Ok(RunResult::from_handle(&handle))
    }
}

/// The command to run: `command` when given, else `node` on the inline code file
fn resolve_command(request: &RunRequest) -> Result<String, SandboxExecError> {
    let command = request
        .command
        .as_deref()
        .filter(|command| !command.trim().is_empty());
    match (command, &request.code) {
        (Some(command), _) => Ok(command.to_string()),
        (None, Some(_)) => Ok(format!("node {}", USER_CODE_PATH)),
        (None, None) => Err(SandboxExecError::validation_with_code(
            ErrorCode::VALIDATION_REQUIRED_FIELD,
            "Either command or code must be provided",
            Some("command".to_string()),
        )),
    }
}

#[async_trait]
impl Task for RunUserCodeTask {
    async fn run(&self, payload: Value) -> anyhow::Result<Value> {
        let request: RunRequest = serde_json::from_value(payload)?;
        let result = self.execute(request).await?;
        Ok(serde_json::to_value(result)?)
    }
}
