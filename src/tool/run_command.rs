//! Run a command in a sandbox through the task queue and report progress events

use crate::error::{ErrorCode, SandboxExecError};
use crate::lifecycle::{probe, ProbePolicy, RunRequest, RunResult, RUN_USER_CODE_TASK};
use crate::task::{RunStatus, TaskQueue, TaskRun};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// `type` of every event the tool emits
pub const RUN_COMMAND_EVENT_TYPE: &str = "data-run-command";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandInput {
    pub sandbox_id: String,
    /// Base command without arguments
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub sudo: bool,
    pub wait: bool,
}

impl RunCommandInput {
    /// Shell command line sent to the sandbox
    pub fn command_line(&self) -> String {
        if self.sudo {
            format!("sudo {} {}", self.command, self.args.join(" "))
        } else if !self.args.is_empty() {
            format!("{} {}", self.command, self.args.join(" "))
        } else {
            self.command.clone()
        }
    }

    /// A blank base command or sandbox id is rejected before anything is triggered
    pub fn validate(&self) -> Result<(), SandboxExecError> {
        if self.command.trim().is_empty() {
            return Err(SandboxExecError::validation(
                "Invalid parameters. You must pass a non-empty `command`",
            ));
        }
        if self.sandbox_id.trim().is_empty() {
            return Err(SandboxExecError::validation(
                "Invalid parameters. You must pass a non-empty `sandboxId`",
            ));
        }
        Ok(())
    }

    /// Command as quoted in summary messages
    fn display(&self) -> String {
        format!("{} {}", self.command, self.args.join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunCommandStatus {
    Executing,
    Stream,
    Done,
    Running,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandData {
    pub sandbox_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    pub command: String,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: RunCommandStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCommandEvent {
    /// Tool call the event belongs to
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: RunCommandData,
}

/// Summary message plus the structured run result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCommandReport {
    pub message: String,
    pub result: RunResult,
}

impl RunCommandReport {
    pub fn is_failure(&self) -> bool {
        self.result.is_failure()
    }
}

struct EventWriter<'a> {
    tool_call_id: &'a str,
    input: &'a RunCommandInput,
    events: Option<&'a mpsc::UnboundedSender<RunCommandEvent>>,
}

impl EventWriter<'_> {
    fn data(&self, sandbox_id: &str, status: RunCommandStatus) -> RunCommandData {
        RunCommandData {
            sandbox_id: sandbox_id.to_string(),
            command_id: None,
            command: self.input.command.clone(),
            args: self.input.args.clone(),
            log: None,
            exit_code: None,
            error: None,
            status,
        }
    }

    fn write(&self, data: RunCommandData) {
        if let Some(events) = self.events {
            let event = RunCommandEvent {
                id: self.tool_call_id.to_string(),
                kind: RUN_COMMAND_EVENT_TYPE.to_string(),
                data,
            };
            if events.send(event).is_err() {
                debug!("Event receiver dropped; continuing without events");
            }
        }
    }
}

/// Runs commands by triggering the `run-user-code` task
pub struct RunCommandTool {
    queue: Arc<dyn TaskQueue>,
    probe: ProbePolicy,
}

impl RunCommandTool {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            queue,
            probe: ProbePolicy::default(),
        }
    }

    pub fn with_probe_policy(mut self, probe: ProbePolicy) -> Self {
        self.probe = probe;
        self
    }

    /// Always returns a report; failures are described in it rather than raised.
    pub async fn execute(
        &self,
        tool_call_id: &str,
        input: &RunCommandInput,
        events: Option<&mpsc::UnboundedSender<RunCommandEvent>>,
    ) -> RunCommandReport {
        let writer = EventWriter {
            tool_call_id,
            input,
            events,
        };
        writer.write(writer.data(&input.sandbox_id, RunCommandStatus::Executing));

        let outcome = if input.wait {
            self.run_blocking(input, &writer).await
        } else {
            self.run_background(input, &writer).await
        };

        outcome.unwrap_or_else(|e| {
            warn!(sandbox_id = %input.sandbox_id, "run command failed: {}", e);
            let error = e.message().to_string();
            let mut data = writer.data(&input.sandbox_id, RunCommandStatus::Error);
            data.error = Some(error.clone());
            writer.write(data);

            RunCommandReport {
                message: format!(
                    "Failed to run command `{}` in sandbox `{}`: {}",
                    input.display(),
                    input.sandbox_id,
                    error
                ),
                result: RunResult::failed(input.sandbox_id.as_str(), error),
            }
        })
    }

    async fn trigger(&self, input: &RunCommandInput) -> Result<String, SandboxExecError> {
        input.validate()?;
        let request = RunRequest {
            wait: input.wait,
            ..RunRequest::command(input.command_line()).in_sandbox(input.sandbox_id.as_str())
        };
        let handle = self
            .queue
            .trigger(RUN_USER_CODE_TASK, serde_json::to_value(&request)?)
            .await?;
        debug!(run_id = %handle.id, "Triggered '{}'", input.command_line());
        Ok(handle.id)
    }

    async fn run_blocking(
        &self,
        input: &RunCommandInput,
        writer: &EventWriter<'_>,
    ) -> Result<RunCommandReport, SandboxExecError> {
        let run_id = self.trigger(input).await?;
        let run = self.queue.wait_for_completion(&run_id).await?;

        match run.status {
            RunStatus::Completed => {}
            RunStatus::Failed | RunStatus::Crashed => {
                return Err(SandboxExecError::task_with_code(
                    ErrorCode::TASK_FAILED,
                    run.error.unwrap_or_else(|| "Task failed".to_string()),
                    Some(run_id),
                ));
            }
            status => {
                return Err(SandboxExecError::task_with_code(
                    ErrorCode::TASK_INCOMPLETE,
                    format!("Task did not complete: {}", status),
                    Some(run_id),
                ));
            }
        }

        let output = run.output.filter(|output| !output.is_null()).ok_or_else(|| {
            SandboxExecError::task_with_code(
                ErrorCode::TASK_NO_OUTPUT,
                "Task returned no output",
                Some(run_id.clone()),
            )
        })?;
        let mut result: RunResult = serde_json::from_value(output)?;
        if result.sandbox_id.is_empty() {
            result.sandbox_id = input.sandbox_id.clone();
        }

        for log in &result.logs {
            let mut data = writer.data(&result.sandbox_id, RunCommandStatus::Stream);
            data.log = Some(log.clone());
            writer.write(data);
        }
        let mut done = writer.data(&result.sandbox_id, RunCommandStatus::Done);
        done.command_id = result.command_id.clone().filter(|id| !id.is_empty());
        done.exit_code = result.exit_code;
        writer.write(done);

        info!(run_id = %run_id, "'{}' finished with {:?}", input.command_line(), result.exit_code);
        Ok(RunCommandReport {
            message: format!(
                "The command `{}` has finished with exit code {}.",
                input.display(),
                result.exit_code.unwrap_or(0)
            ),
            result,
        })
    }

    async fn run_background(
        &self,
        input: &RunCommandInput,
        writer: &EventWriter<'_>,
    ) -> Result<RunCommandReport, SandboxExecError> {
        let run_id = self.trigger(input).await?;

        let queue = Arc::clone(&self.queue);
        let fetch_id = run_id.clone();
        let outcome = probe(
            &self.probe,
            move || {
                let queue = Arc::clone(&queue);
                let run_id = fetch_id.clone();
                async move { queue.retrieve(&run_id).await }
            },
            has_command_id_or_finished,
        )
        .await?;
        if !outcome.settled {
            debug!(
                run_id = %run_id,
                "Command id lookup gave up after {} polls ({:?} budget)",
                outcome.attempts,
                self.probe.budget()
            );
        }

        let result = run_output(&outcome.value);
        let command_id = result
            .as_ref()
            .and_then(|r| r.command_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| placeholder_command_id(&run_id));
        let sandbox_id = result
            .map(|r| r.sandbox_id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| input.sandbox_id.clone());

        let mut data = writer.data(&sandbox_id, RunCommandStatus::Running);
        data.command_id = Some(command_id.clone());
        writer.write(data);

        Ok(RunCommandReport {
            message: format!(
                "The command `{}` has been started in the background in the sandbox with ID `{}` with the commandId {}.",
                input.display(),
                sandbox_id,
                command_id
            ),
            result: RunResult {
                sandbox_id,
                command_id: Some(command_id),
                logs: Vec::new(),
                exit_code: None,
                error: None,
            },
        })
    }
}

fn run_output(run: &TaskRun) -> Option<RunResult> {
    run.output
        .clone()
        .and_then(|output| serde_json::from_value(output).ok())
}

fn has_command_id_or_finished(run: &TaskRun) -> bool {
    let has_command_id = run
        .output
        .as_ref()
        .is_some_and(|output| !output.is_null() && !output["commandId"].is_null());
    has_command_id || matches!(run.status, RunStatus::Completed | RunStatus::Failed)
}

/// Segment of the run id after its first `_`, or `"0"`
fn placeholder_command_id(run_id: &str) -> String {
    run_id
        .split('_')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .unwrap_or("0")
        .to_string()
}
