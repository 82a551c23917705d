//! Drives one remote command and wires its output into a multiplexer

use super::state::CommandHandle;
use crate::error::SandboxExecError;
use crate::sandbox::{RunOptions, Sandbox};
use crate::stream::StreamMultiplexer;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs commands inside one sandbox.
///
/// Sandbox and transport errors never escape as `Err`: they become the
/// `Failed` state of the returned [`CommandHandle`]. `Err` is reserved for
/// state-machine violations. The controller never tears the sandbox down.
pub struct CommandController {
    sandbox: Arc<dyn Sandbox>,
}

impl CommandController {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &Arc<dyn Sandbox> {
        &self.sandbox
    }

    /// Blocking mode: run until the command terminates and collect every line
    pub async fn run_to_completion(&self, command: &str) -> Result<CommandHandle, SandboxExecError> {
        let sandbox_id = self.sandbox.sandbox_id().to_string();
        let mut handle = CommandHandle::new(sandbox_id.as_str());
        let mux = Arc::new(StreamMultiplexer::new());

        debug!(sandbox_id = %sandbox_id, "Running '{}' to completion", command);
        let outcome = self
            .sandbox
            .run(command, RunOptions::foreground(mux.clone()))
            .await;
        // A truncated stream is still a finished stream
        mux.mark_finished();

        match outcome {
            Ok(outcome) => {
                handle.mark_running(Some(outcome.pid.to_string()))?;
                match outcome.exit_code {
                    Some(exit_code) => {
                        let logs = mux.drain().await;
                        info!(
                            sandbox_id = %sandbox_id,
                            pid = outcome.pid,
                            "'{}' exited with {} ({} lines)",
                            command,
                            exit_code,
                            logs.len()
                        );
                        handle.complete(exit_code, logs)?;
                    }
                    None => {
                        warn!(sandbox_id = %sandbox_id, pid = outcome.pid, "Foreground run returned without an exit code");
                        handle.fail("Command finished without an exit code")?;
                    }
                }
            }
            Err(e) => {
                warn!(sandbox_id = %sandbox_id, "'{}' failed: {}", command, e);
                handle.fail(e.message())?;
            }
        }
        Ok(handle)
    }

    /// Non-blocking mode: spawn detached and return once a command id exists
    pub async fn start_detached(&self, command: &str) -> Result<CommandHandle, SandboxExecError> {
        let sandbox_id = self.sandbox.sandbox_id().to_string();
        let mut handle = CommandHandle::new(sandbox_id.as_str());

        match self.sandbox.run(command, RunOptions::background()).await {
            Ok(outcome) => {
                info!(sandbox_id = %sandbox_id, pid = outcome.pid, "Started '{}' in the background", command);
                handle.mark_running(Some(outcome.pid.to_string()))?;
            }
            Err(e) => {
                warn!(sandbox_id = %sandbox_id, "Failed to start '{}': {}", command, e);
                handle.fail(e.message())?;
            }
        }
        Ok(handle)
    }

    /// Attach to an existing command and expose its output as a multiplexer.
    ///
    /// The multiplexer first sees the output produced before the attach, then
    /// live output, and is finished once the command terminates (or waiting
    /// on it fails).
    pub async fn follow(&self, pid: u32) -> Result<Arc<StreamMultiplexer>, SandboxExecError> {
        let mux = Arc::new(StreamMultiplexer::new());
        let command = self
            .sandbox
            .connect_command(pid, Some(mux.clone()))
            .await?;

        let finisher = Arc::clone(&mux);
        tokio::spawn(async move {
            if let Err(e) = command.wait().await {
                debug!(pid, "Wait on followed command failed: {}", e);
            }
            finisher.mark_finished();
        });
        Ok(mux)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::state::{CommandState, FAILURE_EXIT_CODE};
    use crate::sandbox::MockSandbox;
    use crate::stream::StreamSource;

    fn controller(sandbox: &MockSandbox) -> CommandController {
        CommandController::new(Arc::new(sandbox.clone()))
    }

    #[tokio::test]
    async fn test_run_to_completion_collects_lines() {
        let sandbox = MockSandbox::new("sbx-1");
        sandbox
            .expect_command("ls -la")
            .emits_stdout("a.txt\n")
            .returns_exit_code(0)
            .finish();

        let handle = controller(&sandbox).run_to_completion("ls -la").await.unwrap();
        assert_eq!(handle.state(), CommandState::Completed);
        assert_eq!(handle.exit_code(), Some(0));
        let lines: Vec<String> = handle.logs().iter().map(|r| r.formatted()).collect();
        assert_eq!(lines, vec!["[stdout] a.txt"]);
    }

    #[tokio::test]
    async fn test_partial_final_line_and_interleaving() {
        let sandbox = MockSandbox::new("sbx-1");
        sandbox
            .expect_command("build")
            .emits_stdout("step 1\nste")
            .emits_stderr("warning: x\n")
            .emits_stdout("p 2\nno newline")
            .returns_exit_code(2)
            .finish();

        let handle = controller(&sandbox).run_to_completion("build").await.unwrap();
        let lines: Vec<String> = handle.logs().iter().map(|r| r.formatted()).collect();
        assert_eq!(
            lines,
            vec![
                "[stdout] step 1",
                "[stderr] warning: x",
                "[stdout] step 2",
                "[stdout] no newline"
            ]
        );
        assert_eq!(handle.exit_code(), Some(2));
    }

    #[tokio::test]
    async fn test_remote_error_fails_without_logs() {
        let sandbox = MockSandbox::new("sbx-1");
        sandbox.expect_command("explode").fails("boom").finish();

        let handle = controller(&sandbox).run_to_completion("explode").await.unwrap();
        assert_eq!(handle.state(), CommandState::Failed);
        assert_eq!(handle.exit_code(), Some(FAILURE_EXIT_CODE));
        assert_eq!(handle.error(), Some("boom"));
        assert!(handle.logs().is_empty());
    }

    #[tokio::test]
    async fn test_start_detached_returns_running_handle() {
        let sandbox = MockSandbox::new("sbx-1");
        sandbox
            .expect_command("npm run dev")
            .with_pid(4242)
            .keeps_running()
            .finish();

        let handle = controller(&sandbox).start_detached("npm run dev").await.unwrap();
        assert_eq!(handle.state(), CommandState::Running);
        assert_eq!(handle.command_id(), Some("4242"));
        assert!(handle.exit_code().is_none());
        assert!(handle.logs().is_empty());
        assert!(sandbox.get_call_history()[0].background);
    }

    #[tokio::test]
    async fn test_follow_replays_then_streams_live_output() {
        let sandbox = MockSandbox::new("sbx-1");
        sandbox
            .expect_command("server")
            .with_pid(7)
            .emits_stdout("booting\n")
            .keeps_running()
            .finish();
        let controller = controller(&sandbox);
        controller.start_detached("server").await.unwrap();

        let mux = controller.follow(7).await.unwrap();
        sandbox.emit(7, StreamSource::Stderr, "listening\n");
        sandbox.complete(7, 0);

        let lines: Vec<String> = mux.drain().await.iter().map(|r| r.formatted()).collect();
        assert_eq!(lines, vec!["[stdout] booting", "[stderr] listening"]);
    }

    #[tokio::test]
    async fn test_follow_unknown_command() {
        let sandbox = MockSandbox::new("sbx-1");
        let err = controller(&sandbox).follow(99).await.err().unwrap();
        assert!(err.is_connection());
    }
}
