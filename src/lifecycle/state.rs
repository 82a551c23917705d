use crate::error::{ErrorCode, SandboxExecError};
use crate::stream::LogRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exit code reported for every failed command
pub const FAILURE_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandState {
    Starting,
    Running,
    Completed,
    Failed,
}

impl CommandState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandState::Completed | CommandState::Failed)
    }

    fn as_str(&self) -> &'static str {
        match self {
            CommandState::Starting => "starting",
            CommandState::Running => "running",
            CommandState::Completed => "completed",
            CommandState::Failed => "failed",
        }
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One command's progress through `Starting -> Running -> {Completed, Failed}`.
///
/// Terminal states are final: every transition out of them is rejected.
#[derive(Debug, Clone)]
pub struct CommandHandle {
    sandbox_id: String,
    command_id: Option<String>,
    state: CommandState,
    exit_code: Option<i32>,
    logs: Vec<LogRecord>,
    error: Option<String>,
}

impl CommandHandle {
    pub fn new(sandbox_id: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            command_id: None,
            state: CommandState::Starting,
            exit_code: None,
            logs: Vec::new(),
            error: None,
        }
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    pub fn command_id(&self) -> Option<&str> {
        self.command_id.as_deref()
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn logs(&self) -> &[LogRecord] {
        &self.logs
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The remote execution handle exists
    pub fn mark_running(&mut self, command_id: Option<String>) -> Result<(), SandboxExecError> {
        if self.state != CommandState::Starting {
            return Err(self.invalid_transition(CommandState::Running));
        }
        self.state = CommandState::Running;
        if command_id.is_some() {
            self.command_id = command_id;
        }
        Ok(())
    }

    /// Record a command id the remote side assigned after spawn
    pub fn assign_command_id(&mut self, command_id: impl Into<String>) -> Result<(), SandboxExecError> {
        if self.state.is_terminal() {
            return Err(SandboxExecError::validation_with_code(
                ErrorCode::VALIDATION_INVALID_TRANSITION,
                format!("Cannot assign a command id to a {} command", self.state),
                Some("commandId".to_string()),
            ));
        }
        self.command_id = Some(command_id.into());
        Ok(())
    }

    pub fn complete(&mut self, exit_code: i32, logs: Vec<LogRecord>) -> Result<(), SandboxExecError> {
        if self.state.is_terminal() {
            return Err(self.invalid_transition(CommandState::Completed));
        }
        self.state = CommandState::Completed;
        self.exit_code = Some(exit_code);
        self.logs = logs;
        self.error = None;
        Ok(())
    }

    /// Failure discards any logs gathered so far
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), SandboxExecError> {
        if self.state.is_terminal() {
            return Err(self.invalid_transition(CommandState::Failed));
        }
        self.state = CommandState::Failed;
        self.exit_code = Some(FAILURE_EXIT_CODE);
        self.logs.clear();
        self.error = Some(error.into());
        Ok(())
    }

    fn invalid_transition(&self, to: CommandState) -> SandboxExecError {
        SandboxExecError::validation_with_code(
            ErrorCode::VALIDATION_INVALID_TRANSITION,
            format!("Cannot move command from {} to {}", self.state, to),
            Some("state".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamSource;

    #[test]
    fn test_background_path() {
        let mut handle = CommandHandle::new("sbx");
        assert_eq!(handle.state(), CommandState::Starting);
        assert!(handle.command_id().is_none());

        handle.mark_running(Some("42".to_string())).unwrap();
        assert_eq!(handle.state(), CommandState::Running);
        assert_eq!(handle.command_id(), Some("42"));
        assert!(handle.exit_code().is_none());
        assert!(handle.error().is_none());
    }

    #[test]
    fn test_completion_keeps_logs() {
        let mut handle = CommandHandle::new("sbx");
        handle.mark_running(None).unwrap();
        handle
            .complete(0, vec![LogRecord::new(StreamSource::Stdout, "a.txt")])
            .unwrap();

        assert_eq!(handle.state(), CommandState::Completed);
        assert_eq!(handle.exit_code(), Some(0));
        assert_eq!(handle.logs().len(), 1);
    }

    #[test]
    fn test_failure_sets_sentinel_and_clears_logs() {
        let mut handle = CommandHandle::new("sbx");
        handle.fail("boom").unwrap();

        assert_eq!(handle.state(), CommandState::Failed);
        assert_eq!(handle.exit_code(), Some(FAILURE_EXIT_CODE));
        assert!(handle.logs().is_empty());
        assert_eq!(handle.error(), Some("boom"));
    }

    #[test]
    fn test_no_resurrection_after_terminal() {
        let mut handle = CommandHandle::new("sbx");
        handle.complete(3, Vec::new()).unwrap();

        assert_eq!(
            handle.fail("late").unwrap_err().code(),
            ErrorCode::VALIDATION_INVALID_TRANSITION
        );
        assert!(handle.complete(0, Vec::new()).is_err());
        assert!(handle.mark_running(None).is_err());
        assert!(handle.assign_command_id("7").is_err());
        assert_eq!(handle.exit_code(), Some(3));
        assert_eq!(handle.state(), CommandState::Completed);
    }

    #[test]
    fn test_running_is_entered_once() {
        let mut handle = CommandHandle::new("sbx");
        handle.mark_running(None).unwrap();
        assert!(handle.mark_running(Some("1".to_string())).is_err());

        handle.assign_command_id("9").unwrap();
        assert_eq!(handle.command_id(), Some("9"));
    }
}
