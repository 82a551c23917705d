use super::{ErrorCode, SandboxExecError};

/// Extension trait for convenient error conversion
pub trait ErrorExt<T> {
    /// Convert to SandboxExecError with context
    fn to_sandbox_error(self, context: impl Into<String>) -> Result<T, SandboxExecError>;

    /// Convert to SandboxExecError with specific error type
    fn to_config_error(self, message: impl Into<String>) -> Result<T, SandboxExecError>;
    fn to_connection_error(self, message: impl Into<String>) -> Result<T, SandboxExecError>;
    fn to_execution_error(self, message: impl Into<String>) -> Result<T, SandboxExecError>;
}

impl<T, E> ErrorExt<T> for Result<T, E>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn to_sandbox_error(self, context: impl Into<String>) -> Result<T, SandboxExecError> {
        self.map_err(|e| SandboxExecError::other(context).with_source(e))
    }

    fn to_config_error(self, message: impl Into<String>) -> Result<T, SandboxExecError> {
        self.map_err(|e| SandboxExecError::config(message).with_source(e))
    }

    fn to_connection_error(self, message: impl Into<String>) -> Result<T, SandboxExecError> {
        self.map_err(|e| SandboxExecError::connection(message).with_source(e))
    }

    fn to_execution_error(self, message: impl Into<String>) -> Result<T, SandboxExecError> {
        self.map_err(|e| SandboxExecError::execution(message).with_source(e))
    }
}

/// Helper functions for common error scenarios
pub mod common {
    use super::*;

    pub fn sandbox_not_found(sandbox_id: &str) -> SandboxExecError {
        SandboxExecError::connection_with_code(
            ErrorCode::SANDBOX_NOT_FOUND,
            format!("Sandbox '{}' not found", sandbox_id),
            Some(sandbox_id.to_string()),
        )
    }

    pub fn sandbox_stopped(sandbox_id: &str) -> SandboxExecError {
        SandboxExecError::connection_with_code(
            ErrorCode::SANDBOX_STOPPED,
            format!("Sandbox '{}' is not running", sandbox_id),
            Some(sandbox_id.to_string()),
        )
    }

    pub fn command_not_found(sandbox_id: &str, pid: u32) -> SandboxExecError {
        SandboxExecError::connection_with_code(
            ErrorCode::COMMAND_NOT_FOUND,
            format!("Command {} not found", pid),
            Some(sandbox_id.to_string()),
        )
    }

    pub fn file_not_found(sandbox_id: &str, path: &str) -> SandboxExecError {
        SandboxExecError::connection_with_code(
            ErrorCode::FILE_NOT_FOUND,
            format!("File '{}' not found", path),
            Some(sandbox_id.to_string()),
        )
    }

    /// Non-numeric command identifiers are rejected before any remote call
    pub fn invalid_command_id(raw: &str) -> SandboxExecError {
        SandboxExecError::validation_with_code(
            ErrorCode::VALIDATION_INVALID_COMMAND_ID,
            format!("Invalid command ID: '{}'", raw),
            Some("cmdId".to_string()),
        )
    }

    pub fn missing_required_field(field: &str) -> SandboxExecError {
        SandboxExecError::validation_with_code(
            ErrorCode::VALIDATION_REQUIRED_FIELD,
            format!("Required field '{}' is missing", field),
            Some(field.to_string()),
        )
    }

    pub fn spawn_failed(command: &str, source: std::io::Error) -> SandboxExecError {
        SandboxExecError::execution_with_code(
            ErrorCode::EXEC_SPAWN_FAILED,
            format!("Failed to spawn '{}': {}", command, source),
            Some(command.to_string()),
        )
        .with_source(source)
    }

    pub fn run_not_found(run_id: &str) -> SandboxExecError {
        SandboxExecError::task_with_code(
            ErrorCode::TASK_RUN_NOT_FOUND,
            format!("Run '{}' not found", run_id),
            Some(run_id.to_string()),
        )
    }
}

/// Parse a command identifier the way the sandbox assigns them (process ids)
pub fn parse_command_id(raw: &str) -> Result<u32, SandboxExecError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| common::invalid_command_id(raw))
}
