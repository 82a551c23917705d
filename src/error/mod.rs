use std::fmt::Display;
use thiserror::Error;

pub mod codes;
pub mod helpers;


pub use codes::{describe_error_code, ErrorCode};
pub use helpers::{common, parse_command_id, ErrorExt};

pub type Result<T, E = SandboxExecError> = std::result::Result<T, E>;

/// The unified error type for sandbox command execution
#[derive(Error, Debug)]
pub enum SandboxExecError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Connection error: {message}")]
    Connection {
        code: u16,
        message: String,
        sandbox_id: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Execution error: {message}")]
    Execution {
        code: u16,
        message: String,
        command: Option<String>,
        exit_code: Option<i32>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Task error: {message}")]
    Task {
        code: u16,
        message: String,
        run_id: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Validation error: {message}")]
    Validation {
        code: u16,
        message: String,
        field: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SandboxExecError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: ErrorCode::CONFIG_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with specific code
    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with default code
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            code: ErrorCode::CONNECTION_GENERIC,
            message: message.into(),
            sandbox_id: None,
            source: None,
        }
    }

    /// Create a connection error with specific code and sandbox ID
    pub fn connection_with_code(
        code: u16,
        message: impl Into<String>,
        sandbox_id: Option<String>,
    ) -> Self {
        Self::Connection {
            code,
            message: message.into(),
            sandbox_id,
            source: None,
        }
    }

    /// Create an execution error with default code
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            code: ErrorCode::EXEC_GENERIC,
            message: message.into(),
            command: None,
            exit_code: None,
            source: None,
        }
    }

    /// Create an execution error with specific code
    pub fn execution_with_code(
        code: u16,
        message: impl Into<String>,
        command: Option<String>,
    ) -> Self {
        Self::Execution {
            code,
            message: message.into(),
            command,
            exit_code: None,
            source: None,
        }
    }

    /// Create a task queue error with default code
    pub fn task(message: impl Into<String>) -> Self {
        Self::Task {
            code: ErrorCode::TASK_GENERIC,
            message: message.into(),
            run_id: None,
            source: None,
        }
    }

    /// Create a task queue error with specific code and run ID
    pub fn task_with_code(code: u16, message: impl Into<String>, run_id: Option<String>) -> Self {
        Self::Task {
            code,
            message: message.into(),
            run_id,
            source: None,
        }
    }

    /// Create a validation error with default code
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            code: ErrorCode::VALIDATION_GENERIC,
            message: message.into(),
            field: None,
            source: None,
        }
    }

    /// Create a validation error with specific code and field
    pub fn validation_with_code(
        code: u16,
        message: impl Into<String>,
        field: Option<String>,
    ) -> Self {
        Self::Validation {
            code,
            message: message.into(),
            field,
            source: None,
        }
    }

    /// Create a generic other error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Connection { source: src, .. }
            | Self::Execution { source: src, .. }
            | Self::Task { source: src, .. }
            | Self::Validation { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Config { message, .. }
            | Self::Connection { message, .. }
            | Self::Execution { message, .. }
            | Self::Task { message, .. }
            | Self::Validation { message, .. }
            | Self::Other { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
        }
        self
    }

    /// Set the exit code for an execution error
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        if let Self::Execution {
            exit_code: ref mut ec,
            ..
        } = self
        {
            *ec = Some(exit_code);
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Connection { code, .. }
            | Self::Execution { code, .. }
            | Self::Task { code, .. }
            | Self::Validation { code, .. }
            | Self::Other { code, .. } => *code,
        }
    }

    /// The bare message, without the code prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Config { message, .. }
            | Self::Connection { message, .. }
            | Self::Execution { message, .. }
            | Self::Task { message, .. }
            | Self::Validation { message, .. }
            | Self::Other { message, .. } => message,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Connection { .. } => 3,
            Self::Execution { .. } => 4,
            Self::Task { .. } => 5,
            Self::Validation { .. } => 6,
            Self::Other { .. } => 1,
        }
    }

    /// HTTP status equivalent for this error
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Connection { .. } => 404,
            Self::Validation { .. } => 400,
            _ => 500,
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, .. } => format!("Configuration problem: {}", message),
            Self::Connection {
                message,
                sandbox_id,
                ..
            } => {
                if let Some(id) = sandbox_id {
                    format!("Sandbox {} unreachable: {}", id, message)
                } else {
                    format!("Connection error: {}", message)
                }
            }
            Self::Execution {
                message, command, ..
            } => {
                if let Some(cmd) = command {
                    format!("Command '{}' failed: {}", cmd, message)
                } else {
                    format!("Execution error: {}", message)
                }
            }
            Self::Task {
                message, run_id, ..
            } => {
                if let Some(id) = run_id {
                    format!("Task run {} error: {}", id, message)
                } else {
                    format!("Task error: {}", message)
                }
            }
            Self::Validation { message, field, .. } => {
                if let Some(f) = field {
                    format!("Validation error for '{}': {}", f, message)
                } else {
                    format!("Validation error: {}", message)
                }
            }
            Self::Other { message, .. } => message.clone(),
        }
    }
}

impl From<std::io::Error> for SandboxExecError {
    fn from(err: std::io::Error) -> Self {
        SandboxExecError::other(err.to_string()).with_source(err)
    }
}

impl From<serde_json::Error> for SandboxExecError {
    fn from(err: serde_json::Error) -> Self {
        SandboxExecError::validation_with_code(
            ErrorCode::VALIDATION_INVALID_FORMAT,
            err.to_string(),
            None,
        )
        .with_source(err)
    }
}
