/// Error code registry for sandbox-exec
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Connection errors
/// - 4000-4999: Execution errors
/// - 5000-5999: Task queue errors
/// - 7000-7999: Validation errors
/// - 9000-9999: Other errors
#[allow(dead_code)]
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_PARSE_ERROR: u16 = 1002;
    pub const CONFIG_INVALID_VALUE: u16 = 1003;

    // Connection errors (2000-2999)
    pub const CONNECTION_GENERIC: u16 = 2000;
    pub const SANDBOX_NOT_FOUND: u16 = 2001;
    pub const SANDBOX_STOPPED: u16 = 2002;
    pub const COMMAND_NOT_FOUND: u16 = 2003;
    pub const FILE_NOT_FOUND: u16 = 2004;

    // Execution errors (4000-4999)
    pub const EXEC_GENERIC: u16 = 4000;
    pub const EXEC_SPAWN_FAILED: u16 = 4001;
    pub const EXEC_WAIT_FAILED: u16 = 4002;
    pub const EXEC_OUTPUT_ERROR: u16 = 4003;
    pub const EXEC_KILLED: u16 = 4004;
    pub const EXEC_FILE_WRITE_FAILED: u16 = 4005;

    // Task queue errors (5000-5999)
    pub const TASK_GENERIC: u16 = 5000;
    pub const TASK_NOT_REGISTERED: u16 = 5001;
    pub const TASK_RUN_NOT_FOUND: u16 = 5002;
    pub const TASK_FAILED: u16 = 5003;
    pub const TASK_INCOMPLETE: u16 = 5004;
    pub const TASK_NO_OUTPUT: u16 = 5005;

    // Validation errors (7000-7999)
    pub const VALIDATION_GENERIC: u16 = 7000;
    pub const VALIDATION_REQUIRED_FIELD: u16 = 7001;
    pub const VALIDATION_INVALID_FORMAT: u16 = 7002;
    pub const VALIDATION_INVALID_COMMAND_ID: u16 = 7003;
    pub const VALIDATION_INVALID_TRANSITION: u16 = 7004;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
    pub const OTHER_INTERNAL_ERROR: u16 = 9001;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Failed to parse configuration",
        1003 => "Invalid value in configuration",

        2000 => "Generic connection error",
        2001 => "Sandbox not found",
        2002 => "Sandbox is no longer running",
        2003 => "Command not found in sandbox",
        2004 => "File not found in sandbox",

        4000 => "Generic execution error",
        4001 => "Failed to spawn command",
        4002 => "Failed to wait for command",
        4003 => "Command output error",
        4004 => "Command was killed",
        4005 => "Failed to write sandbox file",

        5000 => "Generic task queue error",
        5001 => "Task is not registered",
        5002 => "Task run not found",
        5003 => "Task run failed",
        5004 => "Task run did not complete",
        5005 => "Task run returned no output",

        7000 => "Generic validation error",
        7001 => "Required field is missing",
        7002 => "Invalid input format",
        7003 => "Invalid command ID",
        7004 => "Invalid command state transition",

        9000 => "Generic error",
        9001 => "Internal error",

        _ => "Unknown error code",
    }
}
