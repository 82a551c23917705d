use super::state::{CommandHandle, CommandState, FAILURE_EXIT_CODE};
use serde::{Deserialize, Serialize};

/// Caller-visible result of one run.
///
/// Absent values serialize as `null`, never omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub sandbox_id: String,
    pub command_id: Option<String>,
    pub logs: Vec<String>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl RunResult {
    pub fn from_handle(handle: &CommandHandle) -> Self {
        match handle.state() {
            CommandState::Completed => Self {
                sandbox_id: handle.sandbox_id().to_string(),
                command_id: None,
                logs: handle.logs().iter().map(|record| record.formatted()).collect(),
                exit_code: handle.exit_code(),
                error: None,
            },
            CommandState::Failed => Self::failed(
                handle.sandbox_id(),
                handle.error().unwrap_or("Command failed"),
            ),
            CommandState::Starting | CommandState::Running => Self {
                sandbox_id: handle.sandbox_id().to_string(),
                command_id: handle.command_id().map(str::to_string),
                logs: Vec::new(),
                exit_code: None,
                error: None,
            },
        }
    }

    pub fn failed(sandbox_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            command_id: None,
            logs: Vec::new(),
            exit_code: Some(FAILURE_EXIT_CODE),
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{LogRecord, StreamSource};
    use serde_json::json;

    #[test]
    fn test_completed_result() {
        let mut handle = CommandHandle::new("sbx");
        handle.mark_running(Some("12".to_string())).unwrap();
        handle
            .complete(
                0,
                vec![
                    LogRecord::new(StreamSource::Stdout, "a.txt"),
                    LogRecord::new(StreamSource::Stderr, "warn"),
                ],
            )
            .unwrap();

        let result = RunResult::from_handle(&handle);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "sandboxId": "sbx",
                "commandId": null,
                "logs": ["[stdout] a.txt", "[stderr] warn"],
                "exitCode": 0,
                "error": null
            })
        );
        assert!(!result.is_failure());
    }

    #[test]
    fn test_failed_result() {
        let mut handle = CommandHandle::new("sbx");
        handle.mark_running(Some("12".to_string())).unwrap();
        handle.fail("boom").unwrap();

        let result = RunResult::from_handle(&handle);
        assert_eq!(result, RunResult::failed("sbx", "boom"));
        assert_eq!(result.exit_code, Some(1));
        assert!(result.logs.is_empty());
        assert!(result.command_id.is_none());
        assert!(result.is_failure());
    }

    #[test]
    fn test_running_result_has_only_ids() {
        let mut handle = CommandHandle::new("sbx");
        handle.mark_running(Some("77".to_string())).unwrap();

        let result = RunResult::from_handle(&handle);
        assert_eq!(result.command_id.as_deref(), Some("77"));
        assert!(result.exit_code.is_none());
        assert!(result.error.is_none());
        assert!(result.logs.is_empty());
    }

    #[test]
    fn test_deserializes_task_output() {
        let result: RunResult = serde_json::from_value(json!({
            "sandboxId": "sbx",
            "commandId": "5",
            "logs": [],
            "exitCode": null,
            "error": null
        }))
        .unwrap();
        assert_eq!(result.command_id.as_deref(), Some("5"));
    }
}
