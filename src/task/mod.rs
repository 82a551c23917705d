//! Task-queue collaborator
//!
//! A queue hands a named task and its JSON payload to a worker and exposes
//! the run's status for polling. [`InProcessTaskQueue`] runs tasks on the
//! tokio runtime of the calling process.

pub mod in_process;

use crate::error::SandboxExecError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use in_process::InProcessTaskQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Crashed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Executing => "EXECUTING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Crashed => "CRASHED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Crashed
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by [`TaskQueue::trigger`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: String,
}

/// Snapshot of one task run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: String,
    pub status: RunStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl TaskRun {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: RunStatus::Pending,
            output: None,
            error: None,
        }
    }
}

/// A unit of work a queue can run by name
#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self, payload: Value) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn trigger(&self, task: &str, payload: Value) -> Result<TaskHandle, SandboxExecError>;

    /// Current state of a run, without waiting
    async fn retrieve(&self, run_id: &str) -> Result<TaskRun, SandboxExecError>;

    /// Wait until the run reaches a terminal status
    async fn wait_for_completion(&self, run_id: &str) -> Result<TaskRun, SandboxExecError>;
}
