use super::{RunStatus, Task, TaskHandle, TaskQueue, TaskRun};
use crate::error::{common, ErrorCode, SandboxExecError};
use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

type RunMap = Arc<Mutex<HashMap<String, watch::Receiver<TaskRun>>>>;

/// Runs registered tasks as tokio tasks in this process.
///
/// Finished runs stay retrievable for the retention period, then are evicted.
pub struct InProcessTaskQueue {
    tasks: RwLock<HashMap<String, Arc<dyn Task>>>,
    runs: RunMap,
    retention: Duration,
}

impl InProcessTaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            runs: Arc::new(Mutex::new(HashMap::new())),
            retention: Duration::from_secs(600),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_task(self, name: &str, task: Arc<dyn Task>) -> Self {
        self.register(name, task);
        self
    }

    pub fn register(&self, name: &str, task: Arc<dyn Task>) {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), task);
    }

    fn run_receiver(&self, run_id: &str) -> Result<watch::Receiver<TaskRun>, SandboxExecError> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned()
            .ok_or_else(|| common::run_not_found(run_id))
    }
}

impl Default for InProcessTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InProcessTaskQueue {
    async fn trigger(&self, task: &str, payload: Value) -> Result<TaskHandle, SandboxExecError> {
        let body = self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task)
            .cloned()
            .ok_or_else(|| {
                SandboxExecError::task_with_code(
                    ErrorCode::TASK_NOT_REGISTERED,
                    format!("Task '{}' is not registered", task),
                    None,
                )
            })?;

        let run_id = format!("run_{}", Uuid::new_v4().simple());
        let (tx, rx) = watch::channel(TaskRun::pending(&run_id));
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id.clone(), rx);

        debug!(run_id = %run_id, "Triggered task '{}'", task);
        let task_name = task.to_string();
        let id = run_id.clone();
        let runs = Arc::clone(&self.runs);
        let retention = self.retention;
        tokio::spawn(async move {
            tx.send_modify(|run| run.status = RunStatus::Executing);

            // A nested spawn turns a panic in the task body into a JoinError
            let outcome = tokio::spawn(async move { body.run(payload).await }).await;
            tx.send_modify(|run| match outcome {
                Ok(Ok(output)) => {
                    run.status = RunStatus::Completed;
                    run.output = Some(output);
                }
                Ok(Err(e)) => {
                    debug!(run_id = %id, "Task '{}' failed: {:#}", task_name, e);
                    run.status = RunStatus::Failed;
                    run.error = Some(e.to_string());
                }
                Err(join_error) => {
                    warn!(run_id = %id, "Task '{}' crashed: {}", task_name, join_error);
                    run.status = RunStatus::Crashed;
                    run.error = Some(if join_error.is_panic() {
                        panic_message(join_error.into_panic())
                    } else {
                        "Task was cancelled".to_string()
                    });
                }
            });

            tokio::time::sleep(retention).await;
            runs.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
            debug!(run_id = %id, "Evicted finished run");
        });

        Ok(TaskHandle { id: run_id })
    }

    async fn retrieve(&self, run_id: &str) -> Result<TaskRun, SandboxExecError> {
        let run = self.run_receiver(run_id)?.borrow().clone();
        Ok(run)
    }

    async fn wait_for_completion(&self, run_id: &str) -> Result<TaskRun, SandboxExecError> {
        let mut rx = self.run_receiver(run_id)?;
        let run = rx
            .wait_for(|run| run.status.is_terminal())
            .await
            .map_err(|_| {
                SandboxExecError::task_with_code(
                    ErrorCode::TASK_INCOMPLETE,
                    "Task runner stopped before the run finished",
                    Some(run_id.to_string()),
                )
            })?
            .clone();
        Ok(run)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Task for Echo {
        async fn run(&self, payload: Value) -> anyhow::Result<Value> {
            Ok(json!({ "echo": payload }))
        }
    }

    struct Boom;

    #[async_trait]
    impl Task for Boom {
        async fn run(&self, _payload: Value) -> anyhow::Result<Value> {
            anyhow::bail!("boom")
        }
    }

    struct Panics;

    #[async_trait]
    impl Task for Panics {
        async fn run(&self, _payload: Value) -> anyhow::Result<Value> {
            panic!("worker exploded")
        }
    }

    fn queue() -> InProcessTaskQueue {
        InProcessTaskQueue::new()
            .with_task("echo", Arc::new(Echo))
            .with_task("boom", Arc::new(Boom))
            .with_task("panics", Arc::new(Panics))
    }

    #[tokio::test]
    async fn test_completed_run_carries_output() {
        let queue = queue();
        let handle = queue.trigger("echo", json!({"x": 1})).await.unwrap();
        assert!(handle.id.starts_with("run_"));

        let run = queue.wait_for_completion(&handle.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.output, Some(json!({"echo": {"x": 1}})));
        assert!(run.error.is_none());

        assert_eq!(queue.retrieve(&handle.id).await.unwrap(), run);
    }

    #[tokio::test]
    async fn test_error_marks_run_failed() {
        let queue = queue();
        let handle = queue.trigger("boom", Value::Null).await.unwrap();
        let run = queue.wait_for_completion(&handle.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert!(run.output.is_none());
    }

    #[tokio::test]
    async fn test_panic_marks_run_crashed() {
        let queue = queue();
        let handle = queue.trigger("panics", Value::Null).await.unwrap();
        let run = queue.wait_for_completion(&handle.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Crashed);
        assert_eq!(run.error.as_deref(), Some("worker exploded"));
    }

    #[tokio::test]
    async fn test_unknown_task_and_run() {
        let queue = queue();
        let err = queue.trigger("missing", Value::Null).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TASK_NOT_REGISTERED);

        let err = queue.retrieve("run_nope").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TASK_RUN_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_finished_runs_are_evicted_after_retention() {
        let queue = queue().with_retention(Duration::from_millis(20));
        let handle = queue.trigger("echo", Value::Null).await.unwrap();
        let run = queue.wait_for_completion(&handle.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let err = queue.retrieve(&handle.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TASK_RUN_NOT_FOUND);
        assert!(queue.runs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_value(RunStatus::Crashed).unwrap(),
            json!("CRASHED")
        );
        assert_eq!(RunStatus::Executing.to_string(), "EXECUTING");
        assert!(!RunStatus::Pending.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }
}
