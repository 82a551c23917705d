//! Command lifecycle: state machine, blocking and detached execution,
//! bounded probing, and the caller-visible result.

pub mod controller;
pub mod probe;
pub mod result;
pub mod state;
pub mod task;

pub use controller::CommandController;
pub use probe::{probe, ProbeOutcome, ProbePolicy};
pub use result::RunResult;
pub use state::{CommandHandle, CommandState, FAILURE_EXIT_CODE};
pub use task::{RunRequest, RunUserCodeTask, RUN_USER_CODE_TASK, USER_CODE_PATH};
