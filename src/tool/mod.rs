//! Caller-facing tools built on the task queue

pub mod run_command;

pub use run_command::{
    RunCommandData, RunCommandEvent, RunCommandInput, RunCommandReport, RunCommandStatus,
    RunCommandTool, RUN_COMMAND_EVENT_TYPE,
};
