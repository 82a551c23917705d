//! # sandbox-exec
//!
//! Run shell commands in execution sandboxes and follow their output line by
//! line, either waiting for the command to finish or returning while it keeps
//! running in the background.
//!
//! ## Usage
//!
//! ```bash
//! sandbox-exec serve [--host 127.0.0.1] [--port 3000]
//! sandbox-exec run [--sandbox-id ID] [--background] [--sudo] <command> [args...]
//! ```
//!
//! ## Modules
//!
//! - `stream` - Line splitting and the stdout/stderr log multiplexer
//! - `sandbox` - Sandbox collaborator traits, a process-backed implementation and a scripted mock
//! - `task` - Task-queue collaborator and an in-process queue
//! - `lifecycle` - Command state machine, blocking/detached execution, bounded probing, results
//! - `tool` - The run-command tool and its progress events
//! - `server` - HTTP routes (status, files, NDJSON logs, run command)
//! - `config` - Configuration management
//! - `error` - Error types and codes
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod sandbox;
pub mod server;
pub mod stream;
pub mod task;
pub mod tool;
