//! Sandbox collaborator abstraction
//!
//! A sandbox is an execution environment identified by an id that supports
//! file I/O and process spawning. The lifecycle controller only talks to the
//! traits in this module; [`local`] provides a process-backed implementation
//! and [`mock`] a scripted one for tests.

pub mod local;
pub mod mock;

use crate::error::SandboxExecError;
use crate::stream::OutputSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use local::{LocalSandbox, LocalSandboxProvider};
pub use mock::{MockSandbox, MockSandboxProvider};

/// Options for provisioning a new sandbox
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub timeout: Option<Duration>,
    pub ports: Vec<u16>,
}

/// A file to place inside a sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxFile {
    pub path: String,
    pub data: String,
}

impl SandboxFile {
    pub fn new(path: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }
}

/// How a command is launched
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Return as soon as the process is spawned
    pub background: bool,
    /// Receives stdout/stderr chunks as they arrive
    pub sink: Option<Arc<dyn OutputSink>>,
}

impl RunOptions {
    pub fn foreground(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            background: false,
            sink: Some(sink),
        }
    }

    pub fn background() -> Self {
        Self {
            background: true,
            sink: None,
        }
    }
}

/// Result of [`Sandbox::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub pid: u32,
    /// Present once the command has terminated (always, for foreground runs)
    pub exit_code: Option<i32>,
}

/// Provisions and reconnects to sandboxes
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Connect to an existing sandbox; unknown or stopped ids are connection errors
    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>, SandboxExecError>;

    async fn create(&self, options: CreateOptions) -> Result<Arc<dyn Sandbox>, SandboxExecError>;
}

/// One sandbox instance
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn sandbox_id(&self) -> &str;

    async fn is_running(&self) -> bool;

    async fn write_files(&self, files: &[SandboxFile]) -> Result<(), SandboxExecError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxExecError>;

    /// Run a shell command string. Foreground runs resolve when the command
    /// terminates; background runs resolve once it has a pid.
    async fn run(&self, command: &str, options: RunOptions)
        -> Result<RunOutcome, SandboxExecError>;

    /// Attach to a running or finished command by pid.
    ///
    /// When a sink is given it first receives the output buffered so far and
    /// then live output, with nothing lost or repeated across the attach.
    async fn connect_command(
        &self,
        pid: u32,
        sink: Option<Arc<dyn OutputSink>>,
    ) -> Result<Box<dyn RemoteCommand>, SandboxExecError>;

    /// Tear the sandbox down, terminating every process in it
    async fn kill(&self) -> Result<(), SandboxExecError>;
}

/// Handle to a command running inside a sandbox
#[async_trait]
pub trait RemoteCommand: Send + Sync {
    fn pid(&self) -> u32;

    fn started_at(&self) -> Option<DateTime<Utc>>;

    /// Stdout produced so far
    fn stdout(&self) -> String;

    /// Stderr produced so far
    fn stderr(&self) -> String;

    /// Exit code if the command has terminated, without waiting
    fn exit_code(&self) -> Option<i32>;

    /// Wait for the command to terminate
    async fn wait(&self) -> Result<i32, SandboxExecError>;
}
