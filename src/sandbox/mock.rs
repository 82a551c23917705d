use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use super::{
    CreateOptions, RemoteCommand, RunOptions, RunOutcome, Sandbox, SandboxFile, SandboxProvider,
};
use crate::error::{common, ErrorCode, SandboxExecError};
use crate::stream::{OutputSink, StreamSource};

/// Scripted [`SandboxProvider`] for tests
#[derive(Clone)]
pub struct MockSandboxProvider {
    sandboxes: Arc<Mutex<HashMap<String, MockSandbox>>>,
    pending: Arc<Mutex<Vec<MockSandbox>>>,
    create_failure: Arc<Mutex<Option<String>>>,
    created: Arc<Mutex<Vec<CreateOptions>>>,
}

impl MockSandboxProvider {
    pub fn new() -> Self {
        Self {
            sandboxes: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(Vec::new())),
            create_failure: Arc::new(Mutex::new(None)),
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make an existing sandbox reachable through `connect`
    pub fn with_sandbox(self, sandbox: MockSandbox) -> Self {
        self.sandboxes
            .lock()
            .unwrap()
            .insert(sandbox.id().to_string(), sandbox);
        self
    }

    /// Hand out `sandbox` from the next `create` call
    pub fn on_create(self, sandbox: MockSandbox) -> Self {
        self.pending.lock().unwrap().push(sandbox);
        self
    }

    pub fn fail_create(self, message: &str) -> Self {
        *self.create_failure.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn sandbox(&self, sandbox_id: &str) -> Option<MockSandbox> {
        self.sandboxes.lock().unwrap().get(sandbox_id).cloned()
    }

    /// Options passed to every `create` call so far
    pub fn create_calls(&self) -> Vec<CreateOptions> {
        self.created.lock().unwrap().clone()
    }
}

impl Default for MockSandboxProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxProvider for MockSandboxProvider {
    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>, SandboxExecError> {
        let sandbox = self
            .sandbox(sandbox_id)
            .ok_or_else(|| common::sandbox_not_found(sandbox_id))?;
        if !sandbox.is_running().await {
            return Err(common::sandbox_stopped(sandbox_id));
        }
        Ok(Arc::new(sandbox))
    }

    async fn create(&self, options: CreateOptions) -> Result<Arc<dyn Sandbox>, SandboxExecError> {
        self.created.lock().unwrap().push(options);
        if let Some(message) = self.create_failure.lock().unwrap().clone() {
            return Err(SandboxExecError::connection(message));
        }

        let sandbox = {
            let mut pending = self.pending.lock().unwrap();
            if pending.is_empty() {
                MockSandbox::new(&format!("mock-sandbox-{}", self.created.lock().unwrap().len()))
            } else {
                pending.remove(0)
            }
        };
        self.sandboxes
            .lock()
            .unwrap()
            .insert(sandbox.id().to_string(), sandbox.clone());
        Ok(Arc::new(sandbox))
    }
}

/// Scripted [`Sandbox`]: commands must be registered with
/// [`expect_command`](MockSandbox::expect_command) before they are run
#[derive(Clone)]
pub struct MockSandbox {
    inner: Arc<MockSandboxInner>,
}

struct MockSandboxInner {
    id: String,
    running: AtomicBool,
    next_pid: AtomicU32,
    files: Mutex<HashMap<String, Vec<u8>>>,
    write_failure: Mutex<Option<String>>,
    expectations: Mutex<Vec<MockExpectation>>,
    processes: Mutex<HashMap<u32, Arc<MockProcess>>>,
    call_history: Mutex<Vec<MockCall>>,
}

/// A recorded `run` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub command: String,
    pub background: bool,
}

struct MockExpectation {
    command: String,
    output: Vec<(StreamSource, String)>,
    exit_code: i32,
    pid: Option<u32>,
    failure: Option<String>,
    keeps_running: bool,
}

pub struct MockCommandConfig {
    sandbox: MockSandbox,
    expectation: MockExpectation,
}

impl MockSandbox {
    pub fn new(id: &str) -> Self {
        Self {
            inner: Arc::new(MockSandboxInner {
                id: id.to_string(),
                running: AtomicBool::new(true),
                next_pid: AtomicU32::new(100),
                files: Mutex::new(HashMap::new()),
                write_failure: Mutex::new(None),
                expectations: Mutex::new(Vec::new()),
                processes: Mutex::new(HashMap::new()),
                call_history: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn expect_command(&self, command: &str) -> MockCommandConfig {
        MockCommandConfig {
            sandbox: self.clone(),
            expectation: MockExpectation {
                command: command.to_string(),
                output: Vec::new(),
                exit_code: 0,
                pid: None,
                failure: None,
                keeps_running: false,
            },
        }
    }

    pub fn with_file(self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.inner
            .files
            .lock()
            .unwrap()
            .insert(path.to_string(), data.into());
        self
    }

    pub fn fail_writes(self, message: &str) -> Self {
        *self.inner.write_failure.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn stopped(self) -> Self {
        self.inner.running.store(false, Ordering::SeqCst);
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.files.lock().unwrap().get(path).cloned()
    }

    pub fn get_call_history(&self) -> Vec<MockCall> {
        self.inner.call_history.lock().unwrap().clone()
    }

    pub fn verify_called(&self, command: &str, times: usize) -> bool {
        let history = self.inner.call_history.lock().unwrap();
        history.iter().filter(|call| call.command == command).count() == times
    }

    /// Append output to a still-running process and deliver it to attached sinks
    pub fn emit(&self, pid: u32, source: StreamSource, chunk: &str) {
        if let Some(process) = self.process(pid) {
            process.deliver(source, chunk);
        }
    }

    /// Terminate a process started with [`MockCommandConfig::keeps_running`]
    pub fn complete(&self, pid: u32, exit_code: i32) {
        if let Some(process) = self.process(pid) {
            process.exit.send_replace(Some(exit_code));
        }
    }

    fn process(&self, pid: u32) -> Option<Arc<MockProcess>> {
        self.inner.processes.lock().unwrap().get(&pid).cloned()
    }

    fn take_expectation(&self, command: &str) -> Result<MockExpectation, SandboxExecError> {
        let mut expectations = self.inner.expectations.lock().unwrap();
        let index = expectations
            .iter()
            .position(|e| e.command == command)
            .ok_or_else(|| {
                SandboxExecError::execution_with_code(
                    ErrorCode::EXEC_SPAWN_FAILED,
                    format!("No expectation found for command: {}", command),
                    Some(command.to_string()),
                )
            })?;
        Ok(expectations.remove(index))
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn sandbox_id(&self) -> &str {
        &self.inner.id
    }

    async fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    async fn write_files(&self, files: &[SandboxFile]) -> Result<(), SandboxExecError> {
        if let Some(message) = self.inner.write_failure.lock().unwrap().clone() {
            return Err(SandboxExecError::execution_with_code(
                ErrorCode::EXEC_FILE_WRITE_FAILED,
                message,
                None,
            ));
        }
        let mut stored = self.inner.files.lock().unwrap();
        for file in files {
            stored.insert(file.path.clone(), file.data.clone().into_bytes());
        }
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxExecError> {
        self.file(path)
            .ok_or_else(|| common::file_not_found(&self.inner.id, path))
    }

    async fn run(
        &self,
        command: &str,
        options: RunOptions,
    ) -> Result<RunOutcome, SandboxExecError> {
        self.inner.call_history.lock().unwrap().push(MockCall {
            command: command.to_string(),
            background: options.background,
        });

        let expectation = self.take_expectation(command)?;
        if let Some(message) = expectation.failure {
            return Err(SandboxExecError::execution(message));
        }

        let pid = expectation
            .pid
            .unwrap_or_else(|| self.inner.next_pid.fetch_add(1, Ordering::SeqCst));
        let process = Arc::new(MockProcess::new(pid, options.sink));
        self.inner
            .processes
            .lock()
            .unwrap()
            .insert(pid, Arc::clone(&process));

        for (source, chunk) in &expectation.output {
            process.deliver(*source, chunk);
        }
        if !expectation.keeps_running {
            process.exit.send_replace(Some(expectation.exit_code));
        }

        if options.background {
            return Ok(RunOutcome {
                pid,
                exit_code: None,
            });
        }
        let exit_code = process.wait().await?;
        Ok(RunOutcome {
            pid,
            exit_code: Some(exit_code),
        })
    }

    async fn connect_command(
        &self,
        pid: u32,
        sink: Option<Arc<dyn OutputSink>>,
    ) -> Result<Box<dyn RemoteCommand>, SandboxExecError> {
        let process = self
            .process(pid)
            .ok_or_else(|| common::command_not_found(&self.inner.id, pid))?;
        if let Some(sink) = sink {
            process.attach(sink);
        }
        Ok(Box::new(MockCommand { process }))
    }

    async fn kill(&self) -> Result<(), SandboxExecError> {
        self.inner.running.store(false, Ordering::SeqCst);
        let processes: Vec<Arc<MockProcess>> =
            self.inner.processes.lock().unwrap().values().cloned().collect();
        for process in processes {
            if process.exit.borrow().is_none() {
                process.exit.send_replace(Some(137));
            }
        }
        Ok(())
    }
}

impl MockCommandConfig {
    pub fn emits_stdout(mut self, chunk: &str) -> Self {
        self.expectation
            .output
            .push((StreamSource::Stdout, chunk.to_string()));
        self
    }

    pub fn emits_stderr(mut self, chunk: &str) -> Self {
        self.expectation
            .output
            .push((StreamSource::Stderr, chunk.to_string()));
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.expectation.exit_code = code;
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.expectation.pid = Some(pid);
        self
    }

    /// `run` itself fails instead of starting a process
    pub fn fails(mut self, message: &str) -> Self {
        self.expectation.failure = Some(message.to_string());
        self
    }

    /// The process has no exit code until [`MockSandbox::complete`] is called
    pub fn keeps_running(mut self) -> Self {
        self.expectation.keeps_running = true;
        self
    }

    pub fn finish(self) {
        self.sandbox
            .inner
            .expectations
            .lock()
            .unwrap()
            .push(self.expectation);
    }
}

struct MockProcess {
    pid: u32,
    started_at: DateTime<Utc>,
    output: Mutex<(String, String, Vec<Arc<dyn OutputSink>>)>,
    exit: watch::Sender<Option<i32>>,
}

impl MockProcess {
    fn new(pid: u32, sink: Option<Arc<dyn OutputSink>>) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            pid,
            started_at: Utc::now(),
            output: Mutex::new((String::new(), String::new(), sink.into_iter().collect())),
            exit,
        }
    }

    fn deliver(&self, source: StreamSource, chunk: &str) {
        let mut output = self.output.lock().unwrap();
        let (stdout, stderr, sinks) = &mut *output;
        match source {
            StreamSource::Stdout => stdout.push_str(chunk),
            StreamSource::Stderr => stderr.push_str(chunk),
        }
        for sink in sinks.iter() {
            match source {
                StreamSource::Stdout => sink.on_stdout(chunk),
                StreamSource::Stderr => sink.on_stderr(chunk),
            }
        }
    }

    fn attach(&self, sink: Arc<dyn OutputSink>) {
        let mut output = self.output.lock().unwrap();
        if !output.0.is_empty() {
            sink.on_stdout(&output.0);
        }
        if !output.1.is_empty() {
            sink.on_stderr(&output.1);
        }
        output.2.push(sink);
    }

    async fn wait(&self) -> Result<i32, SandboxExecError> {
        let mut exit = self.exit.subscribe();
        let code = *exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SandboxExecError::execution("Mock process dropped"))?;
        code.ok_or_else(|| SandboxExecError::execution("Mock process has no exit code"))
    }
}

struct MockCommand {
    process: Arc<MockProcess>,
}

#[async_trait]
impl RemoteCommand for MockCommand {
    fn pid(&self) -> u32 {
        self.process.pid
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        Some(self.process.started_at)
    }

    fn stdout(&self) -> String {
        self.process.output.lock().unwrap().0.clone()
    }

    fn stderr(&self) -> String {
        self.process.output.lock().unwrap().1.clone()
    }

    fn exit_code(&self) -> Option<i32> {
        *self.process.exit.borrow()
    }

    async fn wait(&self) -> Result<i32, SandboxExecError> {
        self.process.wait().await
    }
}
