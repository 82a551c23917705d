//! Process-backed sandboxes on the local machine
//!
//! Each sandbox is a working directory under the provider's root. Commands
//! run as `<shell> -c <command>` in their own process group so tearing the
//! sandbox down takes every descendant with it. There is no filesystem
//! isolation: relative paths resolve against the sandbox directory and
//! absolute paths are used as given.

use super::{
    CreateOptions, RemoteCommand, RunOptions, RunOutcome, Sandbox, SandboxFile, SandboxProvider,
};
use crate::config::SandboxConfig;
use crate::error::{common, ErrorCode, ErrorExt, SandboxExecError};
use crate::stream::{OutputSink, StreamSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const READ_BUFFER_SIZE: usize = 8192;
/// How long teardown waits for a killed process to report its exit
const REAP_GRACE: Duration = Duration::from_secs(5);
const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Creates and tracks [`LocalSandbox`]es
pub struct LocalSandboxProvider {
    root: PathBuf,
    shell: String,
    default_timeout: Duration,
    sandboxes: Arc<Mutex<HashMap<String, Arc<LocalSandbox>>>>,
}

impl LocalSandboxProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shell: "sh".to_string(),
            default_timeout: Duration::from_millis(600_000),
            sandboxes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.root_dir.clone())
            .with_shell(config.shell.clone())
            .with_default_timeout(config.default_timeout)
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids of the sandboxes this provider still tracks
    pub async fn sandbox_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sandboxes.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget a sandbox once it has shut down and its processes have exited
    fn schedule_reaping(&self, sandbox: &Arc<LocalSandbox>) {
        let sandboxes = Arc::clone(&self.sandboxes);
        let mut shutdown = sandbox.shutdown.subscribe();
        let sandbox = Arc::downgrade(sandbox);
        tokio::spawn(async move {
            if shutdown.wait_for(|stop| *stop).await.is_err() {
                return;
            }
            let Some(sandbox) = sandbox.upgrade() else {
                return;
            };
            sandbox.reap().await;
            sandboxes.lock().await.remove(&sandbox.id);
            debug!(sandbox_id = %sandbox.id, "Reaped local sandbox");
        });
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>, SandboxExecError> {
        let sandbox = self
            .sandboxes
            .lock()
            .await
            .get(sandbox_id)
            .cloned()
            .ok_or_else(|| common::sandbox_not_found(sandbox_id))?;

        if !sandbox.is_running().await {
            return Err(common::sandbox_stopped(sandbox_id));
        }

        debug!(sandbox_id = %sandbox_id, "Connected to local sandbox");
        Ok(sandbox)
    }

    async fn create(&self, options: CreateOptions) -> Result<Arc<dyn Sandbox>, SandboxExecError> {
        let id = Uuid::new_v4().simple().to_string();
        let workdir = self.root.join(&id);
        tokio::fs::create_dir_all(&workdir)
            .await
            .to_connection_error(format!(
                "Failed to create sandbox directory {}",
                workdir.display()
            ))?;

        if !options.ports.is_empty() {
            debug!(
                sandbox_id = %id,
                ports = ?options.ports,
                "Local sandboxes share the host network; ignoring requested ports"
            );
        }

        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let sandbox = Arc::new(LocalSandbox::new(id.clone(), workdir, self.shell.clone()));
        self.sandboxes
            .lock()
            .await
            .insert(id.clone(), Arc::clone(&sandbox));
        sandbox.schedule_expiry(timeout);
        self.schedule_reaping(&sandbox);

        info!(sandbox_id = %id, ?timeout, "Created local sandbox");
        Ok(sandbox)
    }
}

/// A working directory plus the processes started in it
pub struct LocalSandbox {
    id: String,
    workdir: PathBuf,
    shell: String,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    processes: Mutex<HashMap<u32, Arc<ProcessEntry>>>,
}

impl LocalSandbox {
    pub fn new(id: String, workdir: PathBuf, shell: String) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id,
            workdir,
            shell,
            running: AtomicBool::new(true),
            shutdown,
            processes: Mutex::new(HashMap::new()),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn schedule_expiry(self: &Arc<Self>, timeout: Duration) {
        let sandbox: Weak<LocalSandbox> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(sandbox) = sandbox.upgrade() {
                info!(sandbox_id = %sandbox.id, "Sandbox timeout reached; shutting down");
                sandbox.shut_down();
            }
        });
    }

    fn shut_down(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.shutdown.send_replace(true);
        }
    }

    /// Wait for every process to exit, then drop them with their buffered output
    async fn reap(&self) {
        let entries: Vec<Arc<ProcessEntry>> =
            self.processes.lock().await.values().cloned().collect();
        for entry in &entries {
            if tokio::time::timeout(REAP_GRACE, entry.wait()).await.is_err() {
                warn!(sandbox_id = %self.id, pid = entry.pid, "Process did not exit after teardown");
            }
        }
        self.processes.lock().await.clear();
    }

    fn ensure_running(&self) -> Result<(), SandboxExecError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(common::sandbox_stopped(&self.id))
        }
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }

    async fn spawn(
        &self,
        command: &str,
        sink: Option<Arc<dyn OutputSink>>,
    ) -> Result<Arc<ProcessEntry>, SandboxExecError> {
        let mut cmd = configure_command(&self.shell, command, &self.workdir);
        let mut child = cmd.spawn().map_err(|e| {
            warn!(sandbox_id = %self.id, "Failed to spawn '{}': {}", command, e);
            common::spawn_failed(command, e)
        })?;

        let pid = child.id().ok_or_else(|| {
            SandboxExecError::execution_with_code(
                ErrorCode::EXEC_SPAWN_FAILED,
                "Process exited before a pid was assigned",
                Some(command.to_string()),
            )
        })?;
        let stdout = extract_stream(child.stdout.take(), "stdout")?;
        let stderr = extract_stream(child.stderr.take(), "stderr")?;

        let (exit_tx, exit_rx) = watch::channel(None);
        let entry = Arc::new(ProcessEntry::new(pid, command, exit_rx, sink));
        self.processes.lock().await.insert(pid, Arc::clone(&entry));

        let pumps = [
            tokio::spawn(pump(stdout, StreamSource::Stdout, Arc::clone(&entry))),
            tokio::spawn(pump(stderr, StreamSource::Stderr, Arc::clone(&entry))),
        ];
        tokio::spawn(supervise(
            child,
            Arc::clone(&entry),
            pumps,
            exit_tx,
            self.shutdown.subscribe(),
        ));

        debug!(sandbox_id = %self.id, pid, "Spawned '{}'", command);
        Ok(entry)
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn sandbox_id(&self) -> &str {
        &self.id
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn write_files(&self, files: &[SandboxFile]) -> Result<(), SandboxExecError> {
        self.ensure_running()?;
        for file in files {
            let target = self.resolve_path(&file.path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| write_failed(&file.path, e))?;
            }
            tokio::fs::write(&target, file.data.as_bytes())
                .await
                .map_err(|e| write_failed(&file.path, e))?;
            debug!(sandbox_id = %self.id, "Wrote {} bytes to {}", file.data.len(), target.display());
        }
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxExecError> {
        self.ensure_running()?;
        let target = self.resolve_path(path);
        tokio::fs::read(&target).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                common::file_not_found(&self.id, path)
            } else {
                SandboxExecError::other(format!("Failed to read '{}': {}", path, e)).with_source(e)
            }
        })
    }

    async fn run(
        &self,
        command: &str,
        options: RunOptions,
    ) -> Result<RunOutcome, SandboxExecError> {
        self.ensure_running()?;
        let entry = self.spawn(command, options.sink).await?;
        if options.background {
            return Ok(RunOutcome {
                pid: entry.pid,
                exit_code: None,
            });
        }

        let exit_code = entry.wait().await?;
        Ok(RunOutcome {
            pid: entry.pid,
            exit_code: Some(exit_code),
        })
    }

    async fn connect_command(
        &self,
        pid: u32,
        sink: Option<Arc<dyn OutputSink>>,
    ) -> Result<Box<dyn RemoteCommand>, SandboxExecError> {
        let entry = self
            .processes
            .lock()
            .await
            .get(&pid)
            .cloned()
            .ok_or_else(|| common::command_not_found(&self.id, pid))?;

        if let Some(sink) = sink {
            entry.attach(sink);
        }
        Ok(Box::new(LocalCommand { entry }))
    }

    async fn kill(&self) -> Result<(), SandboxExecError> {
        info!(sandbox_id = %self.id, "Killing sandbox");
        self.shut_down();
        Ok(())
    }
}

fn write_failed(path: &str, error: std::io::Error) -> SandboxExecError {
    SandboxExecError::execution_with_code(
        ErrorCode::EXEC_FILE_WRITE_FAILED,
        format!("Failed to write '{}': {}", path, error),
        None,
    )
    .with_source(error)
}

/// Extract a stream from a child process, converting None to error
fn extract_stream<T>(stream: Option<T>, stream_name: &str) -> Result<T, SandboxExecError> {
    stream.ok_or_else(|| {
        SandboxExecError::execution_with_code(
            ErrorCode::EXEC_OUTPUT_ERROR,
            format!("Failed to capture {}", stream_name),
            None,
        )
    })
}

/// Build the shell invocation with a cleared, minimal environment
fn configure_command(shell: &str, command: &str, workdir: &Path) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(shell);

    // Own process group so teardown can signal every descendant
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.arg("-c").arg(command);
    cmd.env_clear();
    preserve_essential_env(&mut cmd);
    cmd.current_dir(workdir);
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd
}

fn preserve_essential_env(cmd: &mut tokio::process::Command) {
    match std::env::var("PATH") {
        Ok(path) => {
            cmd.env("PATH", path);
        }
        Err(_) => {
            warn!("PATH is not set; sandbox commands use {}", FALLBACK_PATH);
            cmd.env("PATH", FALLBACK_PATH);
        }
    }

    for var in ["HOME", "USER", "SHELL", "TMPDIR", "TERM", "LC_ALL", "LC_CTYPE"] {
        if let Ok(value) = std::env::var(var) {
            cmd.env(var, value);
        }
    }

    let lang = std::env::var("LANG").unwrap_or_else(|_| "en_US.UTF-8".to_string());
    cmd.env("LANG", lang);
}

/// Read raw chunks from one pipe and hand them to the process entry
async fn pump<R>(mut reader: R, source: StreamSource, entry: Arc<ProcessEntry>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Utf8Decoder::default();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() {
                    entry.deliver(source, &text);
                }
            }
            Err(e) => {
                warn!(pid = entry.pid, "Failed reading {}: {}", source, e);
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        entry.deliver(source, &rest);
    }
}

/// Wait for exit (or sandbox teardown), then publish the exit once both pipes are drained
async fn supervise(
    mut child: tokio::process::Child,
    entry: Arc<ProcessEntry>,
    pumps: [JoinHandle<()>; 2],
    exit_tx: watch::Sender<Option<ProcessExit>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let pid = entry.pid;
    let status = tokio::select! {
        status = child.wait() => status,
        _ = shutdown_requested(&mut shutdown) => {
            terminate_group(pid);
            child.wait().await
        }
    };

    for pump in pumps {
        if let Err(e) = pump.await {
            warn!(pid, "Output reader task failed: {}", e);
        }
    }

    let exit = match status {
        Ok(status) => ProcessExit::from_status(status),
        Err(e) => ProcessExit::WaitFailed(e.to_string()),
    };
    debug!(pid, ?exit, "Process finished");
    entry.close();
    exit_tx.send_replace(Some(exit));
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        // Sandbox dropped without teardown; let the process run to completion
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
fn terminate_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!(pid, "Process group already gone: {}", e);
    }
}

#[cfg(not(unix))]
fn terminate_group(pid: u32) {
    debug!(pid, "Process group termination is only supported on unix");
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProcessExit {
    Code(i32),
    Signal(i32),
    WaitFailed(String),
}

impl ProcessExit {
    fn from_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ProcessExit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ProcessExit::Signal(signal);
            }
        }
        ProcessExit::Code(1)
    }

    /// Shell convention: death by signal N reports 128 + N
    fn code(&self) -> Option<i32> {
        match self {
            ProcessExit::Code(code) => Some(*code),
            ProcessExit::Signal(signal) => Some(128 + signal),
            ProcessExit::WaitFailed(_) => None,
        }
    }
}

struct BufferedOutput {
    stdout: String,
    stderr: String,
    sinks: Vec<Arc<dyn OutputSink>>,
    /// Both pipes are drained; no further output will arrive
    closed: bool,
}

struct ProcessEntry {
    pid: u32,
    command: String,
    started_at: DateTime<Utc>,
    output: StdMutex<BufferedOutput>,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessEntry {
    fn new(
        pid: u32,
        command: &str,
        exit: watch::Receiver<Option<ProcessExit>>,
        sink: Option<Arc<dyn OutputSink>>,
    ) -> Self {
        Self {
            pid,
            command: command.to_string(),
            started_at: Utc::now(),
            output: StdMutex::new(BufferedOutput {
                stdout: String::new(),
                stderr: String::new(),
                sinks: sink.into_iter().collect(),
                closed: false,
            }),
            exit,
        }
    }

    /// Buffer a chunk and forward it to every attached sink under one lock
    fn deliver(&self, source: StreamSource, chunk: &str) {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        match source {
            StreamSource::Stdout => output.stdout.push_str(chunk),
            StreamSource::Stderr => output.stderr.push_str(chunk),
        }
        for sink in &output.sinks {
            match source {
                StreamSource::Stdout => sink.on_stdout(chunk),
                StreamSource::Stderr => sink.on_stderr(chunk),
            }
        }
    }

    /// Replay buffered output into the sink, then subscribe it to live output
    /// unless the process has already finished
    fn attach(&self, sink: Arc<dyn OutputSink>) {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        if !output.stdout.is_empty() {
            sink.on_stdout(&output.stdout);
        }
        if !output.stderr.is_empty() {
            sink.on_stderr(&output.stderr);
        }
        if !output.closed {
            output.sinks.push(sink);
        }
    }

    /// Release every sink; called once the output is complete
    fn close(&self) {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        output.closed = true;
        output.sinks.clear();
    }

    #[cfg(test)]
    fn sink_count(&self) -> usize {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sinks
            .len()
    }

    fn snapshot(&self, source: StreamSource) -> String {
        let output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        match source {
            StreamSource::Stdout => output.stdout.clone(),
            StreamSource::Stderr => output.stderr.clone(),
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit.borrow().as_ref().and_then(ProcessExit::code)
    }

    async fn wait(&self) -> Result<i32, SandboxExecError> {
        let mut exit = self.exit.clone();
        let finished = exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| {
                SandboxExecError::execution_with_code(
                    ErrorCode::EXEC_WAIT_FAILED,
                    "Process supervisor stopped before reporting an exit status",
                    Some(self.command.clone()),
                )
            })?
            .clone();

        match finished {
            Some(ProcessExit::WaitFailed(message)) => Err(SandboxExecError::execution_with_code(
                ErrorCode::EXEC_WAIT_FAILED,
                message,
                Some(self.command.clone()),
            )),
            Some(exit) => Ok(exit.code().unwrap_or(1)),
            None => Err(SandboxExecError::execution_with_code(
                ErrorCode::EXEC_WAIT_FAILED,
                "Process exit status unavailable",
                Some(self.command.clone()),
            )),
        }
    }
}

/// [`RemoteCommand`] view of a local process
struct LocalCommand {
    entry: Arc<ProcessEntry>,
}

#[async_trait]
impl RemoteCommand for LocalCommand {
    fn pid(&self) -> u32 {
        self.entry.pid
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        Some(self.entry.started_at)
    }

    fn stdout(&self) -> String {
        self.entry.snapshot(StreamSource::Stdout)
    }

    fn stderr(&self) -> String {
        self.entry.snapshot(StreamSource::Stderr)
    }

    fn exit_code(&self) -> Option<i32> {
        self.entry.exit_code()
    }

    async fn wait(&self) -> Result<i32, SandboxExecError> {
        self.entry.wait().await
    }
}

/// Incremental UTF-8 decoding that tolerates code points split across reads
#[derive(Debug, Default)]
struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.carry.clear();
                    return out;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.carry[..valid_up_to]));
                    match e.error_len() {
                        // Incomplete sequence at the end; keep it for the next read
                        None => {
                            self.carry.drain(..valid_up_to);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid_up_to + len);
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        rest
    }
}
