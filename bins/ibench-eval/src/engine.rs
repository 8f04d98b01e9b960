/// Execution Engine - Sandboxed Program + Harness Runs
///
/// **Core Responsibility:**
/// Run a program concatenated with a test harness in a fresh child process
/// and report pass/fail plus trailing diagnostics.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (interpreter, scratch dir, timeout)
/// - Engine does NOT know which harness is legitimate or impossible
/// - Engine never returns an error: every anomaly becomes a failed outcome
///
/// **Isolation:**
/// Every call gets its own process, its own scratch directory and a cleared
/// environment. Nothing survives between calls.

use async_trait::async_trait;
use ibench_common::types::{ExecutionOutcome, MAX_ERROR_CHARS};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

pub const NO_HARNESS_ERROR: &str = "No test harness provided";
pub const TIMEOUT_ERROR: &str = "TimeoutExpired";

const PROGRAM_FILE: &str = "program.py";
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);
/// Bytes kept per pipe; enough for `MAX_ERROR_CHARS` of any UTF-8 text
const CAPTURE_LIMIT: usize = MAX_ERROR_CHARS * 4;

/// Execution engine trait
///
/// Any implementation must guarantee:
/// 1. Empty or whitespace-only harness → immediate failure, nothing spawned
/// 2. Zero exit status is the only success
/// 3. The timeout is a hard wall-clock limit
/// 4. Failures are reported in the outcome, never raised
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn run(&self, code: &str, harness: &str, timeout: Duration) -> ExecutionOutcome;
}

/// Runs programs with a local Python interpreter in isolated mode
#[derive(Debug, Clone)]
pub struct PythonEngine {
    interpreter: String,
}

impl PythonEngine {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Check if the interpreter can be launched at all
    pub async fn is_available(&self) -> bool {
        Command::new(&self.interpreter)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn run_in_scratch(&self, source: &str, timeout: Duration) -> ExecutionOutcome {
        let scratch = match tempfile::Builder::new().prefix("ibench-sandbox-").tempdir() {
            Ok(dir) => dir,
            Err(e) => return ExecutionOutcome::fail(format!("failed to create scratch dir: {e}"), 0),
        };
        let program = scratch.path().join(PROGRAM_FILE);
        if let Err(e) = tokio::fs::write(&program, source).await {
            return ExecutionOutcome::fail(format!("failed to write program: {e}"), 0);
        }

        let outcome = self.spawn_and_wait(program, scratch.path().to_path_buf(), timeout).await;

        if let Err(e) = scratch.close() {
            tracing::debug!(error = %e, "Failed to remove sandbox scratch dir");
        }
        outcome
    }

    async fn spawn_and_wait(
        &self,
        program: PathBuf,
        workdir: PathBuf,
        timeout: Duration,
    ) -> ExecutionOutcome {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-I")
            .arg(&program)
            .current_dir(&workdir)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so the whole tree can be killed at once
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd.env("HOME", &workdir);

        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                return ExecutionOutcome::fail(
                    format!("failed to spawn {}: {e}", self.interpreter),
                    elapsed_ms,
                );
            }
        };

        let pid = child.id();
        let stdout = child.stdout.take().map(capture);
        let stderr = child.stderr.take().map(capture);

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                kill_process_group(pid);
                let _ = child.kill().await;
                abort_all(stdout, stderr);
                let elapsed_ms = start.elapsed().as_millis() as u64;
                return ExecutionOutcome::fail(format!("failed to wait for child: {e}"), elapsed_ms);
            }
            Err(_) => {
                kill_process_group(pid);
                // kill() also reaps the interpreter itself
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill timed out sandbox process");
                }
                abort_all(stdout, stderr);
                let elapsed_ms = start.elapsed().as_millis() as u64;
                tracing::debug!(elapsed_ms, "Sandbox process timed out");
                return ExecutionOutcome::fail(TIMEOUT_ERROR, elapsed_ms);
            }
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;
        // Background processes must not outlive the run
        kill_process_group(pid);

        if status.success() {
            abort_all(stdout, stderr);
            return ExecutionOutcome::pass(elapsed_ms);
        }

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;
        ExecutionOutcome::fail(failure_diagnostic(&stderr, &stdout, status), elapsed_ms)
    }
}

impl Default for PythonEngine {
    fn default() -> Self {
        Self::new("python3")
    }
}

#[async_trait]
impl ExecutionEngine for PythonEngine {
    async fn run(&self, code: &str, harness: &str, timeout: Duration) -> ExecutionOutcome {
        if harness.trim().is_empty() {
            return ExecutionOutcome::fail(NO_HARNESS_ERROR, 0);
        }
        let source = format!("{code}\n\n{harness}\n");
        self.run_in_scratch(&source, timeout).await
    }
}

/// Drain a pipe to EOF, keeping only the last `CAPTURE_LIMIT` bytes
fn capture<R>(mut reader: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut tail: VecDeque<u8> = VecDeque::with_capacity(CAPTURE_LIMIT);
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.extend(&chunk[..n]);
                    let excess = tail.len().saturating_sub(CAPTURE_LIMIT);
                    tail.drain(..excess);
                }
            }
        }
        Vec::from(tail)
    })
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "Failed to kill sandbox process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

async fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    // A grandchild holding the pipe open must not stall the run
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}

fn abort_all(stdout: Option<JoinHandle<Vec<u8>>>, stderr: Option<JoinHandle<Vec<u8>>>) {
    for handle in [stdout, stderr].into_iter().flatten() {
        handle.abort();
    }
}

/// Trailing diagnostic for a non-zero exit: stderr, else stdout, else the status
fn failure_diagnostic(stderr: &str, stdout: &str, status: ExitStatus) -> String {
    let text = [stderr.trim(), stdout.trim()]
        .into_iter()
        .find(|s| !s.is_empty());
    match text {
        Some(text) => tail_chars(text, MAX_ERROR_CHARS).to_string(),
        None => format!("process exited with {status}"),
    }
}

/// Last `max` characters of `s`, on a char boundary
pub fn tail_chars(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    let skip = count - max;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}
