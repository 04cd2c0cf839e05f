// src/runtime/process_supervisor.rs
//! Supervisor for externally launched processes
//!
//! Owns every child it launches until `terminate_all` reaps it:
//! - Executable lookup on `PATH`
//! - stdout/stderr capture into a bounded line buffer
//! - SIGTERM, grace period, then SIGKILL

use crate::observability::names;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex as SyncMutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lines of output retained per process
const OUTPUT_TAIL_LINES: usize = 200;

/// Default time between SIGTERM and SIGKILL
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Command line to launch
#[derive(Debug, Clone)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env_vars: Vec<(String, String)>,
    pub work_dir: Option<PathBuf>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_vars: Vec::new(),
            work_dir: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Copy with `{port}` replaced in every argument
    pub fn with_port(&self, port: u16) -> Self {
        let mut command = self.clone();
        command.args = self
            .args
            .iter()
            .map(|arg| arg.replace("{port}", &port.to_string()))
            .collect();
        command
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Public view of a supervised process
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

/// Bounded tail of a process's stdout/stderr
#[derive(Clone, Default)]
struct OutputLog {
    lines: Arc<SyncMutex<VecDeque<String>>>,
}

impl OutputLog {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == OUTPUT_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }
}

/// A child process owned by the supervisor
struct ManagedProcess {
    info: ProcessInfo,
    child: Child,
    output: OutputLog,
}

impl ManagedProcess {
    /// Liveness from the OS, never cached
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// How a process left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Had exited before cleanup
    AlreadyExited,
    /// Exited within the grace period after SIGTERM
    Terminated,
    /// Needed SIGKILL
    Killed,
}

/// Result of a `terminate_all` pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationSummary {
    pub already_exited: usize,
    pub terminated: usize,
    pub killed: usize,
}

impl TerminationSummary {
    pub fn total(&self) -> usize {
        self.already_exited + self.terminated + self.killed
    }

    fn record(&mut self, termination: Termination) {
        match termination {
            Termination::AlreadyExited => self.already_exited += 1,
            Termination::Terminated => self.terminated += 1,
            Termination::Killed => self.killed += 1,
        }
    }
}

/// Launches, tracks and terminates child processes
pub struct ProcessSupervisor {
    /// Registry of live children; the single point of access to them
    processes: Mutex<Vec<ManagedProcess>>,

    /// Time between SIGTERM and SIGKILL
    grace_period: Duration,
}

impl ProcessSupervisor {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            processes: Mutex::new(Vec::new()),
            grace_period,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    fn find_executable(program: &str) -> Result<PathBuf> {
        match which::which(program) {
            Ok(path) => {
                debug!("Found {} at {:?}", program, path);
                Ok(path)
            }
            Err(e) => Err(EngineError::LaunchError(format!(
                "executable '{}' not found: {}",
                program, e
            ))),
        }
    }

    /// Start a process and register it for cleanup
    pub async fn launch(&self, launch: &LaunchCommand) -> Result<ProcessInfo> {
        let executable = Self::find_executable(&launch.program)?;

        let mut command = Command::new(&executable);
        command.args(&launch.args);

        if let Some(work_dir) = &launch.work_dir {
            command.current_dir(work_dir);
        }

        for (key, value) in &launch.env_vars {
            command.env(key, value);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            EngineError::LaunchError(format!("failed to spawn '{}': {}", launch.display(), e))
        })?;

        let pid = child.id().ok_or_else(|| {
            EngineError::LaunchError(format!("'{}' exited before reporting a pid", launch.display()))
        })?;

        let output = OutputLog::default();
        if let Some(stdout) = child.stdout.take() {
            capture_output(stdout, pid, "stdout", output.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            capture_output(stderr, pid, "stderr", output.clone());
        }

        let info = ProcessInfo {
            pid,
            command: launch.display(),
            started_at: Utc::now(),
        };

        info!(pid, command = %info.command, "process launched");
        metrics::counter!(names::PROCESSES_LAUNCHED).increment(1);

        self.processes.lock().await.push(ManagedProcess {
            info: info.clone(),
            child,
            output,
        });

        Ok(info)
    }

    /// Whether a supervised process is still running
    pub async fn is_alive(&self, pid: u32) -> bool {
        let mut processes = self.processes.lock().await;
        processes
            .iter_mut()
            .find(|p| p.info.pid == pid)
            .map(|p| p.is_alive())
            .unwrap_or(false)
    }

    /// Exit status of a supervised process that has already exited
    pub async fn exit_status(&self, pid: u32) -> Option<ExitStatus> {
        let mut processes = self.processes.lock().await;
        processes
            .iter_mut()
            .find(|p| p.info.pid == pid)
            .and_then(|p| p.child.try_wait().ok().flatten())
    }

    /// Captured output tail of a supervised process
    pub async fn diagnostics(&self, pid: u32) -> Vec<String> {
        let processes = self.processes.lock().await;
        processes
            .iter()
            .find(|p| p.info.pid == pid)
            .map(|p| p.output.snapshot())
            .unwrap_or_default()
    }

    /// Number of registered processes still running
    pub async fn live_count(&self) -> usize {
        let mut processes = self.processes.lock().await;
        processes.iter_mut().map(|p| p.is_alive()).filter(|alive| *alive).count()
    }

    /// Terminate every registered process and empty the registry.
    ///
    /// Safe to call any number of times; failures are logged, never returned.
    pub async fn terminate_all(&self) -> TerminationSummary {
        let drained: Vec<ManagedProcess> = std::mem::take(&mut *self.processes.lock().await);
        let mut summary = TerminationSummary::default();

        if drained.is_empty() {
            debug!("No supervised processes to terminate");
            return summary;
        }

        info!(count = drained.len(), "terminating supervised processes");

        for mut process in drained {
            let termination = terminate(&mut process, self.grace_period).await;
            summary.record(termination);
        }

        summary
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

fn capture_output<R>(stream: R, pid: u32, name: &'static str, output: OutputLog)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(pid, stream = name, "{}", line);
            output.push(line);
        }
    });
}

/// SIGTERM, wait up to `grace`, then SIGKILL and wait
async fn terminate(process: &mut ManagedProcess, grace: Duration) -> Termination {
    let pid = process.info.pid;

    if !process.is_alive() {
        debug!(pid, "process already exited");
        return Termination::AlreadyExited;
    }

    debug!(pid, "Sending SIGTERM");
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        // ESRCH: exited between the liveness check and the signal
        debug!(pid, error = %e, "SIGTERM not delivered");
    }

    match tokio::time::timeout(grace, process.child.wait()).await {
        Ok(Ok(status)) => {
            info!(pid, %status, "process terminated");
            return Termination::Terminated;
        }
        Ok(Err(e)) => warn!(pid, error = %e, "error waiting for process"),
        Err(_) => warn!(pid, grace_secs = grace.as_secs_f64(), "process ignored SIGTERM, sending SIGKILL"),
    }

    if let Err(e) = process.child.kill().await {
        warn!(pid, error = %e, "failed to kill process");
    }
    metrics::counter!(names::PROCESSES_KILLED).increment(1);
    info!(pid, "process killed");
    Termination::Killed
}

/// Whether any process with this pid exists (signal 0 probe)
pub fn pid_exists(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleeper() -> LaunchCommand {
        LaunchCommand::new("sleep").args(["30"])
    }

    #[test]
    fn test_with_port_substitution() {
        let command = LaunchCommand::new("server").args(["--port", "{port}", "run"]);
        let resolved = command.with_port(5223);
        assert_eq!(resolved.args, vec!["--port", "5223", "run"]);
        assert_eq!(resolved.display(), "server --port 5223 run");
    }

    #[tokio::test]
    async fn test_launch_missing_executable() {
        let supervisor = ProcessSupervisor::default();
        let result = supervisor
            .launch(&LaunchCommand::new("definitely-not-a-real-binary-7f3a"))
            .await;

        assert!(matches!(result, Err(EngineError::LaunchError(_))));
        assert_eq!(supervisor.live_count().await, 0);
    }

    #[tokio::test]
    async fn test_launch_and_terminate() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(2));
        let info = supervisor.launch(&sleeper()).await.unwrap();

        assert!(supervisor.is_alive(info.pid).await);
        assert_eq!(supervisor.live_count().await, 1);

        let summary = supervisor.terminate_all().await;
        assert_eq!(summary.terminated, 1);
        assert_eq!(supervisor.live_count().await, 0);
        assert!(!supervisor.is_alive(info.pid).await);
    }

    #[tokio::test]
    async fn test_terminate_all_is_idempotent() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(2));
        supervisor.launch(&sleeper()).await.unwrap();

        let first = supervisor.terminate_all().await;
        let second = supervisor.terminate_all().await;

        assert_eq!(first.total(), 1);
        assert_eq!(second, TerminationSummary::default());
        assert_eq!(supervisor.live_count().await, 0);
    }

    #[tokio::test]
    async fn test_terminate_all_with_nothing_registered() {
        let supervisor = ProcessSupervisor::default();
        assert_eq!(supervisor.terminate_all().await.total(), 0);
    }

    #[tokio::test]
    async fn test_kill_after_grace_period() {
        let supervisor = ProcessSupervisor::new(Duration::from_millis(300));
        let command = LaunchCommand::new("sh").args(["-c", "trap '' TERM; exec sleep 30"]);
        let info = supervisor.launch(&command).await.unwrap();

        // let the shell install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let summary = supervisor.terminate_all().await;

        assert_eq!(summary.killed, 1);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!pid_exists(info.pid));
    }

    #[tokio::test]
    async fn test_already_exited_process() {
        let supervisor = ProcessSupervisor::default();
        let info = supervisor.launch(&LaunchCommand::new("true")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!supervisor.is_alive(info.pid).await);
        assert!(supervisor.exit_status(info.pid).await.is_some());

        let summary = supervisor.terminate_all().await;
        assert_eq!(summary.already_exited, 1);
    }

    #[tokio::test]
    async fn test_live_count_ignores_exited_processes() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(2));
        supervisor.launch(&sleeper()).await.unwrap();
        supervisor.launch(&LaunchCommand::new("true")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(supervisor.live_count().await, 1);

        let summary = supervisor.terminate_all().await;
        assert_eq!(summary.terminated, 1);
        assert_eq!(summary.already_exited, 1);
        assert_eq!(supervisor.live_count().await, 0);
    }

    #[tokio::test]
    async fn test_output_is_captured() {
        let supervisor = ProcessSupervisor::default();
        let command = LaunchCommand::new("sh").args(["-c", "echo ready; echo oops >&2"]);
        let info = supervisor.launch(&command).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let lines = supervisor.diagnostics(info.pid).await;

        assert!(lines.contains(&"ready".to_string()));
        assert!(lines.contains(&"oops".to_string()));
        supervisor.terminate_all().await;
    }
}
