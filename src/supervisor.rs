//! Lifecycle management for the cooperating child processes.
//!
//! Every managed process moves through `Starting -> Running -> Exited` and is
//! never restarted. A dedicated monitor task owns each child and waits for
//! it to exit. A failed exit (nonzero status, signal, or a failed wait) that
//! happens outside of [`Supervisor::stop_all`] is fatal: the monitor records
//! it and cancels the supervisor, which makes [`Supervisor::run_until_signal`]
//! run the shutdown sequence and report the failure. A clean exit is only
//! marked `Exited` and logged.
//!
//! Shutdown is two-phase: `SIGTERM` to everything still running, poll until
//! all have exited or the grace deadline passes, then `SIGKILL` the rest.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ShutdownPolicy;
use crate::error::DnsError;
use crate::metrics;

/// Lifecycle state of a managed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Being launched.
    Starting,
    /// Launched; carries the OS pid when known.
    Running(Option<u32>),
    /// Gone, with a description of how it ended.
    Exited(String),
}

#[derive(Debug)]
struct ManagedProcess {
    name: String,
    state: Mutex<ProcessState>,
}

impl ManagedProcess {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(ProcessState::Starting),
        }
    }

    fn is_running(&self) -> bool {
        matches!(*self.state.lock(), ProcessState::Running(_))
    }

    fn pid(&self) -> Option<Pid> {
        match *self.state.lock() {
            ProcessState::Running(Some(pid)) => i32::try_from(pid).ok().map(Pid::from_raw),
            _ => None,
        }
    }

    fn set_running(&self, pid: Option<u32>) {
        *self.state.lock() = ProcessState::Running(pid);
    }

    fn set_exited(&self, how: String) {
        *self.state.lock() = ProcessState::Exited(how);
    }
}

#[derive(Debug)]
struct SupervisorInner {
    processes: Mutex<Vec<Arc<ManagedProcess>>>,
    cancel: CancellationToken,
    policy: ShutdownPolicy,
    stopping: AtomicBool,
    failure: Mutex<Option<(String, String)>>,
}

impl SupervisorInner {
    fn record_failure(&self, name: &str, status: &str) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some((name.to_string(), status.to_string()));
        }
    }

    fn failure(&self) -> Option<DnsError> {
        self.failure
            .lock()
            .clone()
            .map(|(name, status)| DnsError::UnexpectedExit { name, status })
    }

    /// Error to report when work is interrupted by cancellation.
    fn interrupted(&self) -> DnsError {
        self.failure().unwrap_or(DnsError::ShuttingDown)
    }
}

/// What a launch step does with its process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Run to completion; a non-zero exit is a failure.
    Oneshot,
    /// Start as a managed process that must stay up for `settle` before the
    /// next step runs.
    Managed {
        /// Minimum uptime before continuing.
        settle: Duration,
    },
}

/// One entry of the ordered startup sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchStep {
    /// Logical name used in logs and errors.
    pub name: String,
    /// Executable.
    pub program: OsString,
    /// Arguments.
    pub args: Vec<String>,
    /// Oneshot or managed.
    pub kind: StepKind,
    /// Whether a failure aborts startup.
    pub required: bool,
}

/// Process supervisor. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Create a supervisor with its own cancellation token.
    pub fn new(policy: ShutdownPolicy) -> Self {
        Self::with_token(policy, CancellationToken::new())
    }

    /// Create a supervisor driven by an existing cancellation token.
    pub fn with_token(policy: ShutdownPolicy, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                processes: Mutex::new(Vec::new()),
                cancel,
                policy,
                stopping: AtomicBool::new(false),
                failure: Mutex::new(None),
            }),
        }
    }

    /// Token cancelled when the supervisor starts shutting down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Names of processes currently running.
    pub fn running_names(&self) -> BTreeSet<String> {
        self.inner
            .processes
            .lock()
            .iter()
            .filter(|p| p.is_running())
            .map(|p| p.name.clone())
            .collect()
    }

    /// Whether a process named `name` is running.
    pub fn is_running(&self, name: &str) -> bool {
        self.inner
            .processes
            .lock()
            .iter()
            .any(|p| p.name == name && p.is_running())
    }

    /// Launch `program` as a managed process and start its monitor.
    ///
    /// Refused with [`DnsError::ShuttingDown`] once the supervisor is
    /// cancelled.
    pub fn start_managed<S>(&self, name: &str, program: S, args: &[String]) -> Result<(), DnsError>
    where
        S: AsRef<std::ffi::OsStr>,
    {
        let mut processes = self.inner.processes.lock();
        if self.inner.cancel.is_cancelled() {
            return Err(DnsError::ShuttingDown);
        }

        let process = Arc::new(ManagedProcess::new(name));
        let child = Command::new(program.as_ref())
            .args(args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DnsError::ProcessStart {
                name: name.to_string(),
                source,
            })?;

        let pid = child.id();
        process.set_running(pid);
        processes.push(process.clone());
        drop(processes);

        info!(name, pid, "started managed process");
        tokio::spawn(monitor(self.inner.clone(), process, child));
        Ok(())
    }

    /// Stop every managed process.
    ///
    /// Cancels the supervisor, sends `SIGTERM`, waits up to the grace period
    /// and then sends `SIGKILL` to whatever is left. Signal failures are
    /// logged per process and never abort the sequence.
    pub async fn stop_all(&self) -> Result<(), DnsError> {
        let inner = &self.inner;
        inner.stopping.store(true, Ordering::SeqCst);
        inner.cancel.cancel();

        let processes: Vec<_> = inner.processes.lock().clone();

        for process in processes.iter().filter(|p| p.is_running()) {
            let Some(pid) = process.pid() else {
                continue;
            };
            info!(name = %process.name, %pid, "sending SIGTERM");
            if let Err(errno) = kill(pid, Signal::SIGTERM) {
                warn!(name = %process.name, %pid, error = %errno, "failed to send SIGTERM");
            }
        }

        let deadline = Instant::now() + inner.policy.grace;
        loop {
            if !processes.iter().any(|p| p.is_running()) {
                info!("all managed processes stopped");
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(inner.policy.poll_interval.min(deadline - now)).await;
        }

        warn!(
            grace = ?inner.policy.grace,
            remaining = processes.iter().filter(|p| p.is_running()).count(),
            "graceful shutdown deadline exceeded, killing remaining processes"
        );
        metrics::record_shutdown_timeout();

        for process in processes.iter().filter(|p| p.is_running()) {
            let Some(pid) = process.pid() else {
                continue;
            };
            match kill(pid, Signal::SIGKILL) {
                Ok(()) => {
                    warn!(name = %process.name, %pid, "killed managed process");
                    metrics::record_forced_kill(&process.name);
                    process.set_exited("killed".to_string());
                }
                Err(errno) => {
                    error!(name = %process.name, %pid, error = %errno, "failed to kill managed process");
                }
            }
        }

        Ok(())
    }

    /// Wait for `SIGTERM`/`SIGINT` or cancellation, then stop everything.
    ///
    /// Returns the first unexpected exit, if one caused the shutdown.
    pub async fn run_until_signal(&self) -> Result<(), DnsError> {
        let mut signals = match ShutdownSignals::new() {
            Ok(signals) => Some(signals),
            Err(e) => {
                error!(error = %e, "failed to install signal handlers");
                None
            }
        };

        tokio::select! {
            name = async {
                match signals.as_mut() {
                    Some(signals) => signals.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                info!(signal = name, "received shutdown signal");
            }
            _ = self.inner.cancel.cancelled() => {
                info!("supervisor cancelled");
            }
        }

        self.stop_all().await?;

        match self.inner.failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run `steps` in order.
    ///
    /// Failures of optional steps are logged and skipped. A required step
    /// failure, or cancellation, ends the sequence with an error; the caller
    /// is expected to run [`Supervisor::stop_all`].
    pub async fn launch(&self, steps: &[LaunchStep]) -> Result<(), DnsError> {
        for step in steps {
            debug!(step = %step.name, required = step.required, "launch step");
            let result = match &step.kind {
                StepKind::Oneshot => self.run_oneshot(step).await,
                StepKind::Managed { settle } => self.start_and_settle(step, *settle).await,
            };

            match result {
                Ok(()) => {}
                Err(e) if step.required || self.inner.cancel.is_cancelled() => {
                    error!(step = %step.name, error = %e, "launch step failed");
                    return Err(e);
                }
                Err(e) => {
                    warn!(step = %step.name, error = %e, "optional launch step failed, continuing");
                }
            }
        }
        Ok(())
    }

    async fn run_oneshot(&self, step: &LaunchStep) -> Result<(), DnsError> {
        if self.inner.cancel.is_cancelled() {
            return Err(DnsError::ShuttingDown);
        }

        let mut command = Command::new(&step.program);
        command.args(&step.args).kill_on_drop(true);

        let status = tokio::select! {
            status = command.status() => status.map_err(|source| DnsError::ProcessStart {
                name: step.name.clone(),
                source,
            })?,
            _ = self.inner.cancel.cancelled() => return Err(self.inner.interrupted()),
        };

        if status.success() {
            info!(step = %step.name, "oneshot step completed");
            Ok(())
        } else {
            Err(DnsError::UnexpectedExit {
                name: step.name.clone(),
                status: status.to_string(),
            })
        }
    }

    async fn start_and_settle(&self, step: &LaunchStep, settle: Duration) -> Result<(), DnsError> {
        self.start_managed(&step.name, &step.program, &step.args)?;
        if settle.is_zero() {
            return Ok(());
        }

        debug!(step = %step.name, ?settle, "waiting for process to settle");
        tokio::select! {
            _ = tokio::time::sleep(settle) => Ok(()),
            _ = self.inner.cancel.cancelled() => Err(self.inner.interrupted()),
        }
    }
}

/// Wait for the child to exit and classify the exit.
async fn monitor(inner: Arc<SupervisorInner>, process: Arc<ManagedProcess>, mut child: Child) {
    let (how, success) = match child.wait().await {
        Ok(status) => (status.to_string(), status.success()),
        Err(e) => (format!("wait failed: {e}"), false),
    };
    process.set_exited(how.clone());

    let requested = inner.stopping.load(Ordering::SeqCst) || inner.cancel.is_cancelled();
    let fatal = !requested && !success;
    metrics::record_process_exit(&process.name, fatal);

    if requested {
        info!(name = %process.name, status = %how, "managed process exited");
    } else if success {
        info!(name = %process.name, status = %how, "managed process finished");
    } else {
        error!(name = %process.name, status = %how, "managed process exited unexpectedly, shutting down");
        inner.record_failure(&process.name, &how);
        inner.cancel.cancel();
    }
}

/// `SIGTERM` and `SIGINT` listeners.
pub struct ShutdownSignals {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    /// Install the handlers.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next signal and return its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ShutdownPolicy {
        ShutdownPolicy {
            grace: Duration::from_millis(300),
            poll_interval: Duration::from_millis(100),
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    fn step(name: &str, script: &str, kind: StepKind, required: bool) -> LaunchStep {
        LaunchStep {
            name: name.to_string(),
            program: "sh".into(),
            args: sh(script),
            kind,
            required,
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let supervisor = Supervisor::new(policy());
        supervisor
            .start_managed("sleeper", "sh", &sh("exec sleep 30"))
            .unwrap();

        assert!(supervisor.is_running("sleeper"));
        assert_eq!(
            supervisor.running_names(),
            BTreeSet::from(["sleeper".to_string()])
        );

        let started = std::time::Instant::now();
        supervisor.stop_all().await.unwrap();
        assert!(started.elapsed() < policy().grace);
        assert!(supervisor.running_names().is_empty());
    }

    #[tokio::test]
    async fn test_stop_all_kills_process_ignoring_term() {
        let supervisor = Supervisor::new(policy());
        supervisor
            .start_managed("stubborn", "sh", &sh("trap '' TERM; exec sleep 30"))
            .unwrap();
        // Let the shell install its trap before signalling.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        supervisor.stop_all().await.unwrap();
        let elapsed = started.elapsed();

        let policy = policy();
        assert!(elapsed >= policy.grace);
        assert!(elapsed < policy.grace + policy.poll_interval + Duration::from_millis(200));
        assert!(supervisor.running_names().is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_exit_fails_fast() {
        let supervisor = Supervisor::new(policy());
        supervisor
            .start_managed("steady", "sh", &sh("exec sleep 30"))
            .unwrap();
        supervisor
            .start_managed("crasher", "sh", &sh("sleep 0.2; exit 3"))
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), supervisor.run_until_signal())
            .await
            .expect("run_until_signal did not return");

        match result {
            Err(DnsError::UnexpectedExit { name, .. }) => assert_eq!(name, "crasher"),
            other => panic!("expected unexpected exit, got {other:?}"),
        }
        assert!(supervisor.running_names().is_empty());
    }

    #[tokio::test]
    async fn test_clean_exit_does_not_cancel() {
        let supervisor = Supervisor::new(policy());
        supervisor
            .start_managed("steady", "sh", &sh("exec sleep 30"))
            .unwrap();
        supervisor
            .start_managed("oneoff", "sh", &sh("exit 0"))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!supervisor.cancellation_token().is_cancelled());
        assert!(supervisor.is_running("steady"));
        assert!(!supervisor.is_running("oneoff"));

        supervisor.cancellation_token().cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), supervisor.run_until_signal())
            .await
            .expect("run_until_signal did not return");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_external_cancel_is_clean_shutdown() {
        let supervisor = Supervisor::new(policy());
        supervisor
            .start_managed("sleeper", "sh", &sh("exec sleep 30"))
            .unwrap();

        supervisor.cancellation_token().cancel();
        supervisor.cancellation_token().cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), supervisor.run_until_signal())
            .await
            .expect("run_until_signal did not return");
        assert!(result.is_ok());
        assert!(supervisor.running_names().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_supervisor_refuses_launch() {
        let supervisor = Supervisor::new(policy());
        supervisor.stop_all().await.unwrap();
        supervisor.stop_all().await.unwrap();

        let err = supervisor
            .start_managed("late", "sh", &sh("exec sleep 30"))
            .unwrap_err();
        assert!(matches!(err, DnsError::ShuttingDown));
        assert!(supervisor.running_names().is_empty());
    }

    #[tokio::test]
    async fn test_missing_program_is_start_failure() {
        let supervisor = Supervisor::new(policy());
        let err = supervisor
            .start_managed("ghost", "/nonexistent/nb-dns-test-binary", &[])
            .unwrap_err();
        assert!(matches!(err, DnsError::ProcessStart { .. }));
    }

    #[tokio::test]
    async fn test_launch_skips_failed_optional_step() {
        let supervisor = Supervisor::new(policy());
        let steps = vec![
            step("install", "exit 1", StepKind::Oneshot, false),
            step("prepare", "exit 0", StepKind::Oneshot, true),
            step(
                "daemon",
                "exec sleep 30",
                StepKind::Managed {
                    settle: Duration::from_millis(50),
                },
                true,
            ),
        ];

        supervisor.launch(&steps).await.unwrap();
        assert_eq!(
            supervisor.running_names(),
            BTreeSet::from(["daemon".to_string()])
        );

        supervisor.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_launch_stops_at_required_failure() {
        let supervisor = Supervisor::new(policy());
        let steps = vec![
            step("prepare", "exit 2", StepKind::Oneshot, true),
            step("daemon", "exec sleep 30", StepKind::Managed { settle: Duration::ZERO }, true),
        ];

        let err = supervisor.launch(&steps).await.unwrap_err();
        assert!(matches!(err, DnsError::UnexpectedExit { ref name, .. } if name == "prepare"));
        assert!(supervisor.running_names().is_empty());
    }

    #[tokio::test]
    async fn test_launch_reports_exit_during_settle() {
        let supervisor = Supervisor::new(policy());
        let steps = vec![
            step(
                "mesh",
                "sleep 0.1; exit 1",
                StepKind::Managed {
                    settle: Duration::from_secs(5),
                },
                true,
            ),
            step("dns", "exec sleep 30", StepKind::Managed { settle: Duration::ZERO }, true),
        ];

        let err = tokio::time::timeout(Duration::from_secs(3), supervisor.launch(&steps))
            .await
            .expect("launch did not return")
            .unwrap_err();
        assert!(matches!(err, DnsError::UnexpectedExit { ref name, .. } if name == "mesh"));
        assert!(!supervisor.is_running("dns"));

        supervisor.stop_all().await.unwrap();
    }
}
