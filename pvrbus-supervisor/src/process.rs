//! One supervised child process

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use pvrbus_core::daemon::PROCESS_NAME_ENV;
use pvrbus_core::retry::{Backoff, RetryConfig};

use crate::config::ProcessSpec;
use crate::error::{Result, SupervisorError};

/// A declared process and the handle of its current incarnation
#[derive(Debug)]
pub struct ManagedProcess {
    spec: ProcessSpec,
    program: PathBuf,
    child: Option<Child>,
    started_at: Option<Instant>,
    last_heartbeat: Option<Instant>,
    backoff: Backoff,
    not_before: Option<Instant>,
    desired_alive: bool,
    spawns: u64,
}

impl ManagedProcess {
    /// Wrap a table entry; nothing is started yet
    pub fn new(spec: ProcessSpec, restart: RetryConfig) -> Self {
        let program = spec.program.clone().unwrap_or_default();
        Self {
            spec,
            program,
            child: None,
            started_at: None,
            last_heartbeat: None,
            backoff: Backoff::new(restart),
            not_before: None,
            desired_alive: true,
            spawns: 0,
        }
    }

    /// Name from the process table
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Table entry
    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// OS process id of the current incarnation
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Whether a child handle is held
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Number of times the process was spawned
    pub fn spawns(&self) -> u64 {
        self.spawns
    }

    /// Whether the supervisor should keep this process alive
    pub fn desired_alive(&self) -> bool {
        self.desired_alive
    }

    /// Set whether the supervisor should keep this process alive
    pub fn set_desired_alive(&mut self, alive: bool) {
        self.desired_alive = alive;
    }

    /// Resolve the executable before the first start
    ///
    /// A program given as a path must exist; bare names are looked up on
    /// `PATH` at spawn time.
    pub fn prepare(&mut self, current_exe: &Path) -> Result<()> {
        self.program = match &self.spec.program {
            Some(program) => program.clone(),
            None => current_exe.to_path_buf(),
        };
        let is_path = self.program.components().count() > 1;
        if is_path && !self.program.exists() {
            return Err(SupervisorError::Spawn {
                name: self.spec.name.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist", self.program.display()),
                ),
            });
        }
        debug!(name = %self.spec.name, program = %self.program.display(), "prepared");
        Ok(())
    }

    /// Start a new incarnation
    pub fn spawn(&mut self, now: Instant) -> Result<()> {
        let child = Command::new(&self.program)
            .args(&self.spec.args)
            .env(PROCESS_NAME_ENV, &self.spec.name)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                name: self.spec.name.clone(),
                source,
            })?;

        info!(name = %self.spec.name, pid = ?child.id(), "started");
        self.child = Some(child);
        self.started_at = Some(now);
        self.last_heartbeat = None;
        self.not_before = None;
        self.spawns += 1;
        Ok(())
    }

    /// Notice an exited child and schedule its restart
    ///
    /// Returns whether the child is still running.
    pub fn reap(&mut self, now: Instant, min_uptime: Duration) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        let status = match child.try_wait() {
            Ok(None) => return true,
            Ok(Some(status)) => status.to_string(),
            Err(e) => e.to_string(),
        };
        self.child = None;

        let uptime = self
            .started_at
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();
        if uptime < min_uptime {
            let delay = self.backoff.fail();
            warn!(
                name = %self.spec.name,
                %status,
                ?uptime,
                ?delay,
                failures = self.backoff.failures(),
                "exited early, delaying restart"
            );
            self.not_before = Some(now + delay);
        } else {
            warn!(name = %self.spec.name, %status, ?uptime, "exited");
            self.backoff.reset();
            self.not_before = None;
        }
        false
    }

    /// Whether the process missed its heartbeat deadline
    pub fn watchdog_expired(&self, now: Instant) -> bool {
        let (Some(timeout), true) = (self.spec.watchdog(), self.child.is_some()) else {
            return false;
        };
        match self.last_heartbeat.or(self.started_at) {
            Some(last) => now.saturating_duration_since(last) > timeout,
            None => false,
        }
    }

    /// Whether a restart is allowed at `now`
    pub fn restart_due(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|at| now >= at)
    }

    /// Note a failed spawn attempt and back off
    pub fn spawn_failed(&mut self, now: Instant, err: &SupervisorError) {
        let delay = self.backoff.fail();
        error!(name = %self.spec.name, error = %err, ?delay, "spawn failed");
        self.not_before = Some(now + delay);
    }

    /// Record a liveness heartbeat
    pub fn record_heartbeat(&mut self, at: Instant) {
        self.last_heartbeat = Some(at);
    }

    /// Kill the current incarnation without waiting
    pub fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                warn!(name = %self.spec.name, error = %e, "kill failed");
            }
        }
    }

    /// Ask the current incarnation to exit
    pub fn terminate(&mut self) {
        let Some(pid) = self.pid() else {
            return;
        };
        debug!(name = %self.spec.name, pid, "sending SIGTERM");
        #[cfg(unix)]
        {
            // SAFETY: plain syscall on a pid we own; no memory is shared.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                warn!(
                    name = %self.spec.name,
                    error = %std::io::Error::last_os_error(),
                    "SIGTERM failed"
                );
            }
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
            if let Some(child) = self.child.as_mut() {
                let _ = child.start_kill();
            }
        }
    }

    /// Wait up to `grace` for the current incarnation to exit, then kill it
    pub async fn wait_exit(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => info!(name = %self.spec.name, %status, "stopped"),
            Ok(Err(e)) => warn!(name = %self.spec.name, error = %e, "wait failed"),
            Err(_) => {
                warn!(name = %self.spec.name, ?grace, "did not stop in time, killing");
                if let Err(e) = child.kill().await {
                    warn!(name = %self.spec.name, error = %e, "kill failed");
                }
            }
        }
    }
}
