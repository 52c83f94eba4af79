//! Supervision loop over the process table

use futures::FutureExt;
use futures::future::join_all;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::process::ManagedProcess;

/// Keeps every process of a static table alive
///
/// The supervisor owns its copy of the table and every child handle; it
/// only exits when the shutdown future resolves.
#[derive(Debug)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    processes: Vec<ManagedProcess>,
}

impl ProcessSupervisor {
    /// Build a supervisor for `config.processes`
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        config.validate()?;
        let processes = config
            .processes
            .iter()
            .cloned()
            .map(|spec| ManagedProcess::new(spec, config.restart.clone()))
            .collect();
        Ok(Self { config, processes })
    }

    /// Supervisor settings
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Supervised processes in table order
    pub fn processes(&self) -> &[ManagedProcess] {
        &self.processes
    }

    /// Look up a process by name
    pub fn process(&self, name: &str) -> Option<&ManagedProcess> {
        self.processes.iter().find(|p| p.name() == name)
    }

    /// Change whether a process is kept alive
    ///
    /// Returns `false` for an unknown name.
    pub fn set_desired_alive(&mut self, name: &str, alive: bool) -> bool {
        match self.processes.iter_mut().find(|p| p.name() == name) {
            Some(process) => {
                process.set_desired_alive(alive);
                true
            }
            None => false,
        }
    }

    /// Resolve every executable; runs once before the first start
    pub fn prepare_all(&mut self) -> Result<()> {
        let current_exe = std::env::current_exe()?;
        self.prepare_all_with(&current_exe)
    }

    /// Resolve executables, using `current_exe` for daemon subcommands
    pub fn prepare_all_with(&mut self, current_exe: &Path) -> Result<()> {
        for process in &mut self.processes {
            process.prepare(current_exe)?;
        }
        info!(processes = self.processes.len(), "process table prepared");
        Ok(())
    }

    /// One liveness pass
    pub fn ensure_running(&mut self) {
        self.ensure_running_at(Instant::now());
    }

    /// One liveness pass as of `now`
    pub fn ensure_running_at(&mut self, now: Instant) {
        let min_uptime = self.config.min_uptime;
        let mut alive = 0;
        for process in &mut self.processes {
            let running = process.reap(now, min_uptime);
            if running && process.watchdog_expired(now) {
                warn!(name = %process.name(), "watchdog expired, restarting");
                process.kill();
            }

            if !process.desired_alive() {
                if process.is_running() {
                    process.terminate();
                }
                continue;
            }
            if process.is_running() {
                alive += 1;
                continue;
            }
            if !process.restart_due(now) {
                continue;
            }
            match process.spawn(now) {
                Ok(()) => alive += 1,
                Err(e) => process.spawn_failed(now, &e),
            }
        }

        let summary: Vec<String> = self
            .processes
            .iter()
            .map(|p| match p.pid() {
                Some(pid) => format!("{}={}", p.name(), pid),
                None => format!("{}=down", p.name()),
            })
            .collect();
        debug!(alive, total = self.processes.len(), "liveness: {}", summary.join(" "));
    }

    /// Record a heartbeat from the process registered as `name`
    pub fn record_heartbeat(&mut self, name: &str, at: Instant) {
        match self.processes.iter_mut().find(|p| p.name() == name) {
            Some(process) => process.record_heartbeat(at),
            None => debug!(%name, "heartbeat from unknown process"),
        }
    }

    /// Stop every process
    ///
    /// Without `block` each child is only sent SIGTERM. With `block` each
    /// child gets `shutdown_grace` to exit before it is killed.
    pub async fn stop_all(&mut self, block: bool) {
        if !block {
            for process in &mut self.processes {
                process.terminate();
            }
            return;
        }
        let grace = self.config.shutdown_grace;
        join_all(self.processes.iter_mut().map(|p| p.wait_exit(grace))).await;
    }

    /// Supervise until `shutdown` resolves, then stop everything
    ///
    /// Heartbeats arrive on `heartbeats` as process names. A panic inside
    /// the supervision loop still runs both cleanup phases.
    pub async fn run<F>(mut self, shutdown: F, mut heartbeats: mpsc::Receiver<String>) -> Result<()>
    where
        F: Future,
    {
        self.prepare_all()?;
        info!("supervisor started");

        let outcome = AssertUnwindSafe(self.supervise(shutdown, &mut heartbeats))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            error!("supervision loop panicked, cleaning up");
        }

        self.stop_all(false).await;
        self.stop_all(true).await;
        info!("everything is dead");
        Ok(())
    }

    async fn supervise<F>(&mut self, shutdown: F, heartbeats: &mut mpsc::Receiver<String>)
    where
        F: Future,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut heartbeats_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    return;
                }
                _ = ticker.tick() => self.ensure_running(),
                name = heartbeats.recv(), if heartbeats_open => match name {
                    Some(name) => self.record_heartbeat(&name, Instant::now()),
                    None => {
                        debug!("heartbeat feed closed");
                        heartbeats_open = false;
                    }
                },
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ProcessSpec;
    use std::time::Duration;

    fn config(processes: Vec<ProcessSpec>) -> SupervisorConfig {
        SupervisorConfig {
            processes,
            check_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn prepared(processes: Vec<ProcessSpec>) -> ProcessSupervisor {
        let mut supervisor = ProcessSupervisor::new(config(processes)).unwrap();
        supervisor.prepare_all_with(Path::new("/unused")).unwrap();
        supervisor
    }

    #[tokio::test]
    async fn test_watchdog_kills_and_respawns_in_one_cycle() {
        let spec = ProcessSpec::new("silent", "sleep", &["30"]).with_watchdog(Duration::from_secs(2));
        let mut supervisor = prepared(vec![spec]);

        let start = Instant::now();
        supervisor.ensure_running_at(start);
        let first = supervisor.process("silent").unwrap().pid().unwrap();

        supervisor.ensure_running_at(start + Duration::from_secs(1));
        assert_eq!(supervisor.process("silent").unwrap().pid(), Some(first));

        supervisor.ensure_running_at(start + Duration::from_millis(2500));
        let second = supervisor.process("silent").unwrap().pid().unwrap();
        assert_ne!(first, second);
        assert_eq!(supervisor.process("silent").unwrap().spawns(), 2);

        supervisor.stop_all(false).await;
        supervisor.stop_all(true).await;
    }

    #[tokio::test]
    async fn test_heartbeats_keep_watchdog_quiet() {
        let spec = ProcessSpec::new("chatty", "sleep", &["30"]).with_watchdog(Duration::from_secs(2));
        let mut supervisor = prepared(vec![spec]);

        let start = Instant::now();
        supervisor.ensure_running_at(start);
        let pid = supervisor.process("chatty").unwrap().pid();

        supervisor.record_heartbeat("chatty", start + Duration::from_millis(1500));
        supervisor.ensure_running_at(start + Duration::from_millis(2500));
        assert_eq!(supervisor.process("chatty").unwrap().pid(), pid);

        supervisor.stop_all(true).await;
    }

    #[tokio::test]
    async fn test_disabled_watchdog_never_kills() {
        let mut supervisor = prepared(vec![ProcessSpec::new("quiet", "sleep", &["30"])]);

        let start = Instant::now();
        supervisor.ensure_running_at(start);
        let pid = supervisor.process("quiet").unwrap().pid();
        supervisor.ensure_running_at(start + Duration::from_secs(3600));
        assert_eq!(supervisor.process("quiet").unwrap().pid(), pid);

        supervisor.stop_all(false).await;
        supervisor.stop_all(true).await;
        assert!(!supervisor.process("quiet").unwrap().is_running());
    }

    #[tokio::test]
    async fn test_not_desired_is_not_started() {
        let mut supervisor = prepared(vec![ProcessSpec::new("idle", "sleep", &["30"])]);
        assert!(supervisor.set_desired_alive("idle", false));
        assert!(!supervisor.set_desired_alive("ghost", false));

        supervisor.ensure_running();
        assert!(!supervisor.process("idle").unwrap().is_running());
        assert_eq!(supervisor.process("idle").unwrap().spawns(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_retried_with_backoff() {
        let mut supervisor = prepared(vec![ProcessSpec::new(
            "missing",
            "pvrbus-no-such-binary",
            &[],
        )]);

        let start = Instant::now();
        supervisor.ensure_running_at(start);
        assert!(!supervisor.process("missing").unwrap().is_running());
        assert!(!supervisor.process("missing").unwrap().restart_due(start));
        assert!(
            supervisor
                .process("missing")
                .unwrap()
                .restart_due(start + Duration::from_millis(100))
        );
    }
}
