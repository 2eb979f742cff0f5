//! Worker pool launcher.
//!
//! Spawns N copies of the worker command with a stagger, watches them, and
//! on shutdown sends SIGTERM, waits out a grace period, then sends SIGKILL.

use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::signal::terminate;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// The program and arguments each worker runs.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-invoke the running executable with `args`.
    pub fn current_exe(args: Vec<String>) -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate the current executable")?;
        Ok(Self::new(program, args))
    }

    fn spawn(&self) -> Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn worker: {}", self.program.display()))
    }
}

/// What to do when a worker exits on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Log the exit and leave the slot empty.
    #[default]
    Never,
    /// Respawn workers that exit with a failure status, up to
    /// `max_restarts` times across the whole pool.
    OnFailure { max_restarts: u32 },
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    /// Delay between consecutive spawns.
    pub stagger: Duration,
    /// How long workers get to exit after SIGTERM.
    pub grace: Duration,
    pub restart: RestartPolicy,
}

impl PoolConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            stagger: Duration::from_millis(500),
            grace: Duration::from_secs(2),
            restart: RestartPolicy::Never,
        }
    }
}

/// Summary of a pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub spawned: usize,
    pub restarts: u32,
    /// Workers that exited on their own before shutdown.
    pub exited: usize,
    /// Workers that stopped within the grace period after SIGTERM.
    pub terminated: usize,
    /// Workers that had to be killed.
    pub killed: usize,
}

struct WorkerSlot {
    index: usize,
    child: Option<Child>,
}

pub struct WorkerPool {
    command: WorkerCommand,
    config: PoolConfig,
    slots: Vec<WorkerSlot>,
    report: PoolReport,
}

impl WorkerPool {
    pub fn new(command: WorkerCommand, config: PoolConfig) -> Self {
        Self {
            command,
            config,
            slots: Vec::new(),
            report: PoolReport::default(),
        }
    }

    /// Number of workers currently running.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.child.is_some()).count()
    }

    /// Spawn every worker, pausing `stagger` between spawns. A worker that
    /// fails to spawn is logged and its slot stays empty.
    pub async fn start(&mut self) -> usize {
        info!(workers = self.config.workers, "Starting worker pool");
        for index in 0..self.config.workers {
            if index > 0 && !self.config.stagger.is_zero() {
                sleep(self.config.stagger).await;
            }
            let child = match self.command.spawn() {
                Ok(child) => {
                    self.report.spawned += 1;
                    info!(worker = index + 1, pid = child.id(), "Worker started");
                    Some(child)
                }
                Err(e) => {
                    error!(worker = index + 1, error = %e, "Worker failed to start");
                    None
                }
            };
            self.slots.push(WorkerSlot { index, child });
        }
        self.live()
    }

    /// Watch the workers until `shutdown` resolves or none are left, then
    /// stop whatever is still running.
    pub async fn run_until<F>(&mut self, shutdown: F) -> PoolReport
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping workers");
                    break;
                }
                _ = ticker.tick() => {
                    self.reap();
                    if self.live() == 0 {
                        warn!("All workers have exited");
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        self.report.clone()
    }

    /// Collect exited workers and apply the restart policy.
    fn reap(&mut self) {
        for i in 0..self.slots.len() {
            let status = match self.slots[i].child.as_mut().map(Child::try_wait) {
                Some(Ok(Some(status))) => status,
                Some(Ok(None)) | None => continue,
                Some(Err(e)) => {
                    warn!(worker = self.slots[i].index + 1, error = %e, "Failed to poll worker");
                    continue;
                }
            };
            self.slots[i].child = None;
            self.report.exited += 1;
            let worker = self.slots[i].index + 1;
            log_exit(worker, status);

            if self.should_restart(status) {
                self.report.restarts += 1;
                match self.command.spawn() {
                    Ok(child) => {
                        self.report.spawned += 1;
                        info!(worker, pid = child.id(), restarts = self.report.restarts, "Worker restarted");
                        self.slots[i].child = Some(child);
                    }
                    Err(e) => error!(worker, error = %e, "Worker failed to restart"),
                }
            }
        }
    }

    fn should_restart(&self, status: ExitStatus) -> bool {
        match self.config.restart {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure { max_restarts } => {
                !status.success() && self.report.restarts < max_restarts
            }
        }
    }

    /// SIGTERM every live worker, wait up to the grace period, then kill
    /// and reap the rest.
    pub async fn shutdown(&mut self) {
        let mut pending: Vec<(usize, Child)> = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.child.take().map(|child| (slot.index + 1, child)))
            .collect();
        if pending.is_empty() {
            return;
        }

        for (worker, child) in pending.iter_mut() {
            info!(worker = *worker, pid = child.id(), "Terminating worker");
            terminate(child);
        }

        let deadline = Instant::now() + self.config.grace;
        while !pending.is_empty() && Instant::now() < deadline {
            pending.retain_mut(|(worker, child)| match child.try_wait() {
                Ok(Some(status)) => {
                    info!(worker = *worker, %status, "Worker stopped");
                    self.report.terminated += 1;
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!(worker = *worker, error = %e, "Failed to poll worker");
                    true
                }
            });
            if !pending.is_empty() {
                sleep(POLL_INTERVAL.min(self.config.grace)).await;
            }
        }

        for (worker, mut child) in pending {
            warn!(worker, pid = child.id(), "Worker ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                error!(worker, error = %e, "Failed to kill worker");
            }
            self.report.killed += 1;
        }
        info!(report = ?self.report, "Worker pool stopped");
    }
}

fn log_exit(worker: usize, status: ExitStatus) {
    if status.success() {
        info!(worker, %status, "Worker exited");
    } else {
        warn!(worker, %status, "Worker exited with failure");
    }
}
