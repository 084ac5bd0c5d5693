//! Lifecycle of the worker OS processes.
//!
//! Workers outlive the CLI invocation that started them, so the tracked set
//! is a pid file next to the database rather than in-memory process handles.
//! `stop` escalates from SIGTERM to SIGKILL once the grace window closes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How long a signaled worker gets to finish its in-flight job.
const STOP_GRACE: Duration = Duration::from_secs(30);
/// How long we wait for a SIGKILLed process to disappear before giving up.
const KILL_WAIT: Duration = Duration::from_secs(5);
const PROBE_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerEntry {
    pub id: String,
    pub pid: i32,
}

pub struct WorkerManager {
    db_path: PathBuf,
    pid_file: PathBuf,
}

impl WorkerManager {
    pub fn new(db_path: &Path) -> Self {
        let mut pid_file = db_path.as_os_str().to_owned();
        pid_file.push(".workers.json");

        Self {
            db_path: db_path.to_owned(),
            pid_file: PathBuf::from(pid_file),
        }
    }

    /// Spawn `count` worker processes by re-executing this binary with the
    /// `worker run` entry point. Refuses while any tracked worker is alive.
    pub fn start(&self, count: u32) -> anyhow::Result<Vec<WorkerEntry>> {
        let alive = self.tracked()?.into_iter().filter(|w| process_alive(w.pid)).count();
        if alive > 0 {
            bail!("workers are already running ({alive} alive); stop them first");
        }

        let exe = std::env::current_exe().context("could not locate the queuectl binary")?;
        let mut entries = Vec::with_capacity(count as usize);

        for n in 1..=count {
            let worker_id = format!("worker-{n}");
            let child = Command::new(&exe)
                .arg("--db")
                .arg(&self.db_path)
                .args(["worker", "run", "--worker-id"])
                .arg(&worker_id)
                .stdin(Stdio::null())
                .spawn()
                .with_context(|| format!("failed to spawn {worker_id}"))?;

            info!(worker = %worker_id, pid = child.id(), "started worker");
            entries.push(WorkerEntry {
                id: worker_id,
                pid: child.id() as i32,
            });
        }

        self.write_tracked(&entries)?;
        Ok(entries)
    }

    /// Signal every tracked worker to stop and wait for them to exit,
    /// hard-killing any that outlive the grace window. Returns how many
    /// workers were actually stopped; zero means there was nothing to do.
    pub async fn stop(&self) -> anyhow::Result<usize> {
        let live: Vec<WorkerEntry> = self
            .tracked()?
            .into_iter()
            .filter(|w| process_alive(w.pid))
            .collect();

        if live.is_empty() {
            self.clear()?;
            return Ok(0);
        }

        info!("stopping {} worker(s)", live.len());
        for worker in &live {
            let _ = kill(Pid::from_raw(worker.pid), Signal::SIGTERM);
        }

        for worker in &live {
            wait_for_exit(worker.pid, STOP_GRACE).await;

            if process_alive(worker.pid) {
                warn!(worker = %worker.id, pid = worker.pid, "worker did not stop in time, killing");
                let _ = kill(Pid::from_raw(worker.pid), Signal::SIGKILL);
                wait_for_exit(worker.pid, KILL_WAIT).await;
            }
        }

        self.clear()?;
        Ok(live.len())
    }

    /// Number of tracked workers still alive.
    pub fn active_count(&self) -> anyhow::Result<usize> {
        Ok(self.tracked()?.iter().filter(|w| process_alive(w.pid)).count())
    }

    fn tracked(&self) -> anyhow::Result<Vec<WorkerEntry>> {
        if !self.pid_file.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&self.pid_file)
            .with_context(|| format!("failed to read {}", self.pid_file.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("corrupt worker pid file {}", self.pid_file.display()))
    }

    fn write_tracked(&self, entries: &[WorkerEntry]) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(entries)?;
        fs::write(&self.pid_file, raw)
            .with_context(|| format!("failed to write {}", self.pid_file.display()))
    }

    fn clear(&self) -> anyhow::Result<()> {
        if self.pid_file.exists() {
            fs::remove_file(&self.pid_file)
                .with_context(|| format!("failed to remove {}", self.pid_file.display()))?;
        }
        Ok(())
    }
}

/// Signal-0 probe. EPERM still counts as alive.
fn process_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

async fn wait_for_exit(pid: i32, budget: Duration) {
    let deadline = Instant::now() + budget;
    while process_alive(pid) && Instant::now() < deadline {
        tokio::time::sleep(PROBE_INTERVAL).await;
    }
}
