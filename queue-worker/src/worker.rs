//! The worker main loop: lease, execute, record, repeat.

use std::time::Duration;

use chrono::Utc;
use queue_core::{Decision, Job, RetryPolicy, Store};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::WorkerSettings;
use crate::error::WorkerError;
use crate::executor;

/// Arm the stop flag for a worker process: the first SIGINT or SIGTERM flips
/// it, and the worker drains its in-flight job before exiting. Neither signal
/// interrupts the running command.
pub fn shutdown_on_signal(worker_id: String) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut sigint =
            signal(SignalKind::interrupt()).expect("worker could not listen for SIGINT");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("worker could not listen for SIGTERM");

        let received = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        info!(worker = %worker_id, signal = received, "stop requested, finishing current job first");

        let _ = tx.send(true);
    });

    rx
}

/// A single worker process. Workers coordinate only through the store; the
/// identifier is assigned by whoever spawned us and marks our leases.
pub struct Worker {
    id: String,
    store: Store,
    policy: RetryPolicy,
    poll_interval: Duration,
    job_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    /// Build a worker over an open store. The backoff base is read from
    /// config once, here; later `config set backoff_base` calls only reach
    /// workers started after the change.
    pub async fn new(
        id: impl Into<String>,
        store: Store,
        settings: &WorkerSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, WorkerError> {
        let policy = RetryPolicy::new(store.backoff_base().await?);

        Ok(Self {
            id: id.into(),
            store,
            policy,
            poll_interval: settings.poll_interval.0,
            job_timeout: settings.job_timeout.0,
            shutdown,
        })
    }

    /// Run until shutdown is requested. A request arriving mid-job lets the
    /// in-flight command finish and records its outcome before exiting.
    pub async fn run(mut self) -> Result<(), WorkerError> {
        info!(worker = %self.id, "worker started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.store.lease_next(&self.id, Utc::now()).await? {
                Some(job) => self.process(job).await?,
                None => self.idle().await,
            }
        }

        info!(worker = %self.id, "worker stopped");
        Ok(())
    }

    /// Sleep out the poll interval, waking early if shutdown is requested.
    async fn idle(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    async fn process(&self, job: Job) -> Result<(), WorkerError> {
        info!(worker = %self.id, job = %job.id, command = %job.command, "processing job");

        let outcome = executor::run_shell(&job.command, self.job_timeout).await;

        if outcome.is_success() {
            self.store.mark_completed(&job.id, Utc::now()).await?;
            info!(worker = %self.id, job = %job.id, "job completed");
            return Ok(());
        }

        let now = Utc::now();
        let attempts = self.store.increment_attempts(&job.id, now).await?;
        warn!(
            worker = %self.id,
            job = %job.id,
            attempt = attempts,
            max_retries = job.max_retries,
            "job attempt failed: {}",
            outcome.describe(),
        );

        match self.policy.decide(attempts, job.max_retries, now) {
            Decision::Dead => {
                self.store.mark_dead(&job.id, now).await?;
                warn!(
                    worker = %self.id,
                    job = %job.id,
                    attempts,
                    "job moved to the dead letter queue",
                );
            }
            Decision::Retry { retry_at } => {
                self.store.mark_failed_for_retry(&job.id, now, retry_at).await?;
                info!(
                    worker = %self.id,
                    job = %job.id,
                    retry_at = %retry_at,
                    "job scheduled for retry",
                );
            }
        }

        Ok(())
    }
}
