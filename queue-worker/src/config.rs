use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

/// Runtime knobs for a worker process, read from the environment.
#[derive(Envconfig, Clone)]
pub struct WorkerSettings {
    /// How long an idle worker sleeps before polling the queue again.
    #[envconfig(from = "QUEUECTL_POLL_INTERVAL_MS", default = "500")]
    pub poll_interval: EnvMsDuration,

    /// Wall-clock budget for a single job command.
    #[envconfig(from = "QUEUECTL_JOB_TIMEOUT_SECS", default = "300")]
    pub job_timeout: EnvSecsDuration,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvSecsDuration(pub time::Duration);

impl FromStr for EnvSecsDuration {
    type Err = ParseEnvDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secs = s.parse::<u64>().map_err(|_| ParseEnvDurationError)?;

        Ok(EnvSecsDuration(time::Duration::from_secs(secs)))
    }
}
