use std::time::Duration;

const DEFAULT_WORKERS: usize = 5;
const DEFAULT_PRIORITY_QUIET_MS: u64 = 200;
const DEFAULT_PRIORITY_MAX_WAIT_MS: u64 = 1000;
const DEFAULT_COPY_POLL_MS: u64 = 200;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of workers draining the normal lane.
    pub workers: usize,
    /// Quiet period of the "priority task completed" notification.
    pub priority_quiet: Duration,
    /// Ceiling after which a pending notification fires regardless of churn.
    pub priority_max_wait: Duration,
    /// Delay between two polls of an asynchronous copy monitor.
    pub copy_poll_interval: Duration,
    /// How long `Scheduler::shutdown` waits for workers to stop.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            priority_quiet: Duration::from_millis(DEFAULT_PRIORITY_QUIET_MS),
            priority_max_wait: Duration::from_millis(DEFAULT_PRIORITY_MAX_WAIT_MS),
            copy_poll_interval: Duration::from_millis(DEFAULT_COPY_POLL_MS),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            workers: read_usize_env("ONEDESK_WORKERS", DEFAULT_WORKERS),
            priority_quiet: Duration::from_millis(read_u64_env(
                "ONEDESK_PRIORITY_QUIET_MS",
                DEFAULT_PRIORITY_QUIET_MS,
            )),
            // Zero disables the ceiling.
            priority_max_wait: Duration::from_millis(millis_or(
                std::env::var("ONEDESK_PRIORITY_MAX_WAIT_MS").ok(),
                DEFAULT_PRIORITY_MAX_WAIT_MS,
                true,
            )),
            copy_poll_interval: Duration::from_millis(read_u64_env(
                "ONEDESK_COPY_POLL_MS",
                DEFAULT_COPY_POLL_MS,
            )),
            shutdown_timeout: Duration::from_millis(read_u64_env(
                "ONEDESK_SHUTDOWN_TIMEOUT_MS",
                DEFAULT_SHUTDOWN_TIMEOUT_MS,
            )),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_copy_poll_interval(mut self, interval: Duration) -> Self {
        self.copy_poll_interval = interval;
        self
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.max(1)
    }
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    millis_or(std::env::var(name).ok(), default, false)
}

fn millis_or(value: Option<String>, default: u64, allow_zero: bool) -> u64 {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| allow_zero || *value > 0)
        .unwrap_or(default)
}

fn read_usize_env(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
