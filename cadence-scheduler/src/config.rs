use std::time::Duration;

use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks
    #[arg(long, default_value_t = 10)]
    pub check_interval_seconds: u64,

    /// Upper bound on simultaneously executing tasks
    #[arg(long, default_value_t = 5)]
    pub max_concurrent_tasks: usize,

    /// Execution records older than this many days are purged
    #[arg(long, default_value_t = 30)]
    pub cleanup_days: u32,

    /// Seconds between execution history cleanups
    #[arg(long, default_value_t = 3600)]
    pub cleanup_interval_seconds: u64,

    /// How long shutdown waits for in-flight executions before cancelling them
    #[arg(long, default_value_t = 30)]
    pub shutdown_timeout_seconds: u64,

    /// Execution records kept for retry while the store is unavailable
    #[arg(long, default_value_t = 1000)]
    pub max_pending_executions: usize,

    /// Handler deadline for tasks created without one
    #[arg(long, default_value_t = 300)]
    pub default_timeout_seconds: u64,

    /// Consecutive failures tolerated for tasks created without a limit
    #[arg(long, default_value_t = 3)]
    pub default_max_failures: u32,
}

impl SchedulerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 10,
            max_concurrent_tasks: 5,
            cleanup_days: 30,
            cleanup_interval_seconds: 3600,
            shutdown_timeout_seconds: 30,
            max_pending_executions: 1000,
            default_timeout_seconds: 300,
            default_max_failures: 3,
        }
    }
}
