pub mod config;
pub mod limiter;
pub mod registry;
pub mod schedule;

mod api;
mod errors;
mod executor;
mod mirror;
mod scheduler;

use std::{collections::HashMap, sync::Arc};

use cadence_models::core::ScheduledTask;
use tokio::sync::RwLock;

pub use api::HealthStatus;
pub use async_trait::async_trait;
pub use config::SchedulerConfig;
pub use errors::SchedulerError;
pub use limiter::{ConcurrencyLimiter, Reservation};
pub use registry::{HandlerRegistry, TaskHandler};
pub use scheduler::TaskScheduler;

/// The scheduler's working set, keyed by task id.
pub(crate) type TaskIndex = Arc<RwLock<HashMap<String, ScheduledTask>>>;
