use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use cadence_models::{
    core::{ScheduledTask, TaskType},
    errors::SendableError,
};
use log::info;
use serde_json::Value;

/// Body of one task type.
///
/// The executor runs `run` on its own tokio task under the task's deadline
/// and aborts it on timeout or cancellation, so implementations should not
/// detach work that outlives the returned future.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn run(&self, task: &ScheduledTask) -> Result<Value, SendableError>;
}

/// Fixed task-type to handler table, built once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `task_type`, replacing any previous binding.
    pub fn register(&mut self, task_type: TaskType, handler: impl TaskHandler) {
        self.handlers.insert(task_type, Arc::new(handler));
    }

    pub fn with_handler(mut self, task_type: TaskType, handler: impl TaskHandler) -> Self {
        self.register(task_type, handler);
        self
    }

    pub fn resolve(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_by_key(|task_type| task_type.as_str());
        types
    }

    pub fn print_handlers(&self) {
        info!("{} task handler(s) registered", self.handlers.len());
        for task_type in self.task_types() {
            info!("Handler bound for task type `{}`", task_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Fixed(Value);

    #[async_trait]
    impl TaskHandler for Fixed {
        async fn run(&self, _task: &ScheduledTask) -> Result<Value, SendableError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn resolve_returns_registered_handlers_only() {
        let registry = HandlerRegistry::new()
            .with_handler(TaskType::Broadcast, Fixed(json!("sent")))
            .with_handler(TaskType::Maintenance, Fixed(json!("vacuumed")));

        assert!(registry.resolve(TaskType::Broadcast).is_some());
        assert!(registry.resolve(TaskType::Synchronization).is_none());
        assert_eq!(
            registry.task_types(),
            vec![TaskType::Broadcast, TaskType::Maintenance]
        );
    }

    #[test]
    fn register_replaces_existing_binding() {
        let mut registry = HandlerRegistry::new();
        registry.register(TaskType::DataRefresh, Fixed(json!(1)));
        registry.register(TaskType::DataRefresh, Fixed(json!(2)));
        assert_eq!(registry.task_types().len(), 1);
    }
}
