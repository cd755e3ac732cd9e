use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use cadence_database::TaskStore;
use cadence_models::core::{ScheduledTask, TaskExecution};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::TaskIndex;

/// Best-effort copy of the in-memory index into the task store.
///
/// Writes that fail are remembered and retried by `flush`; the in-memory
/// index stays the source of truth in the meantime. Task writes are
/// serialized and always read the latest indexed state, so a slow write can
/// never overwrite a newer one. At most `max_pending_executions` execution
/// records wait for retry; older ones are dropped first.
pub(crate) struct StoreMirror<S: TaskStore> {
    store: Arc<S>,
    writer: tokio::sync::Mutex<()>,
    pending_tasks: Mutex<HashMap<String, ScheduledTask>>,
    pending_executions: Mutex<VecDeque<TaskExecution>>,
    max_pending_executions: usize,
}

impl<S: TaskStore> StoreMirror<S> {
    pub(crate) fn new(store: Arc<S>, max_pending_executions: usize) -> Self {
        Self {
            store,
            writer: tokio::sync::Mutex::new(()),
            pending_tasks: Mutex::new(HashMap::new()),
            pending_executions: Mutex::new(VecDeque::new()),
            max_pending_executions,
        }
    }

    pub(crate) fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Persist the indexed state of `task_id`. Returns false when the task is
    /// no longer indexed or the write failed.
    pub(crate) async fn persist_task(&self, tasks: &TaskIndex, task_id: &str) -> bool {
        let _writer = self.writer.lock().await;
        let snapshot = tasks.read().await.get(task_id).cloned();
        match snapshot {
            Some(task) => self.write(task).await,
            None => false,
        }
    }

    /// Persist a task that has left the index (cancelled tasks).
    pub(crate) async fn persist_snapshot(&self, task: ScheduledTask) -> bool {
        let _writer = self.writer.lock().await;
        self.write(task).await
    }

    async fn write(&self, task: ScheduledTask) -> bool {
        match self.store.save(&task).await {
            Ok(()) => {
                self.pending_tasks.lock().remove(&task.id);
                true
            }
            Err(err) => {
                error!("Failed to save task {} ({}): {}", task.id, task.name, err);
                self.pending_tasks.lock().insert(task.id.clone(), task);
                false
            }
        }
    }

    pub(crate) async fn record_execution(&self, execution: TaskExecution) -> bool {
        match self.store.create_execution(&execution).await {
            Ok(()) => true,
            Err(err) => {
                error!(
                    "Failed to record execution {} of task {}: {}",
                    execution.id, execution.task_id, err
                );
                self.queue_execution(execution);
                false
            }
        }
    }

    fn queue_execution(&self, execution: TaskExecution) {
        let mut pending = self.pending_executions.lock();
        pending.push_back(execution);
        while pending.len() > self.max_pending_executions {
            if let Some(dropped) = pending.pop_front() {
                warn!(
                    "Retry queue full; dropping execution {} of task {}",
                    dropped.id, dropped.task_id
                );
            }
        }
    }

    pub(crate) fn pending_writes(&self) -> usize {
        self.pending_tasks.lock().len() + self.pending_executions.lock().len()
    }

    /// Retry every write that failed earlier. Tasks still in the index are
    /// written from their current state.
    pub(crate) async fn flush(&self, tasks: &TaskIndex) {
        let queued_tasks: Vec<ScheduledTask> = {
            let mut pending = self.pending_tasks.lock();
            pending.drain().map(|(_, task)| task).collect()
        };
        let queued_executions: VecDeque<TaskExecution> =
            std::mem::take(&mut *self.pending_executions.lock());

        if queued_tasks.is_empty() && queued_executions.is_empty() {
            return;
        }
        debug!(
            "Retrying {} task write(s) and {} execution write(s)",
            queued_tasks.len(),
            queued_executions.len()
        );

        let mut recovered = 0;
        for queued in queued_tasks {
            let _writer = self.writer.lock().await;
            let current = tasks.read().await.get(&queued.id).cloned();
            if self.write(current.unwrap_or(queued)).await {
                recovered += 1;
            }
        }
        for execution in queued_executions {
            if self.record_execution(execution).await {
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!("Recovered {} pending store write(s)", recovered);
        }
    }
}
