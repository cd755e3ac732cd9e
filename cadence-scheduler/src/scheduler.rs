use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use cadence_database::TaskStore;
use cadence_models::core::TaskStatus;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::{
    sync::{watch, RwLock},
    task::JoinHandle,
    time::{self, Instant},
};

use crate::{
    config::SchedulerConfig,
    errors::SchedulerError,
    executor::TaskExecutor,
    limiter::{ConcurrencyLimiter, Reservation},
    mirror::StoreMirror,
    registry::HandlerRegistry,
    schedule, TaskIndex,
};

/// Polls the in-memory working set and dispatches due tasks.
///
/// Cloning is cheap and every clone drives the same scheduler, so one clone
/// can run the loop while others serve the public API.
pub struct TaskScheduler<S: TaskStore> {
    pub(crate) tasks: TaskIndex,
    pub(crate) limiter: Arc<ConcurrencyLimiter>,
    pub(crate) mirror: Arc<StoreMirror<S>>,
    pub(crate) config: SchedulerConfig,
    executor: TaskExecutor<S>,
    running: Arc<AtomicBool>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl<S: TaskStore> Clone for TaskScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            tasks: self.tasks.clone(),
            limiter: self.limiter.clone(),
            mirror: self.mirror.clone(),
            config: self.config.clone(),
            executor: self.executor.clone(),
            running: self.running.clone(),
            stop_tx: self.stop_tx.clone(),
        }
    }
}

impl<S: TaskStore> TaskScheduler<S> {
    /// Prepare the store and load its tasks into the working set.
    ///
    /// Cancelled tasks stay in the store only. Tasks persisted as RUNNING were
    /// interrupted by a crash and go back to ACTIVE; ACTIVE tasks without a
    /// `next_run` get one computed now.
    pub async fn load(
        store: Arc<S>,
        registry: HandlerRegistry,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        store.initialize().await?;
        let persisted = store.load_all().await?;
        let now = Utc::now();

        let mut index = HashMap::with_capacity(persisted.len());
        let mut recovered = Vec::new();
        for mut task in persisted {
            if task.status == TaskStatus::Cancelled {
                continue;
            }
            let mut changed = false;
            if task.status == TaskStatus::Running {
                warn!(
                    "Task {} ({}) was left running by a previous process; reactivating",
                    task.name, task.id
                );
                task.status = TaskStatus::Active;
                task.next_run = schedule::next_run(&task, now);
                changed = true;
            }
            if task.status == TaskStatus::Active && task.next_run.is_none() {
                task.next_run = schedule::initial_run(&task, now);
                changed = true;
            }
            if changed {
                recovered.push(task.id.clone());
            }
            index.insert(task.id.clone(), task);
        }
        info!("Loaded {} task(s) into the working set", index.len());
        registry.print_handlers();

        let tasks: TaskIndex = Arc::new(RwLock::new(index));
        let limiter = Arc::new(ConcurrencyLimiter::new(config.max_concurrent_tasks));
        let mirror = Arc::new(StoreMirror::new(store, config.max_pending_executions));
        let executor = TaskExecutor::new(Arc::new(registry), tasks.clone(), mirror.clone());
        let (stop_tx, _) = watch::channel(false);

        let scheduler = Self {
            tasks,
            limiter,
            mirror,
            config,
            executor,
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: Arc::new(stop_tx),
        };
        for task_id in recovered {
            scheduler.mirror.persist_task(&scheduler.tasks, &task_id).await;
        }
        Ok(scheduler)
    }

    /// Spawn the scheduler loop onto the runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run().await })
    }

    /// Ask the loop to stop. In-flight executions are drained by the loop
    /// itself before `run` returns.
    pub fn stop(&self) {
        info!("Scheduler stop requested");
        self.stop_tx.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn running_count(&self) -> usize {
        self.limiter.running_count()
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.limiter
    }

    /// Tick every `check_interval` until `stop` is called.
    pub async fn run(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        info!(
            "Scheduler loop started: tick every {}s, at most {} concurrent task(s)",
            self.config.check_interval().as_secs(),
            self.limiter.max_concurrent()
        );

        let mut last_cleanup: Option<Instant> = None;
        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = time::sleep(self.config.check_interval()) => {
                    let start = Instant::now();
                    let dispatched = self.tick(Utc::now()).await;
                    if last_cleanup.map_or(true, |at| at.elapsed() >= self.config.cleanup_interval()) {
                        self.cleanup_executions(Utc::now()).await;
                        last_cleanup = Some(Instant::now());
                    }
                    debug!(
                        "Scheduler tick dispatched {} task(s) in {:.3} seconds",
                        dispatched,
                        start.elapsed().as_secs_f64()
                    );
                }
            }
        }

        info!("Scheduler received shutdown signal.");
        self.drain_executions().await;
        self.running.store(false, Ordering::SeqCst);
        info!("Scheduler stopped");
    }

    /// One scheduling pass as of `now`; returns how many executions started.
    ///
    /// Dispatch is fire-and-forget: executions run on their own tokio tasks
    /// and report back only through the index and the limiter.
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        self.mirror.flush(&self.tasks).await;

        if self.limiter.running_count() >= self.limiter.max_concurrent() {
            debug!(
                "All {} execution slot(s) busy; skipping dispatch",
                self.limiter.max_concurrent()
            );
            return 0;
        }

        let mut due: Vec<_> = {
            let tasks = self.tasks.read().await;
            tasks
                .values()
                .filter(|task| task.is_due(now) && !self.limiter.is_running(&task.id))
                .map(|task| (task.next_run, task.id.clone(), task.failure_threshold_reached()))
                .collect()
        };
        due.sort();

        let mut dispatched = 0;
        for (_, task_id, threshold_reached) in due {
            if threshold_reached {
                self.mark_failed(&task_id).await;
                continue;
            }
            let Some(reservation) = Reservation::try_acquire(&self.limiter, &task_id) else {
                debug!("No execution slot for task {}; retrying next tick", task_id);
                continue;
            };
            let executor = self.executor.clone();
            tokio::spawn(async move {
                executor.execute(reservation).await;
            });
            dispatched += 1;
        }
        dispatched
    }

    async fn mark_failed(&self, task_id: &str) {
        {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get_mut(task_id) else {
                return;
            };
            if task.status != TaskStatus::Active || !task.failure_threshold_reached() {
                return;
            }
            task.status = TaskStatus::Failed;
            warn!(
                "Task {} ({}) reached {} consecutive failure(s); marking failed",
                task.name, task.id, task.failure_count
            );
        }
        self.mirror.persist_task(&self.tasks, task_id).await;
    }

    /// Purge execution records older than `cleanup_days`.
    pub async fn cleanup_executions(&self, now: DateTime<Utc>) -> u64 {
        let cutoff = now - chrono::Duration::days(i64::from(self.config.cleanup_days));
        match self.mirror.store().delete_execution_range(cutoff).await {
            Ok(removed) => {
                if removed > 0 {
                    info!("Removed {} execution record(s) older than {}", removed, cutoff);
                }
                removed
            }
            Err(err) => {
                error!("Execution history cleanup failed: {}", err);
                0
            }
        }
    }

    /// Wait up to `timeout` for every execution slot to be released.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.limiter.running_count() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    /// Give in-flight executions the shutdown grace period, cancel the rest,
    /// and leave no task marked RUNNING.
    async fn drain_executions(&self) {
        let in_flight = self.limiter.running_count();
        if in_flight > 0 {
            info!(
                "Waiting up to {}s for {} in-flight execution(s)",
                self.config.shutdown_timeout().as_secs(),
                in_flight
            );
            if !self.wait_idle(self.config.shutdown_timeout()).await {
                let cancelled = self.limiter.cancel_all();
                warn!("Cancelling {} execution(s) still running", cancelled);
                self.wait_idle(Duration::from_secs(5)).await;
            }
        }

        let leaked = self.limiter.clear();
        if !leaked.is_empty() {
            warn!("Released {} reservation(s) at shutdown", leaked.len());
        }

        let interrupted: Vec<String> = {
            let mut tasks = self.tasks.write().await;
            tasks
                .values_mut()
                .filter(|task| task.status == TaskStatus::Running)
                .map(|task| {
                    task.status = TaskStatus::Active;
                    task.id.clone()
                })
                .collect()
        };
        for task_id in interrupted {
            self.mirror.persist_task(&self.tasks, &task_id).await;
        }
        self.mirror.flush(&self.tasks).await;
    }
}
