use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Caps simultaneous executions and tracks which task IDs hold a slot.
///
/// Each reservation carries a cancellation signal so an in-flight execution
/// can be interrupted by task deletion or shutdown.
pub struct ConcurrencyLimiter {
    max_concurrent: usize,
    running: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Reserve a slot for `task_id` if capacity remains and the task holds no
    /// slot yet. Both checks and the insert happen under one lock.
    pub fn try_reserve(&self, task_id: &str) -> bool {
        self.reserve(task_id).is_some()
    }

    fn reserve(&self, task_id: &str) -> Option<Arc<Notify>> {
        let mut running = self.running.lock();
        if running.len() >= self.max_concurrent || running.contains_key(task_id) {
            return None;
        }
        let signal = Arc::new(Notify::new());
        running.insert(task_id.to_string(), signal.clone());
        Some(signal)
    }

    pub fn release(&self, task_id: &str) {
        self.running.lock().remove(task_id);
    }

    /// Release only if the slot still belongs to the reservation that owns
    /// `signal`; a slot cleared at shutdown may have been handed out again.
    fn release_owned(&self, task_id: &str, signal: &Arc<Notify>) {
        let mut running = self.running.lock();
        if running
            .get(task_id)
            .is_some_and(|current| Arc::ptr_eq(current, signal))
        {
            running.remove(task_id);
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.running.lock().contains_key(task_id)
    }

    /// Ask the execution holding `task_id`'s slot to stop. Returns false when
    /// nothing is running for that task.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.running.lock().get(task_id) {
            Some(signal) => {
                signal.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let running = self.running.lock();
        for signal in running.values() {
            signal.notify_one();
        }
        running.len()
    }

    /// Drop every reservation; returns the task IDs that still held one.
    pub fn clear(&self) -> Vec<String> {
        self.running.lock().drain().map(|(task_id, _)| task_id).collect()
    }
}

/// A held concurrency slot. Dropping it releases the slot, which also covers
/// panics and cancelled futures.
pub struct Reservation {
    limiter: Arc<ConcurrencyLimiter>,
    task_id: String,
    signal: Arc<Notify>,
}

impl Reservation {
    pub fn try_acquire(limiter: &Arc<ConcurrencyLimiter>, task_id: &str) -> Option<Self> {
        let signal = limiter.reserve(task_id)?;
        Some(Self {
            limiter: limiter.clone(),
            task_id: task_id.to_string(),
            signal,
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Resolves once `cancel` or `cancel_all` targets this reservation.
    pub async fn cancelled(&self) {
        self.signal.notified().await
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.limiter.release_owned(&self.task_id, &self.signal);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use super::*;

    #[test]
    fn reservation_is_exclusive_per_task() {
        let limiter = ConcurrencyLimiter::new(3);
        assert!(limiter.try_reserve("a"));
        assert!(!limiter.try_reserve("a"));
        assert!(limiter.is_running("a"));
        limiter.release("a");
        assert!(!limiter.is_running("a"));
        assert!(limiter.try_reserve("a"));
    }

    #[test]
    fn capacity_is_enforced() {
        let limiter = ConcurrencyLimiter::new(2);
        assert!(limiter.try_reserve("a"));
        assert!(limiter.try_reserve("b"));
        assert!(!limiter.try_reserve("c"));
        assert_eq!(limiter.running_count(), 2);
        limiter.release("b");
        assert!(limiter.try_reserve("c"));
    }

    #[test]
    fn dropping_a_reservation_releases_the_slot() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1));
        {
            let reservation = Reservation::try_acquire(&limiter, "a").unwrap();
            assert_eq!(reservation.task_id(), "a");
            assert!(Reservation::try_acquire(&limiter, "b").is_none());
        }
        assert_eq!(limiter.running_count(), 0);
    }

    #[test]
    fn stale_reservation_does_not_release_a_newer_one() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1));
        let stale = Reservation::try_acquire(&limiter, "a").unwrap();
        assert_eq!(limiter.clear(), vec!["a".to_string()]);
        let fresh = Reservation::try_acquire(&limiter, "a").unwrap();
        drop(stale);
        assert!(limiter.is_running("a"));
        drop(fresh);
        assert!(!limiter.is_running("a"));
    }

    #[test]
    fn concurrent_reservations_never_exceed_capacity() {
        let limiter = Arc::new(ConcurrencyLimiter::new(4));
        let peak = Arc::new(AtomicUsize::new(0));

        thread::scope(|scope| {
            for worker in 0..16 {
                let limiter = limiter.clone();
                let peak = peak.clone();
                scope.spawn(move || {
                    for round in 0..200 {
                        let id = format!("task-{}", (worker + round) % 8);
                        if limiter.try_reserve(&id) {
                            peak.fetch_max(limiter.running_count(), Ordering::SeqCst);
                            limiter.release(&id);
                        }
                    }
                });
            }
        });

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(limiter.running_count(), 0);
    }

    #[tokio::test]
    async fn cancel_wakes_the_reservation_holder() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1));
        let reservation = Reservation::try_acquire(&limiter, "a").unwrap();
        assert!(limiter.cancel("a"));
        assert!(!limiter.cancel("b"));
        tokio::time::timeout(std::time::Duration::from_secs(1), reservation.cancelled())
            .await
            .unwrap();
    }
}
