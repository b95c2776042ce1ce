//! Debounced flushing of dirty stores
//!
//! Every mutation schedules a write for its store; writes are coalesced so
//! a burst of mutations inside the quiet period costs one write. A failed
//! write puts the scheduler into degraded mode: in-memory state keeps
//! working but nothing more is written until [`FlushScheduler::reset_degraded`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::backend::{StorageError, StoreKind};

/// Something that can persist one logical store on demand
pub trait FlushTarget: Send + Sync + 'static {
    fn write_store(&self, kind: StoreKind) -> Result<(), StorageError>;
}

struct Shared {
    target: Arc<dyn FlushTarget>,
    pending: Mutex<HashSet<StoreKind>>,
    degraded: AtomicBool,
    /// Serializes writes so a timer and a forced flush never interleave
    write_lock: Mutex<()>,
    writes: AtomicU64,
}

impl Shared {
    fn write(&self, kind: StoreKind) {
        let _guard = self.write_lock.lock();
        if self.degraded.load(Ordering::SeqCst) {
            self.pending.lock().insert(kind);
            return;
        }
        match self.target.write_store(kind) {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                debug!(store = %kind, "Flushed store");
            }
            Err(e) => {
                error!(store = %kind, error = %e, "Flush failed, persistence degraded");
                self.degraded.store(true, Ordering::SeqCst);
                self.pending.lock().insert(kind);
            }
        }
    }
}

pub struct FlushScheduler {
    shared: Arc<Shared>,
    quiet_period: Duration,
    timers: Mutex<HashMap<StoreKind, JoinHandle<()>>>,
    /// Absent outside a tokio runtime; scheduling then writes immediately
    runtime: Option<Handle>,
}

impl FlushScheduler {
    pub fn new(target: Arc<dyn FlushTarget>, quiet_period: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                target,
                pending: Mutex::new(HashSet::new()),
                degraded: AtomicBool::new(false),
                write_lock: Mutex::new(()),
                writes: AtomicU64::new(0),
            }),
            quiet_period,
            timers: Mutex::new(HashMap::new()),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Mark `kind` dirty and (re)start its quiet-period timer.
    /// While degraded the store is only marked dirty.
    pub fn schedule(&self, kind: StoreKind) {
        self.shared.pending.lock().insert(kind);
        if self.is_degraded() {
            return;
        }

        let Some(runtime) = &self.runtime else {
            self.shared.pending.lock().remove(&kind);
            self.shared.write(kind);
            return;
        };

        let shared = Arc::clone(&self.shared);
        let quiet = self.quiet_period;
        let mut timers = self.timers.lock();
        if let Some(previous) = timers.remove(&kind) {
            previous.abort();
        }
        let handle = runtime.spawn(async move {
            tokio::time::sleep(quiet).await;
            // No await past this point: an abort cannot cut a write in half
            if shared.pending.lock().remove(&kind) {
                shared.write(kind);
            }
        });
        timers.insert(kind, handle);
    }

    /// Write every pending store now, cancelling outstanding timers
    pub fn flush_now(&self) {
        if self.is_degraded() {
            let pending = self.shared.pending.lock().len();
            warn!(pending, "Persistence degraded, skipping flush");
            return;
        }
        for (_, timer) in self.timers.lock().drain() {
            timer.abort();
        }
        let drained: Vec<StoreKind> = self.shared.pending.lock().drain().collect();
        for kind in StoreKind::ALL {
            if drained.contains(&kind) {
                self.shared.write(kind);
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.shared.degraded.load(Ordering::SeqCst)
    }

    /// Leave degraded mode; pending stores are written on the next flush
    pub fn reset_degraded(&self) {
        self.shared.degraded.store(false, Ordering::SeqCst);
    }

    pub fn pending(&self) -> Vec<StoreKind> {
        let pending = self.shared.pending.lock();
        StoreKind::ALL
            .into_iter()
            .filter(|k| pending.contains(k))
            .collect()
    }

    /// Successful writes since construction
    pub fn write_count(&self) -> u64 {
        self.shared.writes.load(Ordering::Relaxed)
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingTarget {
        writes: Mutex<Vec<StoreKind>>,
        fail: AtomicBool,
    }

    impl FlushTarget for CountingTarget {
        fn write_store(&self, kind: StoreKind) -> Result<(), StorageError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            self.writes.lock().push(kind);
            Ok(())
        }
    }

    fn scheduler(target: &Arc<CountingTarget>) -> FlushScheduler {
        let dyn_target: Arc<dyn FlushTarget> = target.clone();
        FlushScheduler::new(dyn_target, Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_write() {
        let target = Arc::new(CountingTarget::default());
        let scheduler = scheduler(&target);

        for _ in 0..5 {
            scheduler.schedule(StoreKind::Graph);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(target.writes.lock().is_empty(), "still inside quiet period");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*target.writes.lock(), vec![StoreKind::Graph]);
        assert!(scheduler.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stores_flush_independently() {
        let target = Arc::new(CountingTarget::default());
        let scheduler = scheduler(&target);

        scheduler.schedule(StoreKind::State);
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.schedule(StoreKind::Graph);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*target.writes.lock(), vec![StoreKind::State]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*target.writes.lock(), vec![StoreKind::State, StoreKind::Graph]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_now_writes_pending_and_cancels_timers() {
        let target = Arc::new(CountingTarget::default());
        let scheduler = scheduler(&target);

        scheduler.schedule(StoreKind::Delegations);
        scheduler.schedule(StoreKind::Tasks);
        scheduler.flush_now();
        assert_eq!(target.writes.lock().len(), 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(target.writes.lock().len(), 2, "timers must not write again");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_enters_degraded_mode() {
        let target = Arc::new(CountingTarget::default());
        target.fail.store(true, Ordering::SeqCst);
        let scheduler = scheduler(&target);

        scheduler.schedule(StoreKind::Graph);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.is_degraded());
        assert_eq!(scheduler.pending(), vec![StoreKind::Graph]);

        target.fail.store(false, Ordering::SeqCst);
        scheduler.schedule(StoreKind::State);
        scheduler.flush_now();
        assert!(target.writes.lock().is_empty(), "degraded mode suppresses writes");

        assert_eq!(scheduler.pending(), vec![StoreKind::State, StoreKind::Graph]);

        scheduler.reset_degraded();
        scheduler.flush_now();
        assert_eq!(*target.writes.lock(), vec![StoreKind::State, StoreKind::Graph]);
        assert!(!scheduler.is_degraded());
        assert!(scheduler.pending().is_empty());
    }

    #[test]
    fn test_stores_dirtied_while_degraded_flush_after_reset() {
        let target = Arc::new(CountingTarget::default());
        target.fail.store(true, Ordering::SeqCst);
        let scheduler = scheduler(&target);

        scheduler.schedule(StoreKind::Graph);
        assert!(scheduler.is_degraded());
        target.fail.store(false, Ordering::SeqCst);
        scheduler.schedule(StoreKind::Delegations);
        scheduler.schedule(StoreKind::State);
        assert!(target.writes.lock().is_empty());

        scheduler.reset_degraded();
        scheduler.flush_now();
        assert_eq!(
            *target.writes.lock(),
            vec![StoreKind::State, StoreKind::Delegations, StoreKind::Graph]
        );
    }

    #[test]
    fn test_without_runtime_writes_immediately() {
        let target = Arc::new(CountingTarget::default());
        let scheduler = scheduler(&target);
        scheduler.schedule(StoreKind::State);
        assert_eq!(*target.writes.lock(), vec![StoreKind::State]);
        assert_eq!(scheduler.write_count(), 1);
    }
}
