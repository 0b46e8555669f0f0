//! Two-level priority scheduling and cooperative cancellation.
//!
//! - [`Executor`]: where jobs run. [`ThreadPools`] owns a small latency-sensitive
//!   rayon pool and a larger best-effort one; [`ManualExecutor`] queues jobs until
//!   the owner drains them, for deterministic hosts and tests.
//! - [`TaskQueues`]: one per pathfinder. A bounded high queue and an unbounded low
//!   queue, drained by [`TaskQueues::run_item`], which hands at most one job per
//!   priority to the executor and runs again when that job finishes. Jobs pull
//!   work; nothing floods the pools.
//! - [`RunCounter`] / [`RunToken`]: every job captures the token live when it was
//!   queued and checks it before doing expensive work; a bumped counter turns every
//!   older job into a no-op.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, warn};

use crate::error::{NavError, Result};
use crate::settings::NavSettings;

/// A deferred action.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Direct path and rotation tests.
    High,
    /// Alternate path search; may starve under load.
    Low,
}

/// Runs jobs somewhere, eventually.
pub trait Executor: Send + Sync {
    fn spawn(&self, priority: Priority, job: Job);
}

/// Two rayon pools, one per priority.
pub struct ThreadPools {
    high: rayon::ThreadPool,
    low: rayon::ThreadPool,
}

impl ThreadPools {
    pub fn new(settings: &NavSettings) -> Result<Self> {
        let high = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.high_threads)
            .thread_name(|i| format!("nav-high-{i}"))
            .build()?;
        let low = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.low_threads)
            .thread_name(|i| format!("nav-low-{i}"))
            .build()?;
        Ok(Self { high, low })
    }
}

impl Executor for ThreadPools {
    fn spawn(&self, priority: Priority, job: Job) {
        match priority {
            Priority::High => self.high.spawn(job),
            Priority::Low => self.low.spawn(job),
        }
    }
}

/// Queues jobs until [`ManualExecutor::run_until_idle`] is called. High-priority
/// jobs always run before low-priority ones.
#[derive(Default)]
pub struct ManualExecutor {
    high: Mutex<VecDeque<Job>>,
    low: Mutex<VecDeque<Job>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.high.lock().unwrap_or_else(PoisonError::into_inner).len()
            + self.low.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run one job. Returns false if nothing was queued.
    pub fn run_next(&self) -> bool {
        let job = {
            let high = self.high.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            match high {
                Some(job) => Some(job),
                None => self.low.lock().unwrap_or_else(PoisonError::into_inner).pop_front(),
            }
        };
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run jobs, including the ones they spawn, until none are left or `limit`
    /// jobs have run. Returns the number run.
    pub fn run_until_idle(&self, limit: usize) -> usize {
        let mut ran = 0;
        while ran < limit && self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Executor for ManualExecutor {
    fn spawn(&self, priority: Priority, job: Job) {
        let queue = match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        };
        queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(job);
    }
}

#[derive(Default)]
struct QueueState {
    high: VecDeque<Job>,
    low: VecDeque<Job>,
    high_running: bool,
    low_running: bool,
}

/// Per-pathfinder pull-based queues.
pub struct TaskQueues {
    executor: Arc<dyn Executor>,
    high_capacity: usize,
    state: Mutex<QueueState>,
}

impl TaskQueues {
    pub fn new(executor: Arc<dyn Executor>, high_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            executor,
            high_capacity,
            state: Mutex::new(QueueState::default()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a job. The high queue is bounded; a job that does not fit is dropped
    /// and [`NavError::QueueFull`] returned.
    pub fn push(&self, priority: Priority, job: Job) -> Result<()> {
        let mut state = self.lock();
        match priority {
            Priority::High => {
                if state.high.len() >= self.high_capacity {
                    return Err(NavError::QueueFull);
                }
                state.high.push_back(job);
            }
            Priority::Low => state.low.push_back(job),
        }
        Ok(())
    }

    /// Drop every queued job. Running jobs finish; their tokens make them no-ops.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.high.clear();
        state.low.clear();
    }

    /// `(high, low)` queued job counts.
    pub fn pending(&self) -> (usize, usize) {
        let state = self.lock();
        (state.high.len(), state.low.len())
    }

    /// Nothing queued and nothing running.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.high.is_empty() && state.low.is_empty() && !state.high_running && !state.low_running
    }

    /// Hand at most one job per priority to the executor.
    pub fn run_item(self: &Arc<Self>) {
        let (high, low) = {
            let mut state = self.lock();
            let high = if state.high_running {
                None
            } else {
                state.high.pop_front()
            };
            state.high_running |= high.is_some();
            let low = if state.low_running {
                None
            } else {
                state.low.pop_front()
            };
            state.low_running |= low.is_some();
            (high, low)
        };

        if let Some(job) = high {
            self.dispatch(Priority::High, job);
        }
        if let Some(job) = low {
            self.dispatch(Priority::Low, job);
        }
    }

    fn dispatch(self: &Arc<Self>, priority: Priority, job: Job) {
        let queues = Arc::clone(self);
        self.executor.spawn(
            priority,
            Box::new(move || {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                    error!(
                        "{priority:?} navigation task panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
                {
                    let mut state = queues.lock();
                    match priority {
                        Priority::High => state.high_running = false,
                        Priority::Low => state.low_running = false,
                    }
                }
                queues.run_item();
            }),
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// The live run identifier of one state machine.
#[derive(Debug, Default)]
pub struct RunCounter {
    live: Arc<AtomicU64>,
}

impl RunCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new run, invalidating every token handed out before.
    pub fn begin(&self) -> RunToken {
        let id = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("run {id} started");
        RunToken {
            id,
            live: Arc::clone(&self.live),
        }
    }

    /// A token for the run in progress.
    pub fn current(&self) -> RunToken {
        RunToken {
            id: self.live.load(Ordering::Acquire),
            live: Arc::clone(&self.live),
        }
    }

    pub fn id(&self) -> u64 {
        self.live.load(Ordering::Acquire)
    }
}

/// Captured by queued work; compared against the live run id before acting.
#[derive(Clone, Debug)]
pub struct RunToken {
    id: u64,
    live: Arc<AtomicU64>,
}

impl RunToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.live.load(Ordering::Acquire) == self.id
    }
}

impl PartialEq for RunToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.live, &other.live)
    }
}

/// Log a dropped job; the queue is bounded on purpose.
pub(crate) fn log_push(result: Result<()>, what: &str) {
    if let Err(e) = result {
        warn!("{what} dropped: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_job(count: &Arc<AtomicUsize>) -> Job {
        let count = Arc::clone(count);
        Box::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn run_item_hands_out_one_job_per_priority() {
        let exec = Arc::new(ManualExecutor::new());
        let queues = TaskQueues::new(exec.clone(), 8);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            queues.push(Priority::High, counter_job(&count)).unwrap();
            queues.push(Priority::Low, counter_job(&count)).unwrap();
        }

        queues.run_item();
        assert_eq!(exec.pending(), 2);
        assert_eq!(queues.pending(), (2, 2));

        // Each finished job pulls the next one of its priority.
        assert_eq!(exec.run_until_idle(100), 6);
        assert_eq!(count.load(Ordering::SeqCst), 6);
        assert!(queues.is_idle());
    }

    #[test]
    fn high_queue_is_bounded() {
        let exec = Arc::new(ManualExecutor::new());
        let queues = TaskQueues::new(exec, 2);
        assert!(queues.push(Priority::High, Box::new(|| {})).is_ok());
        assert!(queues.push(Priority::High, Box::new(|| {})).is_ok());
        assert!(matches!(
            queues.push(Priority::High, Box::new(|| {})),
            Err(NavError::QueueFull)
        ));
        assert!(queues.push(Priority::Low, Box::new(|| {})).is_ok());
    }

    #[test]
    fn panicking_job_does_not_stall_the_queue() {
        let exec = Arc::new(ManualExecutor::new());
        let queues = TaskQueues::new(exec.clone(), 8);
        let count = Arc::new(AtomicUsize::new(0));
        queues
            .push(Priority::Low, Box::new(|| panic!("search branch failed")))
            .unwrap();
        queues.push(Priority::Low, counter_job(&count)).unwrap();
        queues.run_item();
        exec.run_until_idle(10);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(queues.is_idle());
    }

    #[test]
    fn clear_drops_queued_jobs() {
        let exec = Arc::new(ManualExecutor::new());
        let queues = TaskQueues::new(exec.clone(), 8);
        let count = Arc::new(AtomicUsize::new(0));
        queues.push(Priority::Low, counter_job(&count)).unwrap();
        queues.clear();
        queues.run_item();
        exec.run_until_idle(10);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tokens_expire_when_a_new_run_begins() {
        let runs = RunCounter::new();
        let first = runs.begin();
        assert!(first.is_current());
        assert_eq!(runs.current(), first);
        let second = runs.begin();
        assert!(!first.is_current());
        assert!(second.is_current());
        assert_eq!(second.id(), first.id() + 1);
    }

    #[test]
    fn thread_pools_run_jobs() {
        let pools = ThreadPools::new(&NavSettings::default()).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(2);
        let tx2 = tx.clone();
        pools.spawn(Priority::High, Box::new(move || tx.send(1).unwrap()));
        pools.spawn(Priority::Low, Box::new(move || tx2.send(2).unwrap()));
        let mut got = vec![rx.recv().unwrap(), rx.recv().unwrap()];
        got.sort_unstable();
        assert_eq!(got, vec![1, 2]);
    }
}
