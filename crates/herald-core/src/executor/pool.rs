use std::{
    any::Any,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use super::sizer::PoolSettings;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool no longer accepts work, or the previous pool is still
    /// draining. Retry later: a fresh pool is built on the next `acquire`.
    #[error("worker pool is shut down")]
    ShutDown,

    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// The task was dropped without running (its worker was detached while
    /// the pool drained).
    #[error("task was abandoned before completion")]
    Abandoned,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

struct Worker {
    index: usize,
    handle: thread::JoinHandle<()>,
}

/// Counts a worker thread as live until the thread exits.
struct LiveThread(Arc<AtomicUsize>);

impl LiveThread {
    fn enter(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live.clone())
    }
}

impl Drop for LiveThread {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed-size pool of OS threads pulling boxed jobs from a shared queue.
///
/// The number of live threads is fixed at construction and never grows.
/// A panicking job is caught at the job boundary, so workers outlive failing
/// tasks.
pub struct WorkerPool {
    worker_count: usize,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<Worker>>,
    finished: Receiver<usize>,
    shut_down: AtomicBool,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Result<Self, PoolError> {
        Self::with_live_counter(worker_count, Arc::new(AtomicUsize::new(0)))
    }

    /// Like [`new`](Self::new), counting every thread in `live` until it exits.
    ///
    /// A detached worker keeps its count after the pool is gone.
    pub fn with_live_counter(
        worker_count: usize,
        live: Arc<AtomicUsize>,
    ) -> Result<Self, PoolError> {
        let worker_count = worker_count.max(1);
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<usize>();

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let alive = LiveThread::enter(&live);
            let handle = thread::Builder::new()
                .name(format!("herald-worker-{index}"))
                .spawn(move || {
                    let _alive = alive;
                    while let Ok(job) = jobs.recv() {
                        job();
                    }
                    let _ = done.send(index);
                })
                .map_err(|e| PoolError::Spawn(e.to_string()))?;
            workers.push(Worker { index, handle });
        }

        Ok(Self {
            worker_count,
            sender: Mutex::new(Some(job_tx)),
            workers: Mutex::new(workers),
            finished: done_rx,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Queue `task` for a worker thread.
    ///
    /// Only the enqueue happens on the caller's thread. The returned handle
    /// resolves with the task's value, or with [`PoolError::TaskPanicked`].
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task))
                .map_err(|payload| PoolError::TaskPanicked(panic_message(payload.as_ref())));
            let _ = tx.send(outcome);
        });

        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(PoolError::ShutDown);
        };
        sender.send(job).map_err(|_| PoolError::ShutDown)?;

        Ok(TaskHandle { rx })
    }

    /// Stop accepting work and wait for queued and running jobs.
    ///
    /// Waits at most `drain_timeout`; workers still busy after that are
    /// detached. Returns `false` if the pool was already shut down.
    pub fn shutdown(&self, drain_timeout: Duration) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        // Closing the queue lets workers finish what is queued, then exit.
        drop(self.sender.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        let deadline = Instant::now() + drain_timeout;
        let mut finished = Vec::with_capacity(workers.len());
        while finished.len() < workers.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.finished.recv_timeout(remaining) {
                Ok(index) => finished.push(index),
                Err(_) => break,
            }
        }

        let mut detached = 0usize;
        for worker in workers {
            if finished.contains(&worker.index) {
                if worker.handle.join().is_err() {
                    tracing::warn!(worker = worker.index, "worker thread exited with a panic");
                }
            } else {
                detached += 1;
            }
        }

        if detached > 0 {
            tracing::warn!(
                detached,
                timeout_ms = drain_timeout.as_millis() as u64,
                "worker pool drain timed out; detaching busy workers"
            );
        } else {
            tracing::info!(workers = self.worker_count, "worker pool shut down");
        }

        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers exit on their own once the queue is closed and drained.
        self.sender.get_mut().take();
    }
}

/// Completion handle of a submitted task.
#[must_use = "a task handle does nothing unless awaited"]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, PoolError>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(outcome) => outcome,
            Err(_) => Err(PoolError::Abandoned),
        })
    }
}

/// Owner of the process-wide pool.
///
/// The pool is built on the first [`acquire`](Self::acquire) and released by
/// [`shutdown`](Self::shutdown); a later `acquire` builds a fresh one.
///
/// Every worker thread the registry ever started is counted until it exits,
/// so the live thread count never exceeds `settings.workers`: a pool built
/// while detached workers of an old pool are still running only gets the
/// remaining threads, and `acquire` fails with [`PoolError::ShutDown`] while
/// none remain or while a shutdown is draining.
///
/// The lock is only held to swap the slot, never for the drain, so callers on
/// the async runtime do not stall behind a shutdown.
pub struct PoolRegistry {
    settings: PoolSettings,
    slot: RwLock<Option<Arc<WorkerPool>>>,
    live: Arc<AtomicUsize>,
    draining: AtomicBool,
}

impl PoolRegistry {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            slot: RwLock::new(None),
            live: Arc::new(AtomicUsize::new(0)),
            draining: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }

    /// Worker threads still running, detached ones included.
    pub fn live_threads(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn acquire(&self) -> Result<Arc<WorkerPool>, PoolError> {
        if let Some(pool) = self.slot.read().as_ref() {
            return Ok(pool.clone());
        }

        let mut slot = self.slot.write();
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }
        if self.draining.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown);
        }

        let still_alive = self.live_threads();
        let workers = self.settings.workers.saturating_sub(still_alive);
        if workers == 0 {
            tracing::warn!(still_alive, "detached workers still running; pool not rebuilt");
            return Err(PoolError::ShutDown);
        }

        let pool = Arc::new(WorkerPool::with_live_counter(workers, self.live.clone())?);
        if still_alive > 0 {
            tracing::warn!(
                workers,
                still_alive,
                "worker pool started below its size while detached workers finish"
            );
        } else {
            tracing::info!(workers, "worker pool started");
        }
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// The live pool, without building one.
    pub fn current(&self) -> Option<Arc<WorkerPool>> {
        self.slot.read().clone()
    }

    /// Submit to the live pool, building it if needed.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.acquire()?.submit(task)
    }

    /// Shut the live pool down and release it. Idempotent.
    ///
    /// Blocks for up to the drain timeout; call it off the async runtime.
    pub fn shutdown(&self) -> bool {
        let pool = {
            let mut slot = self.slot.write();
            let Some(pool) = slot.take() else {
                return false;
            };
            self.draining.store(true, Ordering::SeqCst);
            pool
        };

        let stopped = pool.shutdown(self.settings.drain_timeout);
        self.draining.store(false, Ordering::SeqCst);
        stopped
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn registry(workers: usize) -> PoolRegistry {
        PoolRegistry::new(PoolSettings::new(workers, Duration::from_secs(5)))
    }

    #[test]
    fn acquire_returns_the_same_pool() {
        let reg = registry(2);
        let a = reg.acquire().unwrap();
        let b = reg.acquire().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.worker_count(), 2);
        reg.shutdown();
    }

    #[test]
    fn concurrent_first_acquire_builds_one_pool() {
        let reg = Arc::new(registry(1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                thread::spawn(move || reg.acquire().unwrap())
            })
            .collect();
        let pools: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for p in &pools[1..] {
            assert!(Arc::ptr_eq(&pools[0], p));
        }
        reg.shutdown();
    }

    #[test]
    fn double_shutdown_is_a_noop() {
        let reg = registry(2);
        let first = reg.acquire().unwrap();
        assert!(reg.shutdown());
        assert!(!reg.shutdown());
        assert!(first.is_shut_down());
        assert!(reg.current().is_none());

        let second = reg.acquire().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &reg.acquire().unwrap()));
        reg.shutdown();
    }

    #[test]
    fn shutdown_without_a_pool_is_a_noop() {
        let reg = registry(2);
        assert!(!reg.shutdown());
        assert!(reg.current().is_none());
    }

    #[test]
    fn submit_after_shutdown_fails_fast() {
        let reg = registry(1);
        let pool = reg.acquire().unwrap();
        reg.shutdown();
        assert_eq!(pool.submit(|| 1).err(), Some(PoolError::ShutDown));
    }

    #[tokio::test]
    async fn tasks_resolve_with_their_values() {
        let reg = registry(3);
        let handles: Vec<_> = (0..10u64)
            .map(|i| reg.submit(move || i * i).unwrap())
            .collect();
        let mut values = Vec::new();
        for h in handles {
            values.push(h.await.unwrap());
        }
        assert_eq!(values, (0..10u64).map(|i| i * i).collect::<Vec<_>>());
        reg.shutdown();
    }

    #[tokio::test]
    async fn panicking_task_does_not_kill_the_worker() {
        let reg = registry(1);
        let bad = reg.submit(|| -> u32 { panic!("boom") }).unwrap();
        match bad.await {
            Err(PoolError::TaskPanicked(msg)) => assert!(msg.contains("boom")),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let good = reg.submit(|| 7u32).unwrap();
        assert_eq!(good.await.unwrap(), 7);
        reg.shutdown();
    }

    #[test]
    fn running_tasks_never_exceed_worker_count() {
        let reg = registry(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                reg.submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();

        assert!(reg.shutdown());
        drop(handles);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn shutdown_drains_queued_tasks() {
        let reg = registry(1);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = done.clone();
            let _ = reg
                .submit(move || {
                    thread::sleep(Duration::from_millis(10));
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert!(reg.shutdown());
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !cond() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[tokio::test]
    async fn detached_workers_count_against_the_cap() {
        let reg = PoolRegistry::new(PoolSettings::new(1, Duration::from_millis(50)));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let busy = |running: Arc<AtomicUsize>, peak: Arc<AtomicUsize>, ms: u64| {
            move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(ms));
                running.fetch_sub(1, Ordering::SeqCst);
            }
        };

        let slow = reg.submit(busy(running.clone(), peak.clone(), 600)).unwrap();
        wait_for(|| running.load(Ordering::SeqCst) == 1);
        assert!(reg.shutdown());
        assert_eq!(reg.live_threads(), 1);

        // The only thread slot is taken by the detached worker.
        assert_eq!(reg.acquire().err(), Some(PoolError::ShutDown));
        assert!(reg.current().is_none());

        slow.await.unwrap();
        wait_for(|| reg.live_threads() == 0);
        let fresh = reg.submit(busy(running.clone(), peak.clone(), 10)).unwrap();
        fresh.await.unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(reg.live_threads() <= 1);
        reg.shutdown();
    }

    #[test]
    fn rebuilt_pool_gets_the_remaining_threads() {
        let reg = PoolRegistry::new(PoolSettings::new(3, Duration::from_millis(50)));
        let started = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        let _slow = reg
            .submit(move || {
                s.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(600));
            })
            .unwrap();
        wait_for(|| started.load(Ordering::SeqCst) == 1);

        assert!(reg.shutdown());
        assert_eq!(reg.live_threads(), 1);

        let second = reg.acquire().unwrap();
        assert_eq!(second.worker_count(), 2);
        assert_eq!(reg.live_threads(), 3);

        reg.shutdown();
        wait_for(|| reg.live_threads() == 0);
        assert_eq!(reg.acquire().unwrap().worker_count(), 3);
        reg.shutdown();
    }

    #[test]
    fn acquire_fails_fast_while_draining() {
        let reg = Arc::new(PoolRegistry::new(PoolSettings::new(
            2,
            Duration::from_millis(800),
        )));
        let started = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        let _slow = reg
            .submit(move || {
                s.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(400));
            })
            .unwrap();
        wait_for(|| started.load(Ordering::SeqCst) == 1);

        let closer = {
            let reg = reg.clone();
            thread::spawn(move || reg.shutdown())
        };
        thread::sleep(Duration::from_millis(50));

        let asked = Instant::now();
        assert_eq!(reg.submit(|| ()).err(), Some(PoolError::ShutDown));
        assert!(asked.elapsed() < Duration::from_millis(200));

        assert!(closer.join().unwrap());
        assert!(reg.acquire().is_ok());
        reg.shutdown();
    }

    #[test]
    fn drain_is_bounded_by_the_timeout() {
        let pool = WorkerPool::new(1).unwrap();
        let _ = pool
            .submit(|| thread::sleep(Duration::from_secs(2)))
            .unwrap();
        // Give the worker time to pick the job up.
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        assert!(pool.shutdown(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
