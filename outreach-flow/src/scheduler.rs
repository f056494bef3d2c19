//! Dynamic-priority task scheduler with a fixed worker pool
//!
//! Tasks carry a numeric priority (lower value = served first) and an
//! enqueue time. A periodic aging pass improves the effective priority of
//! tasks proportionally to how long they have waited, so low-priority work
//! cannot starve behind a steady stream of fresh high-priority tasks.
//!
//! Idle workers block on a [`Notify`] raced against a shutdown signal, so an
//! empty queue consumes no CPU and `pause` interrupts the wait immediately.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use outreach_flow_sdk::PathId;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// The unit of work carried by a [`Task`].
pub type TaskAction = BoxFuture<'static, anyhow::Result<()>>;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of concurrent worker loops.
    pub num_workers: usize,
    /// Seconds of queue age needed to improve a pending task's priority by one.
    pub priority_decay: u64,
    /// How often the aging pass re-ranks the pending queue.
    pub reorder_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: 3,
            priority_decay: 5,
            reorder_interval: Duration::from_secs(5),
        }
    }
}

/// An immutable unit of work: identity, priority, enqueue time and a boxed
/// asynchronous action that captures everything it needs.
///
/// The scheduler never inspects the action. Only `priority` changes after
/// creation, and only during the aging pass.
pub struct Task {
    id: PathId,
    priority: i64,
    base_priority: i64,
    enqueued_at: Instant,
    action: TaskAction,
}

impl Task {
    pub fn new(id: PathId, priority: i64, action: TaskAction) -> Self {
        Self {
            id,
            priority,
            base_priority: priority,
            enqueued_at: Instant::now(),
            action,
        }
    }

    pub fn id(&self) -> PathId {
        self.id
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    /// Execute the action to completion. Performs no queue manipulation.
    pub async fn run(self) -> anyhow::Result<()> {
        debug!(task = self.id, priority = self.priority, "processing task");
        (self.action).await?;
        debug!(task = self.id, "task completed");
        Ok(())
    }
}

/// Pending set, kept sorted ascending by `(priority, enqueued_at)`.
#[derive(Default)]
struct TaskQueue {
    tasks: Vec<Task>,
    duplicates: usize,
}

impl TaskQueue {
    fn insert(&mut self, task: Task) {
        if self.tasks.iter().any(|t| t.id == task.id) {
            // The executor enqueues only at transition points, so a duplicate
            // id here means a caller broke the one-task-per-path invariant.
            warn!(task = task.id, "task with this id is already pending");
            self.duplicates += 1;
        }
        self.tasks.push(task);
        self.resort();
    }

    fn take_next(&mut self) -> Option<Task> {
        if self.tasks.is_empty() {
            None
        } else {
            Some(self.tasks.remove(0))
        }
    }

    /// Aging pass: recompute every pending task's priority from its immutable
    /// base and total queue age, then re-rank. Recomputing (rather than
    /// repeatedly subtracting) keeps the pass idempotent for a given age:
    /// after N passes at interval `i`, priority is exactly
    /// `base - floor(N * i_secs / decay)`.
    fn reorder(&mut self, priority_decay: u64, now: Instant) {
        let decay = priority_decay.max(1);
        for task in &mut self.tasks {
            let age_secs = now.saturating_duration_since(task.enqueued_at).as_secs();
            task.priority = task.base_priority - (age_secs / decay) as i64;
        }
        self.resort();
    }

    fn resort(&mut self) {
        self.tasks.sort_by_key(|t| (t.priority, t.enqueued_at));
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    queue: Mutex<TaskQueue>,
    work_available: Notify,
    running: AtomicBool,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Owns the pending queue and the worker pool. One scheduler per active flow.
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                queue: Mutex::new(TaskQueue::default()),
                work_available: Notify::new(),
                running: AtomicBool::new(false),
                shutdown_tx: Mutex::new(None),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    /// Number of enqueues that found the same task id already pending. Stays
    /// zero as long as callers enqueue at most one task per id at a time.
    pub fn duplicate_count(&self) -> usize {
        self.inner.queue.lock().unwrap().duplicates
    }

    /// Insert a task into the pending set and wake an idle worker.
    ///
    /// The caller is responsible for not enqueueing a task whose id is
    /// already pending or in flight.
    pub fn enqueue(&self, task: Task) {
        self.inner.queue.lock().unwrap().insert(task);
        self.inner.work_available.notify_one();
    }

    /// Launch the worker loops and the aging timer. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("scheduler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.inner.shutdown_tx.lock().unwrap() = Some(shutdown_tx);

        let mut handles = Vec::with_capacity(self.inner.config.num_workers + 1);
        handles.push(tokio::spawn(aging_loop(
            Arc::clone(&self.inner),
            shutdown_rx.clone(),
        )));
        for worker_id in 0..self.inner.config.num_workers {
            handles.push(tokio::spawn(worker_loop(
                Arc::clone(&self.inner),
                shutdown_rx.clone(),
                worker_id,
            )));
        }
        *self.inner.handles.lock().unwrap() = handles;

        info!(workers = self.inner.config.num_workers, "scheduler started");
    }

    /// Stop workers from pulling new tasks and wait for in-flight tasks to
    /// finish. Pending tasks stay queued for a later `start`. Idempotent.
    ///
    /// The running flag is flipped under the queue lock; workers consult it
    /// under the same lock before dequeuing, so no task can be taken once the
    /// flip is done.
    pub async fn pause(&self) {
        let was_running = {
            let _queue = self.inner.queue.lock().unwrap();
            self.inner.running.swap(false, Ordering::SeqCst)
        };
        if !was_running {
            debug!("scheduler is not running, nothing to pause");
            return;
        }

        if let Some(tx) = self.inner.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(true);
        }
        self.inner.work_available.notify_waiters();

        let handles = mem::take(&mut *self.inner.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }

        info!("scheduler paused");
    }

    /// Permanent teardown; an alias for [`TaskScheduler::pause`].
    pub async fn shutdown(&self) {
        self.pause().await;
        info!("scheduler shut down");
    }
}

impl Clone for TaskScheduler {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Worker loop: take the lowest-priority-value pending task, run it behind a
/// failure boundary, repeat. A failing action is logged and never terminates
/// the loop, so one bad task cannot reduce pool capacity.
async fn worker_loop(
    inner: Arc<SchedulerInner>,
    mut shutdown_rx: watch::Receiver<bool>,
    worker_id: usize,
) {
    loop {
        let task = {
            let mut queue = inner.queue.lock().unwrap();
            // Checked under the queue lock: pause flips the flag under the
            // same lock, so a worker can never dequeue after pause began.
            if !inner.running.load(Ordering::SeqCst) {
                break;
            }
            queue.take_next()
        };
        match task {
            Some(task) => {
                let task_id = task.id();
                if let Err(err) = task.run().await {
                    error!(
                        worker = worker_id,
                        task = task_id,
                        error = %err,
                        "task failed; worker continuing"
                    );
                }
            }
            None => {
                tokio::select! {
                    _ = inner.work_available.notified() => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
        }
    }
    debug!(worker = worker_id, "worker stopped");
}

/// Periodic anti-starvation pass over the pending queue. A single timer, so
/// passes never overlap.
async fn aging_loop(inner: Arc<SchedulerInner>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(inner.config.reorder_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                inner
                    .queue
                    .lock()
                    .unwrap()
                    .reorder(inner.config.priority_decay, now);
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{advance, sleep, timeout};

    fn noop_action() -> TaskAction {
        Box::pin(async { Ok(()) })
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not met within timeout");
    }

    fn one_worker_config() -> SchedulerConfig {
        SchedulerConfig {
            num_workers: 1,
            ..SchedulerConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn aging_recomputes_priority_from_base() {
        let mut queue = TaskQueue::default();
        queue.insert(Task::new(1, 5, noop_action()));

        advance(Duration::from_secs(5)).await;
        queue.reorder(5, Instant::now());
        assert_eq!(queue.tasks[0].priority, 4);

        // Repeated pass at the same age must not subtract again.
        queue.reorder(5, Instant::now());
        assert_eq!(queue.tasks[0].priority, 4);

        advance(Duration::from_secs(5)).await;
        queue.reorder(5, Instant::now());
        assert_eq!(queue.tasks[0].priority, 3);

        // After N passes at interval i: base - floor(N * i / d).
        advance(Duration::from_secs(15)).await;
        queue.reorder(5, Instant::now());
        assert_eq!(queue.tasks[0].priority, 5 - (25 / 5));
    }

    #[tokio::test(start_paused = true)]
    async fn queue_stays_sorted_after_aging() {
        let mut queue = TaskQueue::default();
        queue.insert(Task::new(1, 5, noop_action()));
        advance(Duration::from_secs(30)).await;
        // Task 1 is now 30s old; a fresh task at priority 2 would normally
        // beat base priority 5.
        queue.insert(Task::new(2, 2, noop_action()));
        queue.reorder(5, Instant::now());

        let ranked: Vec<_> = queue.tasks.iter().map(|t| (t.id, t.priority)).collect();
        assert_eq!(ranked, vec![(1, -1), (2, 2)]);
        for pair in queue.tasks.windows(2) {
            assert!(
                (pair[0].priority, pair[0].enqueued_at)
                    <= (pair[1].priority, pair[1].enqueued_at)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ties_break_by_earliest_enqueue_time() {
        let mut queue = TaskQueue::default();
        queue.insert(Task::new(1, 3, noop_action()));
        advance(Duration::from_millis(10)).await;
        queue.insert(Task::new(2, 3, noop_action()));

        assert_eq!(queue.take_next().unwrap().id(), 1);
        assert_eq!(queue.take_next().unwrap().id(), 2);
    }

    #[tokio::test]
    async fn single_worker_processes_in_priority_order() {
        let scheduler = TaskScheduler::new(one_worker_config());
        let order = Arc::new(Mutex::new(Vec::new()));

        for (id, priority) in [(1, 5), (2, 1), (3, 3)] {
            let order = Arc::clone(&order);
            scheduler.enqueue(Task::new(
                id,
                priority,
                Box::pin(async move {
                    order.lock().unwrap().push(id);
                    Ok(())
                }),
            ));
        }

        scheduler.start();
        wait_for(|| order.lock().unwrap().len() == 3).await;
        scheduler.pause().await;

        assert_eq!(*order.lock().unwrap(), vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn failing_task_does_not_kill_the_worker() {
        let scheduler = TaskScheduler::new(one_worker_config());
        let completed = Arc::new(AtomicBool::new(false));

        scheduler.enqueue(Task::new(
            1,
            1,
            Box::pin(async { Err(anyhow::anyhow!("stage blew up")) }),
        ));
        let flag = Arc::clone(&completed);
        scheduler.enqueue(Task::new(
            2,
            2,
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        ));

        scheduler.start();
        wait_for(|| completed.load(Ordering::SeqCst)).await;
        scheduler.pause().await;
    }

    #[tokio::test]
    async fn pause_drains_in_flight_and_stops_dequeuing() {
        let scheduler = TaskScheduler::new(one_worker_config());
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let second_ran = Arc::new(AtomicBool::new(false));

        let started_flag = Arc::clone(&started);
        let finished_flag = Arc::clone(&finished);
        scheduler.enqueue(Task::new(
            1,
            1,
            Box::pin(async move {
                started_flag.store(true, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                finished_flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        ));
        let second_flag = Arc::clone(&second_ran);
        scheduler.enqueue(Task::new(
            2,
            2,
            Box::pin(async move {
                second_flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        ));

        scheduler.start();
        wait_for(|| started.load(Ordering::SeqCst)).await;
        scheduler.pause().await;

        // The in-flight task ran to completion; the queued one was not taken.
        assert!(finished.load(Ordering::SeqCst));
        assert!(!second_ran.load(Ordering::SeqCst));
        assert_eq!(scheduler.pending_count(), 1);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn no_task_is_dequeued_after_pause_returns() {
        let scheduler = TaskScheduler::new(one_worker_config());
        let completed = Arc::new(AtomicUsize::new(0));

        for id in 1..=20 {
            let completed = Arc::clone(&completed);
            scheduler.enqueue(Task::new(
                id,
                1,
                Box::pin(async move {
                    sleep(Duration::from_millis(1)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            ));
        }

        scheduler.start();
        wait_for(|| completed.load(Ordering::SeqCst) >= 1).await;
        scheduler.pause().await;

        // Every dequeued task ran to completion; the rest are still queued.
        let done = completed.load(Ordering::SeqCst);
        assert_eq!(done + scheduler.pending_count(), 20);

        // Nothing keeps running once pause has returned.
        sleep(Duration::from_millis(30)).await;
        assert_eq!(completed.load(Ordering::SeqCst), done);
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_counted() {
        let scheduler = TaskScheduler::new(one_worker_config());
        scheduler.enqueue(Task::new(1, 1, noop_action()));
        scheduler.enqueue(Task::new(2, 1, noop_action()));
        assert_eq!(scheduler.duplicate_count(), 0);

        scheduler.enqueue(Task::new(1, 1, noop_action()));
        assert_eq!(scheduler.duplicate_count(), 1);
    }

    #[tokio::test]
    async fn idle_worker_wakes_on_enqueue() {
        let scheduler = TaskScheduler::new(one_worker_config());
        scheduler.start();
        // Give the worker time to go idle on the empty queue.
        sleep(Duration::from_millis(20)).await;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        scheduler.enqueue(Task::new(
            1,
            1,
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        ));

        wait_for(|| ran.load(Ordering::SeqCst)).await;
        scheduler.pause().await;
    }

    #[tokio::test]
    async fn start_and_pause_are_idempotent() {
        let scheduler = TaskScheduler::new(one_worker_config());
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());

        let counter = Arc::new(AtomicUsize::new(0));
        for id in 1..=3 {
            let counter = Arc::clone(&counter);
            scheduler.enqueue(Task::new(
                id,
                1,
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            ));
        }
        wait_for(|| counter.load(Ordering::SeqCst) == 3).await;

        scheduler.pause().await;
        scheduler.pause().await;
        assert!(!scheduler.is_running());

        // Restart picks the queue back up.
        let counter2 = Arc::clone(&counter);
        scheduler.enqueue(Task::new(
            9,
            1,
            Box::pin(async move {
                counter2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ));
        scheduler.start();
        wait_for(|| counter.load(Ordering::SeqCst) == 4).await;
        scheduler.shutdown().await;
    }
}
