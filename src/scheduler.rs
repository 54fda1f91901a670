//! Delayed callbacks and cancellable events.
//!
//! The [`Scheduler`] owns one dedicated worker thread running a
//! current-thread tokio runtime. Every callback handed to
//! [`Scheduler::call_later`] runs on that worker, one at a time, in order of
//! expiry. Callers never run a callback inline, even with a zero delay.
//!
//! Two clocks are supported:
//!
//! - real time: the worker sleeps until the next task is due;
//! - time skipping: the worker keeps a virtual clock and jumps it straight to
//!   the next due task. Work scheduled by a running callback is absorbed
//!   before the next task is picked, so due-order is preserved.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::SchedulerConfig;
use crate::error::{ServiceError, ServiceResult};

/// A boxed async callback run by the scheduler worker.
pub type ScheduledCallback =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ServiceResult<()>> + Send>> + Send>;

/// Boxes an async closure into a [`ScheduledCallback`].
pub fn callback<F, Fut>(f: F) -> ScheduledCallback
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ServiceResult<()>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

#[derive(Debug, Clone, Copy, Default)]
struct EventState {
    set: bool,
    cancelled: bool,
    /// Coupled callbacks currently running
    in_flight: usize,
}

/// A settable, cancellable, one-shot signal.
///
/// Waiters wake with `true` once the event is set and no coupled callback is
/// still running, or with `false` if the event is cancelled or the wait times
/// out.
#[derive(Debug, Clone)]
pub struct Event {
    state: Arc<watch::Sender<EventState>>,
}

impl Event {
    fn new() -> Self {
        let (state, _) = watch::channel(EventState::default());
        Self {
            state: Arc::new(state),
        }
    }

    /// Mark the event as set.
    pub fn set(&self) {
        self.state.send_modify(|s| s.set = true);
    }

    /// Wake every waiter with `false`.
    pub fn cancel(&self) {
        self.state.send_modify(|s| s.cancelled = true);
    }

    pub fn is_set(&self) -> bool {
        self.state.borrow().set
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.borrow().cancelled
    }

    /// Wait until the event is set, up to `timeout` when given.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.state.subscribe();
        let ready = async move {
            match rx.wait_for(|s| s.cancelled || (s.set && s.in_flight == 0)).await {
                Ok(state) => !state.cancelled,
                Err(_) => false,
            }
        };

        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, ready).await.unwrap_or(false),
            None => ready.await,
        }
    }

    fn begin(&self) {
        self.state.send_modify(|s| s.in_flight += 1);
    }

    fn finish(&self) {
        self.state
            .send_modify(|s| s.in_flight = s.in_flight.saturating_sub(1));
    }
}

/// Handle to a scheduled callback.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Drop the callback if it has not started yet.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel(self.id));
    }
}

struct ScheduledTask {
    id: u64,
    delay: Duration,
    callback: ScheduledCallback,
    event: Option<Event>,
}

enum Command {
    Schedule(ScheduledTask),
    Cancel(u64),
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schedule(task) => f
                .debug_struct("Schedule")
                .field("id", &task.id)
                .field("delay", &task.delay)
                .finish(),
            Self::Cancel(id) => f.debug_tuple("Cancel").field(id).finish(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

struct QueuedTask {
    due: Duration,
    task: ScheduledTask,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.task.id == other.task.id
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // Reversed so the BinaryHeap pops the earliest due, then the earliest scheduled.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.task.id.cmp(&self.task.id))
    }
}

/// Worker-side task queue.
struct TaskQueue {
    heap: BinaryHeap<QueuedTask>,
    base: Instant,
    clock: Duration,
    time_skipping: bool,
    pending: Arc<AtomicUsize>,
}

impl TaskQueue {
    fn new(time_skipping: bool, pending: Arc<AtomicUsize>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            base: Instant::now(),
            clock: Duration::ZERO,
            time_skipping,
            pending,
        }
    }

    fn now(&self) -> Duration {
        if self.time_skipping {
            self.clock
        } else {
            self.base.elapsed()
        }
    }

    /// Returns false once the worker should exit.
    fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::Schedule(task) => {
                let due = self.now().saturating_add(task.delay);
                self.heap.push(QueuedTask { due, task });
                true
            }
            Command::Cancel(id) => {
                let before = self.heap.len();
                self.heap.retain(|queued| queued.task.id != id);
                let removed = before - self.heap.len();
                if removed > 0 {
                    self.pending.fetch_sub(removed, Ordering::SeqCst);
                    tracing::debug!(task_id = id, "Cancelled scheduled task");
                }
                true
            }
            Command::Shutdown => {
                self.clear();
                false
            }
        }
    }

    fn clear(&mut self) {
        let dropped = self.heap.len();
        self.heap.clear();
        self.pending.fetch_sub(dropped, Ordering::SeqCst);
    }

    fn next_due(&self) -> Option<Duration> {
        self.heap.peek().map(|queued| queued.due)
    }

    async fn run_next(&mut self) {
        let Some(QueuedTask { due, task }) = self.heap.pop() else {
            return;
        };
        self.pending.fetch_sub(1, Ordering::SeqCst);
        if self.time_skipping {
            self.clock = self.clock.max(due);
        }
        run_task(task).await;
    }
}

async fn run_task(task: ScheduledTask) {
    let ScheduledTask {
        id,
        callback,
        event,
        ..
    } = task;

    if let Some(event) = &event {
        event.begin();
    }

    match tokio::spawn(callback()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            tracing::error!(task_id = id, "Error during scheduled callback: {:?}", error);
        }
        Err(join_error) => {
            tracing::error!(task_id = id, "Scheduled callback panicked: {}", join_error);
        }
    }

    if let Some(event) = &event {
        event.finish();
    }
}

fn run_worker(
    mut commands: mpsc::UnboundedReceiver<Command>,
    time_skipping: bool,
    pending: Arc<AtomicUsize>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to create scheduler runtime: {}", e);
            return;
        }
    };

    runtime.block_on(async move {
        let mut queue = TaskQueue::new(time_skipping, pending);
        loop {
            loop {
                match commands.try_recv() {
                    Ok(command) => {
                        if !queue.apply(command) {
                            return;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        queue.clear();
                        return;
                    }
                }
            }

            match queue.next_due() {
                None => match commands.recv().await {
                    Some(command) => {
                        if !queue.apply(command) {
                            return;
                        }
                    }
                    None => return,
                },
                Some(_) if queue.time_skipping => queue.run_next().await,
                Some(due) => {
                    // A deadline past the clock's range never fires; only commands can wake us.
                    let Some(deadline) = queue.base.checked_add(due) else {
                        match commands.recv().await {
                            Some(command) => {
                                if !queue.apply(command) {
                                    return;
                                }
                            }
                            None => {
                                queue.clear();
                                return;
                            }
                        }
                        continue;
                    };
                    tokio::select! {
                        command = commands.recv() => match command {
                            Some(command) => {
                                if !queue.apply(command) {
                                    return;
                                }
                            }
                            None => {
                                queue.clear();
                                return;
                            }
                        },
                        _ = tokio::time::sleep_until(deadline) => queue.run_next().await,
                    }
                }
            }
        }
    });
}

struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    handle: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    worker: Mutex<Option<Worker>>,
    next_task_id: AtomicU64,
    pending: Arc<AtomicUsize>,
    events_created: AtomicUsize,
}

impl SchedulerInner {
    fn worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stop(&self) {
        let Some(mut worker) = self.worker().take() else {
            return;
        };
        let _ = worker.commands.send(Command::Shutdown);

        if let Some(handle) = worker.handle.take() {
            // A callback stopping its own scheduler cannot join itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("Scheduler worker thread panicked");
            }
        }
        tracing::debug!("Scheduler stopped");
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs delayed callbacks on a dedicated worker thread.
///
/// Cloning a `Scheduler` yields another handle to the same worker.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use durable_execution_local::{Scheduler, SchedulerConfig};
/// use durable_execution_local::scheduler::callback;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> durable_execution_local::ServiceResult<()> {
/// let scheduler = Scheduler::new(SchedulerConfig::default().with_time_skipping(true));
/// scheduler.start()?;
///
/// let done = scheduler.create_event();
/// let signal = done.clone();
/// scheduler.call_later(
///     callback(move || async move {
///         signal.set();
///         Ok(())
///     }),
///     Duration::from_secs(3600),
///     None,
/// )?;
///
/// assert!(done.wait(Some(Duration::from_secs(5))).await);
/// scheduler.stop();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("started", &self.is_started())
            .field("task_count", &self.task_count())
            .finish()
    }
}

impl Scheduler {
    /// Creates a scheduler. Call [`start`](Self::start) before scheduling work.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                worker: Mutex::new(None),
                next_task_id: AtomicU64::new(1),
                pending: Arc::new(AtomicUsize::new(0)),
                events_created: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Spawn the worker thread. Does nothing if already running.
    pub fn start(&self) -> ServiceResult<()> {
        let mut worker = self.inner.worker();
        if worker.is_some() {
            return Ok(());
        }

        let (commands, receiver) = mpsc::unbounded_channel();
        let time_skipping = self.inner.config.time_skipping;
        let pending = Arc::clone(&self.inner.pending);
        let handle = thread::Builder::new()
            .name(self.inner.config.thread_name.clone())
            .spawn(move || run_worker(receiver, time_skipping, pending))
            .map_err(|e| {
                ServiceError::illegal_state(format!("Failed to spawn scheduler thread: {}", e))
            })?;

        *worker = Some(Worker {
            commands,
            handle: Some(handle),
        });
        tracing::debug!(time_skipping, "Scheduler started");
        Ok(())
    }

    /// Stop the worker, dropping every task that has not run yet.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_started(&self) -> bool {
        self.inner.worker().is_some()
    }

    /// True when called from the worker thread, i.e. from inside a callback.
    pub fn is_worker_thread(&self) -> bool {
        self.inner
            .worker()
            .as_ref()
            .and_then(|w| w.handle.as_ref())
            .map_or(false, |handle| handle.thread().id() == thread::current().id())
    }

    /// Number of scheduled callbacks that have not started yet.
    pub fn task_count(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Number of events created through this scheduler.
    pub fn event_count(&self) -> usize {
        self.inner.events_created.load(Ordering::SeqCst)
    }

    pub fn create_event(&self) -> Event {
        self.inner.events_created.fetch_add(1, Ordering::SeqCst);
        Event::new()
    }

    /// Run `callback` on the worker once `delay` has elapsed.
    ///
    /// When `completion_event` is given, its waiters stay blocked while the
    /// callback runs, even if the event is already set.
    pub fn call_later(
        &self,
        callback: ScheduledCallback,
        delay: Duration,
        completion_event: Option<Event>,
    ) -> ServiceResult<TimerHandle> {
        let worker = self.inner.worker();
        let commands = worker
            .as_ref()
            .map(|w| w.commands.clone())
            .ok_or(ServiceError::SchedulerNotRunning)?;
        drop(worker);

        let id = self.inner.next_task_id.fetch_add(1, Ordering::SeqCst);
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let task = ScheduledTask {
            id,
            delay,
            callback,
            event: completion_event,
        };
        if commands.send(Command::Schedule(task)).is_err() {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ServiceError::SchedulerNotRunning);
        }

        Ok(TimerHandle { id, commands })
    }
}
