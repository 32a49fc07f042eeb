use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use onedesk_graph::DriveItem;
use parking_lot::Mutex;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::debounce::{DebounceError, Debouncer};
use crate::operations::{Operation, OperationContext, TaskError, TaskSink};
use crate::session::{Session, SessionEvent, UserId};
use crate::task::{ExtraParams, Task, TaskId, TaskIdGenerator, TaskStatus, TransitionError};
use crate::ui::{UiClosed, UiDispatcher, run_on_ui};
use crate::user_queue::{QueueError, UserQueue};

const PRIORITY_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no task queue is registered for user {0}")]
    UnknownUser(UserId),
    #[error("scheduler is shut down")]
    ShutDown,
    #[error("priority worker stopped after a fault")]
    PriorityLaneStopped,
    #[error("task {task} reached a worker while {status}")]
    InvalidTaskState { task: TaskId, status: TaskStatus },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    UiUnavailable(#[from] UiClosed),
    #[error("workers did not stop within {0:?}")]
    ShutdownTimedOut(Duration),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Debounce(#[from] DebounceError),
}

type Lane = mpsc::UnboundedSender<Arc<Task>>;
type SharedLane = Arc<AsyncMutex<mpsc::UnboundedReceiver<Arc<Task>>>>;
type Worker = JoinHandle<Result<(), SchedulerError>>;

struct Inner {
    config: SchedulerConfig,
    ui: Arc<dyn UiDispatcher>,
    queues: DashMap<UserId, Arc<UserQueue>>,
    ids: TaskIdGenerator,
    normal: Mutex<Option<Lane>>,
    priority: Mutex<Option<Lane>>,
    submit_lock: AsyncMutex<()>,
    cancel: CancellationToken,
    priority_done: Debouncer,
    priority_completed: broadcast::Sender<()>,
    workers: Mutex<Vec<Worker>>,
}

/// Runs tasks for every registered user.
///
/// Normal submissions are recorded in the owner's [`UserQueue`] and drained
/// by a pool of workers; priority submissions bypass the queues and run on a
/// dedicated consumer. Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Spawns the workers on the current tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        ui: Arc<dyn UiDispatcher>,
    ) -> Result<Self, SchedulerError> {
        let (priority_completed, _) = broadcast::channel(PRIORITY_EVENT_CAPACITY);
        let notify = priority_completed.clone();
        let priority_done = Debouncer::new(config.priority_quiet, config.priority_max_wait, move || {
            let _ = notify.send(());
        })?;

        let (normal_tx, normal_rx) = mpsc::unbounded_channel();
        let (priority_tx, priority_rx) = mpsc::unbounded_channel();
        let worker_count = config.worker_count();

        let inner = Arc::new(Inner {
            config,
            ui,
            queues: DashMap::new(),
            ids: TaskIdGenerator::new(),
            normal: Mutex::new(Some(normal_tx)),
            priority: Mutex::new(Some(priority_tx)),
            submit_lock: AsyncMutex::new(()),
            cancel: CancellationToken::new(),
            priority_done,
            priority_completed,
            workers: Mutex::new(Vec::new()),
        });

        let lane: SharedLane = Arc::new(AsyncMutex::new(normal_rx));
        let mut workers = Vec::with_capacity(worker_count + 1);
        for index in 0..worker_count {
            workers.push(tokio::spawn(normal_worker(
                index,
                Arc::clone(&lane),
                inner.cancel.clone(),
                Arc::downgrade(&inner),
            )));
        }
        workers.push(tokio::spawn(priority_worker(
            priority_rx,
            inner.cancel.clone(),
            Arc::downgrade(&inner),
        )));
        inner.workers.lock().extend(workers);

        tracing::debug!(workers = worker_count, "scheduler started");
        Ok(Self { inner })
    }

    /// Builds a task with the next id of this scheduler.
    pub fn new_task(
        &self,
        owner: Arc<Session>,
        operation: Operation,
        source: DriveItem,
        destination: Option<DriveItem>,
        extra: ExtraParams,
    ) -> Arc<Task> {
        Arc::new(Task::new(
            self.inner.ids.next_id(),
            owner,
            operation,
            source,
            destination,
            extra,
        ))
    }

    pub fn user_queue(&self, user: UserId) -> Option<Arc<UserQueue>> {
        self.inner
            .queues
            .get(&user)
            .map(|queue| Arc::clone(queue.value()))
    }

    pub fn users(&self) -> Vec<UserId> {
        self.inner.queues.iter().map(|entry| *entry.key()).collect()
    }

    /// Registers a queue for the session. An existing queue is kept.
    pub async fn add_session(&self, session: &Session) -> Result<Arc<UserQueue>, SchedulerError> {
        let inner = Arc::clone(&self.inner);
        let user = session.id();
        let queue = run_on_ui(self.inner.ui.as_ref(), move || {
            Arc::clone(
                inner
                    .queues
                    .entry(user)
                    .or_insert_with(|| Arc::new(UserQueue::new(user)))
                    .value(),
            )
        })
        .await?;
        tracing::debug!(%user, "registered task queue");
        Ok(queue)
    }

    /// Drops the user's queue. Pending tasks are cancelled on the spot;
    /// running ones finish but their results are discarded.
    pub async fn remove_session(&self, user: UserId) -> Result<bool, SchedulerError> {
        let inner = Arc::clone(&self.inner);
        let cancelled = run_on_ui(self.inner.ui.as_ref(), move || {
            let Some((_, queue)) = inner.queues.remove(&user) else {
                return Ok::<_, SchedulerError>(None);
            };
            let now = OffsetDateTime::now_utc();
            let orphans = queue.drain_pending();
            for task in &orphans {
                task.mark_cancelled(now)?;
            }
            Ok(Some(orphans.len()))
        })
        .await??;
        match cancelled {
            Some(cancelled) => {
                tracing::debug!(%user, cancelled, "removed task queue");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Keeps the registered queues in step with a session provider.
    pub fn follow_sessions(&self, mut events: broadcast::Receiver<SessionEvent>) {
        let weak = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();
        let listener = tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    event = events.recv() => Some(event),
                };
                let event = match received {
                    None | Some(Err(RecvError::Closed)) => break,
                    Some(Err(RecvError::Lagged(skipped))) => {
                        tracing::warn!(skipped, "session listener fell behind");
                        continue;
                    }
                    Some(Ok(event)) => event,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let scheduler = Scheduler { inner };
                match event {
                    SessionEvent::Activated(session) => {
                        scheduler.add_session(&session).await?;
                    }
                    SessionEvent::Ended(user) => {
                        scheduler.remove_session(user).await?;
                    }
                }
            }
            Ok::<(), SchedulerError>(())
        });
        self.inner.workers.lock().push(listener);
    }

    /// Records the task as pending for its owner and hands it to the workers.
    pub async fn submit(&self, task: Arc<Task>) -> Result<(), SchedulerError> {
        let _serial = self.inner.submit_lock.lock().await;
        let lane = self
            .inner
            .normal
            .lock()
            .clone()
            .ok_or(SchedulerError::ShutDown)?;

        let inner = Arc::clone(&self.inner);
        let owner = task.owner_id();
        let pending = Arc::clone(&task);
        run_on_ui(self.inner.ui.as_ref(), move || {
            let queue = inner
                .queues
                .get(&owner)
                .map(|queue| Arc::clone(queue.value()))
                .ok_or(SchedulerError::UnknownUser(owner))?;
            queue.add_pending(pending);
            Ok::<_, SchedulerError>(())
        })
        .await??;

        tracing::trace!(task = %task.id(), user = %owner, "task submitted");
        lane.send(task).map_err(|_| SchedulerError::ShutDown)
    }

    /// Queues a task on the priority lane. It never shows up in a user queue.
    ///
    /// The lane has a single consumer. A task that reaches it neither pending
    /// nor cancelled stops that consumer, and every later call fails with
    /// [`SchedulerError::PriorityLaneStopped`].
    pub fn submit_priority(&self, task: Arc<Task>) -> Result<(), SchedulerError> {
        let lane = self
            .inner
            .priority
            .lock()
            .clone()
            .ok_or(SchedulerError::ShutDown)?;
        tracing::trace!(task = %task.id(), "priority task submitted");
        lane.send(task).map_err(|_| SchedulerError::PriorityLaneStopped)
    }

    pub async fn clear_finished(&self, user: UserId) -> Result<(), SchedulerError> {
        let queue = self
            .user_queue(user)
            .ok_or(SchedulerError::UnknownUser(user))?;
        run_on_ui(self.inner.ui.as_ref(), move || queue.clear_terminal()).await?;
        Ok(())
    }

    /// Fires, debounced, after priority tasks finish.
    pub fn subscribe_priority_completed(&self) -> broadcast::Receiver<()> {
        self.inner.priority_completed.subscribe()
    }

    /// Stops the workers and waits for them. Returns the first fault a worker
    /// stopped with.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        tracing::debug!("shutting down scheduler");
        self.inner.cancel.cancel();
        self.inner.normal.lock().take();
        self.inner.priority.lock().take();

        let handles = std::mem::take(&mut *self.inner.workers.lock());
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let timeout = self.inner.config.shutdown_timeout;
        let joined = tokio::time::timeout(timeout, join_all(handles)).await;
        self.inner.priority_done.dispose();

        let Ok(results) = joined else {
            tracing::warn!(?timeout, "workers did not stop in time, aborting");
            for abort in aborts {
                abort.abort();
            }
            return Err(SchedulerError::ShutdownTimedOut(timeout));
        };

        let mut first_fault = None;
        for result in results {
            let fault = match result {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(err) => SchedulerError::Join(err),
            };
            first_fault.get_or_insert(fault);
        }
        tracing::debug!("scheduler stopped");
        first_fault.map_or(Ok(()), Err)
    }

    /// Moves the lane's task into the running set of its owner's queue.
    /// `None` means the task is orphaned: its queue is gone or was replaced.
    async fn claim(&self, task: &Arc<Task>) -> Result<Option<Arc<UserQueue>>, SchedulerError> {
        let inner = Arc::clone(&self.inner);
        let owner = task.owner_id();
        let id = task.id();
        let claimed = run_on_ui(self.inner.ui.as_ref(), move || {
            let queue = inner
                .queues
                .get(&owner)
                .map(|queue| Arc::clone(queue.value()))?;
            if queue.front_pending_id() != Some(id) {
                return None;
            }
            queue.dequeue_pending()?;
            Some(queue)
        })
        .await?;
        Ok(claimed)
    }

    async fn run_normal(&self, task: Arc<Task>, queue: Arc<UserQueue>) -> Result<(), SchedulerError> {
        self.execute(&task).await?;

        let inner = Arc::clone(&self.inner);
        let id = task.id();
        let filed = run_on_ui(self.inner.ui.as_ref(), move || {
            let registered = inner
                .queues
                .get(&task.owner_id())
                .is_some_and(|current| Arc::ptr_eq(current.value(), &queue));
            if !registered {
                return Ok(false);
            }
            queue.add_completed(&task).map(|()| true)
        })
        .await??;
        if !filed {
            tracing::debug!(task = %id, "queue was removed, discarding result");
        }
        Ok(())
    }

    /// Applies the terminal-transition policy around one operation run.
    async fn execute(&self, task: &Arc<Task>) -> Result<(), SchedulerError> {
        match task.status() {
            TaskStatus::Pending => {}
            TaskStatus::Cancelled => return Ok(()),
            status => {
                tracing::error!(task = %task.id(), %status, "task reached a worker in a non-runnable state");
                return Err(SchedulerError::InvalidTaskState {
                    task: task.id(),
                    status,
                });
            }
        }

        let ui = self.inner.ui.as_ref();
        let starting = Arc::clone(task);
        run_on_ui(ui, move || starting.mark_running(OffsetDateTime::now_utc())).await??;
        tracing::debug!(task = %task.id(), operation = task.operation().name(), "task started");

        let ctx = OperationContext {
            remote: task.owner().remote(),
            cancel: &self.inner.cancel,
            ui,
            sink: self,
            poll_interval: self.inner.config.copy_poll_interval,
        };
        let outcome = match task.operation().execute(&ctx, task).await {
            Ok(()) => Outcome::Completed,
            Err(TaskError::Cancelled) => Outcome::Cancelled,
            Err(err) => Outcome::Failed(err.to_string()),
        };
        tracing::debug!(task = %task.id(), ?outcome, "task finished");

        let finishing = Arc::clone(task);
        run_on_ui(ui, move || {
            let now = OffsetDateTime::now_utc();
            match outcome {
                Outcome::Completed => finishing.mark_completed(now),
                Outcome::Cancelled => finishing.mark_cancelled(now),
                Outcome::Failed(reason) => finishing.mark_failed(now, reason),
            }
        })
        .await??;
        Ok(())
    }
}

#[derive(Debug)]
enum Outcome {
    Completed,
    Cancelled,
    Failed(String),
}

#[async_trait]
impl TaskSink for Scheduler {
    fn next_task_id(&self) -> TaskId {
        self.inner.ids.next_id()
    }

    async fn submit(&self, task: Arc<Task>) -> Result<(), SchedulerError> {
        Scheduler::submit(self, task).await
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("users", &self.inner.queues.len())
            .finish_non_exhaustive()
    }
}

async fn normal_worker(
    index: usize,
    lane: SharedLane,
    cancel: CancellationToken,
    inner: Weak<Inner>,
) -> Result<(), SchedulerError> {
    tracing::debug!(worker = index, "worker started");
    loop {
        // The lane stays locked until the task is claimed so that lane order
        // and pending order agree.
        let mut receiver = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            receiver = lane.lock() => Some(receiver),
        };
        let next = match receiver.as_mut() {
            Some(receiver) => tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                task = receiver.recv() => task,
            },
            None => None,
        };
        let Some(task) = next else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let scheduler = Scheduler { inner };

        let claimed = scheduler.claim(&task).await;
        drop(receiver);
        match claimed? {
            Some(queue) => scheduler.run_normal(task, queue).await?,
            None => tracing::trace!(task = %task.id(), "dropping orphaned task"),
        }
    }
    tracing::debug!(worker = index, "worker stopped");
    Ok(())
}

async fn priority_worker(
    mut lane: mpsc::UnboundedReceiver<Arc<Task>>,
    cancel: CancellationToken,
    inner: Weak<Inner>,
) -> Result<(), SchedulerError> {
    tracing::debug!("priority worker started");
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            task = lane.recv() => task,
        };
        let Some(task) = next else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.queues.contains_key(&task.owner_id()) {
            tracing::trace!(task = %task.id(), "owner is gone, skipping priority task");
            continue;
        }
        let scheduler = Scheduler { inner };
        scheduler.execute(&task).await?;
        scheduler.inner.priority_done.invoke();
    }
    tracing::debug!("priority worker stopped");
    Ok(())
}
