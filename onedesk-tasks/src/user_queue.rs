use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;

use crate::session::UserId;
use crate::task::{Task, TaskId, TaskStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("task {task} is still {status}")]
    NotFinished { task: TaskId, status: TaskStatus },
    #[error("task {0} is not running in this queue")]
    NotRunning(TaskId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Containers {
    pending: VecDeque<Arc<Task>>,
    running: BTreeMap<TaskId, Arc<Task>>,
    completed: Vec<Arc<Task>>,
    cancelled: Vec<Arc<Task>>,
    failed: Vec<Arc<Task>>,
}

/// Lifecycle bookkeeping for one user's tasks.
///
/// A task sits in exactly one container and only ever moves pending, then
/// running, then into one of the finished lists.
pub struct UserQueue {
    user: UserId,
    containers: Mutex<Containers>,
    revision: watch::Sender<u64>,
}

impl UserQueue {
    pub fn new(user: UserId) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            user,
            containers: Mutex::new(Containers::default()),
            revision,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn pending(&self) -> Vec<Arc<Task>> {
        self.containers.lock().pending.iter().cloned().collect()
    }

    pub fn running(&self) -> Vec<Arc<Task>> {
        self.containers.lock().running.values().cloned().collect()
    }

    pub fn completed(&self) -> Vec<Arc<Task>> {
        self.containers.lock().completed.clone()
    }

    pub fn cancelled(&self) -> Vec<Arc<Task>> {
        self.containers.lock().cancelled.clone()
    }

    pub fn failed(&self) -> Vec<Arc<Task>> {
        self.containers.lock().failed.clone()
    }

    pub fn counts(&self) -> QueueCounts {
        let containers = self.containers.lock();
        QueueCounts {
            pending: containers.pending.len(),
            running: containers.running.len(),
            completed: containers.completed.len(),
            cancelled: containers.cancelled.len(),
            failed: containers.failed.len(),
        }
    }

    /// Revision number bumped after every change to the containers.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub(crate) fn add_pending(&self, task: Arc<Task>) {
        self.containers.lock().pending.push_back(task);
        self.bump();
    }

    pub(crate) fn front_pending_id(&self) -> Option<TaskId> {
        self.containers.lock().pending.front().map(|task| task.id())
    }

    /// Moves the head of the pending list into the running set.
    pub(crate) fn dequeue_pending(&self) -> Option<Arc<Task>> {
        let task = {
            let mut containers = self.containers.lock();
            let task = containers.pending.pop_front()?;
            containers.running.insert(task.id(), Arc::clone(&task));
            task
        };
        self.bump();
        Some(task)
    }

    /// Files a finished task into the list matching its status.
    pub(crate) fn add_completed(&self, task: &Arc<Task>) -> Result<(), QueueError> {
        let status = task.status();
        if !status.is_finished() {
            return Err(QueueError::NotFinished {
                task: task.id(),
                status,
            });
        }
        {
            let mut containers = self.containers.lock();
            if containers.running.remove(&task.id()).is_none() {
                return Err(QueueError::NotRunning(task.id()));
            }
            let list = match status {
                TaskStatus::Completed => &mut containers.completed,
                TaskStatus::Cancelled => &mut containers.cancelled,
                _ => &mut containers.failed,
            };
            list.push(Arc::clone(task));
        }
        self.bump();
        Ok(())
    }

    pub(crate) fn clear_terminal(&self) {
        {
            let mut containers = self.containers.lock();
            containers.completed.clear();
            containers.cancelled.clear();
            containers.failed.clear();
        }
        self.bump();
    }

    /// Empties the pending list. The tasks never reach the running set.
    pub(crate) fn drain_pending(&self) -> Vec<Arc<Task>> {
        let drained: Vec<_> = self.containers.lock().pending.drain(..).collect();
        if !drained.is_empty() {
            self.bump();
        }
        drained
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

impl std::fmt::Debug for UserQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserQueue")
            .field("user", &self.user)
            .field("counts", &self.counts())
            .finish()
    }
}
