use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use onedesk_graph::DriveItem;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::broadcast;

use crate::operations::Operation;
use crate::session::{Session, UserId};
use crate::settings::ConflictBehavior;

const EVENT_CAPACITY: usize = 64;

const NEW_NAME_KEY: &str = "new_name";
const ADDITIONAL_DATA_KEY: &str = "additional_data";
const CONFLICT_BEHAVIOR_KEY: &str = "@microsoft.graph.conflictBehavior";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out increasing task ids; an id is never handed out twice.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    last: AtomicU64,
}

impl TaskIdGenerator {
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> TaskId {
        TaskId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    fn can_become(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Completed | Self::Cancelled | Self::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("task {task} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub task: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Free-form parameters attached to a task: rename target, conflict policy
/// and protocol metadata merged into request bodies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraParams(Map<String, Value>);

impl ExtraParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_new_name(mut self, name: impl Into<String>) -> Self {
        self.0
            .insert(NEW_NAME_KEY.into(), Value::String(name.into()));
        self
    }

    pub fn with_conflict_behavior(self, behavior: ConflictBehavior) -> Self {
        self.with_additional(CONFLICT_BEHAVIOR_KEY, Value::String(behavior.to_string()))
    }

    pub fn with_additional(mut self, key: impl Into<String>, value: Value) -> Self {
        let entry = self
            .0
            .entry(ADDITIONAL_DATA_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(additional) = entry {
            additional.insert(key.into(), value);
        }
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn new_name(&self) -> Option<&str> {
        self.0.get(NEW_NAME_KEY).and_then(Value::as_str)
    }

    /// Entries to merge into the body of remote requests.
    pub fn additional_data(&self) -> Map<String, Value> {
        match self.0.get(ADDITIONAL_DATA_KEY) {
            Some(Value::Object(additional)) => additional.clone(),
            _ => Map::new(),
        }
    }
}

/// Change notifications for observers of a single task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Status(TaskStatus),
    Progress(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub progress: f64,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    pub failure_reason: Option<String>,
}

impl TaskSnapshot {
    fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            progress: 0.0,
            started_at: None,
            ended_at: None,
            failure_reason: None,
        }
    }
}

pub struct Task {
    id: TaskId,
    owner: Arc<Session>,
    operation: Operation,
    source: DriveItem,
    destination: Option<DriveItem>,
    extra: ExtraParams,
    created_at: OffsetDateTime,
    state: Mutex<TaskSnapshot>,
    events: broadcast::Sender<TaskEvent>,
}

impl Task {
    pub fn new(
        id: TaskId,
        owner: Arc<Session>,
        operation: Operation,
        source: DriveItem,
        destination: Option<DriveItem>,
        extra: ExtraParams,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id,
            owner,
            operation,
            source,
            destination,
            extra,
            created_at: OffsetDateTime::now_utc(),
            state: Mutex::new(TaskSnapshot::pending()),
            events,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn owner(&self) -> &Arc<Session> {
        &self.owner
    }

    pub fn owner_id(&self) -> UserId {
        self.owner.id()
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn source(&self) -> &DriveItem {
        &self.source
    }

    pub fn destination(&self) -> Option<&DriveItem> {
        self.destination.as_ref()
    }

    pub fn extra(&self) -> &ExtraParams {
        &self.extra
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    pub fn progress(&self) -> f64 {
        self.state.lock().progress
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.state.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub(crate) fn mark_running(&self, at: OffsetDateTime) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Running, |state| state.started_at = Some(at))
    }

    pub(crate) fn mark_completed(&self, at: OffsetDateTime) -> Result<(), TransitionError> {
        let mut progress = None;
        self.transition(TaskStatus::Completed, |state| {
            state.ended_at = Some(at);
            if state.progress <= 0.0 {
                state.progress = 100.0;
                progress = Some(state.progress);
            }
        })?;
        if let Some(progress) = progress {
            let _ = self.events.send(TaskEvent::Progress(progress));
        }
        Ok(())
    }

    pub(crate) fn mark_cancelled(&self, at: OffsetDateTime) -> Result<(), TransitionError> {
        self.transition(TaskStatus::Cancelled, |state| state.ended_at = Some(at))
    }

    pub(crate) fn mark_failed(
        &self,
        at: OffsetDateTime,
        reason: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let reason = reason.into();
        self.transition(TaskStatus::Failed, |state| {
            state.ended_at = Some(at);
            state.failure_reason = Some(reason);
        })
    }

    pub(crate) fn set_progress(&self, progress: f64) {
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.state.lock().progress = progress;
        let _ = self.events.send(TaskEvent::Progress(progress));
    }

    fn transition(
        &self,
        to: TaskStatus,
        update: impl FnOnce(&mut TaskSnapshot),
    ) -> Result<(), TransitionError> {
        {
            let mut state = self.state.lock();
            if !state.status.can_become(to) {
                return Err(TransitionError {
                    task: self.id,
                    from: state.status,
                    to,
                });
            }
            state.status = to;
            update(&mut state);
        }
        let _ = self.events.send(TaskEvent::Status(to));
        Ok(())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("owner", &self.owner.id())
            .field("operation", &self.operation)
            .field("source", &self.source.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
