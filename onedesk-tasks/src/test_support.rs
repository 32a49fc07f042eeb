use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use onedesk_graph::{
    CopyOutcome, DriveItem, FolderFacet, GraphError, ItemReference, MonitorStatus, RemoteItemRef,
    StatusCode,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::operations::{Operation, OperationContext, TaskError, TaskSink};
use crate::remote::RemoteDrive;
use crate::scheduler::SchedulerError;
use crate::session::{Session, UserId};
use crate::task::{ExtraParams, Task, TaskId, TaskIdGenerator};
use crate::ui::InlineDispatcher;

static TEST_IDS: TaskIdGenerator = TaskIdGenerator::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    ListChildren {
        parent: String,
    },
    CreateChild {
        parent: String,
        name: String,
        is_folder: bool,
    },
    Copy {
        item: String,
        destination: String,
        name: Option<String>,
    },
    Patch {
        item: String,
        destination: String,
        name: Option<String>,
    },
    Delete {
        item: String,
    },
}

#[derive(Default)]
struct FakeState {
    calls: Vec<RemoteCall>,
    children: HashMap<String, Vec<DriveItem>>,
    copy_outcome: Option<CopyOutcome>,
    monitor: VecDeque<MonitorStatus>,
    monitor_polls: usize,
    delete_failure: Option<(StatusCode, String)>,
    create_override: Option<DriveItem>,
    created: usize,
}

/// Scripted in-memory drive. Records every call except monitor polls.
#[derive(Clone, Default)]
pub struct FakeDrive {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDrive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted() -> CopyOutcome {
        CopyOutcome::Accepted {
            monitor_url: Url::parse("https://monitor.invalid/jobs/1").unwrap(),
        }
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    pub fn monitor_polls(&self) -> usize {
        self.state.lock().monitor_polls
    }

    pub fn set_children(&self, parent: &str, children: Vec<DriveItem>) {
        self.state
            .lock()
            .children
            .insert(parent.to_string(), children);
    }

    pub fn respond_to_copy(&self, outcome: CopyOutcome) {
        self.state.lock().copy_outcome = Some(outcome);
    }

    pub fn push_monitor(&self, status: MonitorStatus) {
        self.state.lock().monitor.push_back(status);
    }

    pub fn fail_deletes_with(&self, status: StatusCode, message: &str) {
        self.state.lock().delete_failure = Some((status, message.to_string()));
    }

    pub fn create_returns(&self, item: DriveItem) {
        self.state.lock().create_override = Some(item);
    }

    fn record(&self, call: RemoteCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl RemoteDrive for FakeDrive {
    async fn list_children(&self, parent: &RemoteItemRef) -> Result<Vec<DriveItem>, GraphError> {
        let key = parent.to_string();
        self.record(RemoteCall::ListChildren {
            parent: key.clone(),
        });
        Ok(self
            .state
            .lock()
            .children
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_child(
        &self,
        parent: &RemoteItemRef,
        name: &str,
        is_folder: bool,
        _additional_data: &Map<String, Value>,
    ) -> Result<DriveItem, GraphError> {
        self.record(RemoteCall::CreateChild {
            parent: parent.to_string(),
            name: name.to_string(),
            is_folder,
        });
        let mut state = self.state.lock();
        if let Some(item) = state.create_override.clone() {
            return Ok(item);
        }
        state.created += 1;
        Ok(DriveItem {
            id: Some(format!("created-{}", state.created)),
            name: Some(name.to_string()),
            folder: is_folder.then(FolderFacet::default),
            parent_reference: Some(parent.to_item_reference()),
            ..DriveItem::default()
        })
    }

    async fn copy_item(
        &self,
        item: &RemoteItemRef,
        destination: &RemoteItemRef,
        name: Option<&str>,
        _additional_data: &Map<String, Value>,
    ) -> Result<CopyOutcome, GraphError> {
        self.record(RemoteCall::Copy {
            item: item.to_string(),
            destination: destination.to_string(),
            name: name.map(str::to_string),
        });
        Ok(self
            .state
            .lock()
            .copy_outcome
            .clone()
            .unwrap_or(CopyOutcome::Completed))
    }

    async fn patch_parent_and_name(
        &self,
        item: &RemoteItemRef,
        destination: &RemoteItemRef,
        name: Option<&str>,
        _additional_data: &Map<String, Value>,
    ) -> Result<DriveItem, GraphError> {
        self.record(RemoteCall::Patch {
            item: item.to_string(),
            destination: destination.to_string(),
            name: name.map(str::to_string),
        });
        Ok(DriveItem {
            id: Some(item.item_id().to_string()),
            name: name.map(str::to_string),
            parent_reference: Some(destination.to_item_reference()),
            ..DriveItem::default()
        })
    }

    async fn delete_item(&self, item: &RemoteItemRef) -> Result<(), GraphError> {
        self.record(RemoteCall::Delete {
            item: item.to_string(),
        });
        match self.state.lock().delete_failure.clone() {
            Some((status, message)) => Err(GraphError::Api { status, message }),
            None => Ok(()),
        }
    }

    async fn monitor_status(&self, _monitor_url: &Url) -> Result<MonitorStatus, GraphError> {
        let mut state = self.state.lock();
        state.monitor_polls += 1;
        Ok(state.monitor.pop_front().unwrap_or(MonitorStatus {
            status: onedesk_graph::CopyJobStatus::Completed,
            percentage_complete: 100.0,
            error: None,
        }))
    }
}

/// Collects submitted tasks instead of running them.
#[derive(Default)]
pub struct RecordingSink {
    ids: TaskIdGenerator,
    submitted: Mutex<Vec<Arc<Task>>>,
}

impl RecordingSink {
    pub fn submitted(&self) -> Vec<Arc<Task>> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl TaskSink for RecordingSink {
    fn next_task_id(&self) -> TaskId {
        self.ids.next_id()
    }

    async fn submit(&self, task: Arc<Task>) -> Result<(), SchedulerError> {
        self.submitted.lock().push(task);
        Ok(())
    }
}

pub fn session(id: u64, drive: FakeDrive) -> Arc<Session> {
    Arc::new(Session::new(UserId(id), format!("user {id}"), Arc::new(drive)))
}

pub fn file(drive: &str, id: &str, name: &str) -> DriveItem {
    DriveItem {
        id: Some(id.to_string()),
        name: Some(name.to_string()),
        size: Some(1),
        parent_reference: Some(ItemReference {
            drive_id: Some(drive.to_string()),
            id: None,
        }),
        ..DriveItem::default()
    }
}

pub fn folder(drive: &str, id: &str, name: &str) -> DriveItem {
    DriveItem {
        folder: Some(FolderFacet::default()),
        size: None,
        ..file(drive, id, name)
    }
}

pub fn task_for(
    owner: &Arc<Session>,
    operation: Operation,
    source: DriveItem,
    destination: Option<DriveItem>,
) -> Arc<Task> {
    task_with_extra(owner, operation, source, destination, ExtraParams::new())
}

pub fn task_with_extra(
    owner: &Arc<Session>,
    operation: Operation,
    source: DriveItem,
    destination: Option<DriveItem>,
    extra: ExtraParams,
) -> Arc<Task> {
    Arc::new(Task::new(
        TEST_IDS.next_id(),
        Arc::clone(owner),
        operation,
        source,
        destination,
        extra,
    ))
}

pub async fn run_operation(drive: &FakeDrive, task: &Arc<Task>) -> Result<(), TaskError> {
    run_operation_with(drive, &RecordingSink::default(), task).await
}

pub async fn run_operation_with(
    drive: &FakeDrive,
    sink: &RecordingSink,
    task: &Arc<Task>,
) -> Result<(), TaskError> {
    let cancel = CancellationToken::new();
    let ctx = OperationContext {
        remote: drive,
        cancel: &cancel,
        ui: &InlineDispatcher,
        sink,
        poll_interval: Duration::from_millis(200),
    };
    task.operation().execute(&ctx, task).await
}
