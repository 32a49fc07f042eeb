mod copy;
mod create_folder;
mod delete;
mod move_item;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use onedesk_graph::{GraphError, RemoteItemRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::remote::RemoteDrive;
use crate::scheduler::SchedulerError;
use crate::task::{Task, TaskId};
use crate::ui::UiDispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    CreateFolder,
    Delete,
    Move,
    Copy,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateFolder => "create folder",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::Copy => "copy",
        }
    }

    pub async fn execute(
        self,
        ctx: &OperationContext<'_>,
        task: &Arc<Task>,
    ) -> Result<(), TaskError> {
        match self {
            Self::CreateFolder => create_folder::run(ctx, task).await,
            Self::Delete => delete::run(ctx, task).await,
            Self::Move => move_item::run(ctx, task).await,
            Self::Copy => copy::run(ctx, task).await,
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid task: {0}")]
    Validation(&'static str),
    #[error(transparent)]
    Remote(#[from] GraphError),
    #[error("copy failed: {0}")]
    CopyFailed(String),
    #[error("copy finished with unexpected status: {0}")]
    UnexpectedCopyStatus(String),
    #[error("remote returned no usable folder for {0}")]
    FolderNotCreated(String),
    #[error("failed to submit child task: {0}")]
    Resubmit(#[from] SchedulerError),
    #[error("cancelled")]
    Cancelled,
}

/// Where operations hand follow-up tasks, such as the children of a copied
/// folder.
#[async_trait]
pub trait TaskSink: Send + Sync {
    fn next_task_id(&self) -> TaskId;

    async fn submit(&self, task: Arc<Task>) -> Result<(), SchedulerError>;
}

pub struct OperationContext<'a> {
    pub remote: &'a dyn RemoteDrive,
    pub cancel: &'a CancellationToken,
    pub ui: &'a dyn UiDispatcher,
    pub sink: &'a dyn TaskSink,
    pub poll_interval: Duration,
}

impl OperationContext<'_> {
    /// Awaits a remote call, abandoning it as soon as the token fires.
    async fn call<T, E>(&self, call: impl Future<Output = Result<T, E>>) -> Result<T, TaskError>
    where
        E: Into<TaskError>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TaskError::Cancelled),
            result = call => result.map_err(Into::into),
        }
    }

    async fn pause(&self) -> Result<(), TaskError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TaskError::Cancelled),
            _ = tokio::time::sleep(self.poll_interval) => Ok(()),
        }
    }
}

fn source_ref(task: &Task) -> Result<RemoteItemRef, TaskError> {
    let source = task.source();
    if source.id.is_none() {
        return Err(TaskError::Validation("source item has no id"));
    }
    source
        .item_ref()
        .ok_or(TaskError::Validation("source item has no drive id"))
}

fn destination_ref(task: &Task) -> Result<RemoteItemRef, TaskError> {
    let destination = task
        .destination()
        .filter(|item| item.id.is_some())
        .ok_or(TaskError::Validation("destination item has no id"))?;
    destination
        .item_ref()
        .ok_or(TaskError::Validation("destination item has no drive id"))
}
