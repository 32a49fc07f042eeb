use std::sync::Arc;

use onedesk_graph::{CopyJobStatus, CopyOutcome, DriveItem, RemoteItemRef};
use serde_json::Map;
use url::Url;

use super::{Operation, OperationContext, TaskError, destination_ref, source_ref};
use crate::task::Task;

pub(super) async fn run(ctx: &OperationContext<'_>, task: &Arc<Task>) -> Result<(), TaskError> {
    let source = source_ref(task)?;
    let destination = destination_ref(task)?;

    if task.source().is_folder() {
        copy_folder(ctx, task, &source, &destination).await
    } else {
        copy_file(ctx, task, &source, &destination).await
    }
}

async fn copy_file(
    ctx: &OperationContext<'_>,
    task: &Arc<Task>,
    source: &RemoteItemRef,
    destination: &RemoteItemRef,
) -> Result<(), TaskError> {
    let additional = task.extra().additional_data();
    let outcome = ctx
        .call(ctx.remote.copy_item(
            source,
            destination,
            task.source().name.as_deref(),
            &additional,
        ))
        .await?;

    match outcome {
        CopyOutcome::Completed => Ok(()),
        CopyOutcome::Accepted { monitor_url } => monitor(ctx, task, &monitor_url).await,
    }
}

async fn monitor(
    ctx: &OperationContext<'_>,
    task: &Arc<Task>,
    monitor_url: &Url,
) -> Result<(), TaskError> {
    let mut report = ctx.call(ctx.remote.monitor_status(monitor_url)).await?;
    loop {
        report_progress(ctx, task, report.percentage_complete);
        if !report.status.is_pending() {
            break;
        }
        ctx.pause().await?;
        report = ctx.call(ctx.remote.monitor_status(monitor_url)).await?;
    }

    match report.status {
        CopyJobStatus::Completed => Ok(()),
        CopyJobStatus::Failed => Err(TaskError::CopyFailed(
            report
                .error_message()
                .unwrap_or_else(|| "unknown error".to_string()),
        )),
        other => Err(TaskError::UnexpectedCopyStatus(other.to_string())),
    }
}

fn report_progress(ctx: &OperationContext<'_>, task: &Arc<Task>, progress: f64) {
    let task = Arc::clone(task);
    ctx.ui.dispatch(Box::new(move || task.set_progress(progress)));
}

/// Copies a folder by making sure a same-named folder exists under the
/// destination, then queueing one copy task per child.
async fn copy_folder(
    ctx: &OperationContext<'_>,
    task: &Arc<Task>,
    source: &RemoteItemRef,
    destination: &RemoteItemRef,
) -> Result<(), TaskError> {
    let name = task
        .source()
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or(TaskError::Validation("source folder has no name"))?;

    let siblings = ctx.call(ctx.remote.list_children(destination)).await?;
    let existing = siblings
        .into_iter()
        .find(|item| item.is_folder() && item.name.as_deref() == Some(name));
    let mut target = match existing {
        Some(folder) => folder,
        None => {
            ctx.call(ctx.remote.create_child(destination, name, true, &Map::new()))
                .await?
        }
    };
    if target.id.is_none() {
        return Err(TaskError::FolderNotCreated(name.to_string()));
    }
    if target.drive_id().is_none() {
        target.parent_reference = Some(destination.to_item_reference());
    }

    let children = ctx.call(ctx.remote.list_children(source)).await?;
    tracing::debug!(
        task = %task.id(),
        children = children.len(),
        target = ?target.id,
        "fanning out folder copy"
    );
    for child in children {
        let child = with_drive(child, source);
        let child_task = Task::new(
            ctx.sink.next_task_id(),
            Arc::clone(task.owner()),
            Operation::Copy,
            child,
            Some(target.clone()),
            task.extra().clone(),
        );
        ctx.sink.submit(Arc::new(child_task)).await?;
    }
    Ok(())
}

/// Listings do not always repeat the drive of each child.
fn with_drive(mut child: DriveItem, parent: &RemoteItemRef) -> DriveItem {
    if child.drive_id().is_none() {
        child.parent_reference = Some(parent.to_item_reference());
    }
    child
}
