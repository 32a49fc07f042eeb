use std::sync::Arc;

use super::{OperationContext, TaskError, destination_ref};
use crate::task::Task;

pub(super) async fn run(ctx: &OperationContext<'_>, task: &Arc<Task>) -> Result<(), TaskError> {
    let parent = destination_ref(task)?;
    let name = task
        .source()
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or(TaskError::Validation("folder name is empty"))?;

    let additional = task.extra().additional_data();
    let created = ctx
        .call(ctx.remote.create_child(&parent, name, true, &additional))
        .await?;
    tracing::debug!(task = %task.id(), parent = %parent, id = ?created.id, "created folder");
    Ok(())
}
