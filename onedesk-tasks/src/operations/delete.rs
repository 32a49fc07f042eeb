use std::sync::Arc;

use super::{OperationContext, TaskError, source_ref};
use crate::task::Task;

pub(super) async fn run(ctx: &OperationContext<'_>, task: &Arc<Task>) -> Result<(), TaskError> {
    let item = source_ref(task)?;
    ctx.call(ctx.remote.delete_item(&item)).await?;
    tracing::debug!(task = %task.id(), item = %item, "deleted item");
    Ok(())
}
