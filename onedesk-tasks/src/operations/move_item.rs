use std::sync::Arc;

use super::{OperationContext, TaskError, destination_ref, source_ref};
use crate::task::Task;

/// Re-parents the source under the destination. A `new_name` in the extra
/// params turns the move into a rename.
pub(super) async fn run(ctx: &OperationContext<'_>, task: &Arc<Task>) -> Result<(), TaskError> {
    let item = source_ref(task)?;
    let destination = destination_ref(task)?;
    let name = task
        .extra()
        .new_name()
        .or(task.source().name.as_deref());

    let additional = task.extra().additional_data();
    ctx.call(
        ctx.remote
            .patch_parent_and_name(&item, &destination, name, &additional),
    )
    .await?;
    tracing::debug!(task = %task.id(), item = %item, destination = %destination, "moved item");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::operations::{Operation, TaskError};
    use crate::task::ExtraParams;
    use crate::test_support::{
        FakeDrive, RemoteCall, file, folder, run_operation, session, task_with_extra,
    };

    #[tokio::test]
    async fn keeps_source_name_by_default() {
        let drive = FakeDrive::new();
        let owner = session(1, drive.clone());
        let task = task_with_extra(
            &owner,
            Operation::Move,
            file("d1", "A", "A.txt"),
            Some(folder("d1", "T", "Target")),
            ExtraParams::new(),
        );

        run_operation(&drive, &task).await.unwrap();

        assert_eq!(
            drive.calls(),
            vec![RemoteCall::Patch {
                item: "d1!A".into(),
                destination: "d1!T".into(),
                name: Some("A.txt".into()),
            }]
        );
    }

    #[tokio::test]
    async fn new_name_renames_in_place() {
        let drive = FakeDrive::new();
        let owner = session(1, drive.clone());
        let task = task_with_extra(
            &owner,
            Operation::Move,
            file("d1", "A", "A.txt"),
            Some(folder("d1", "P", "Parent")),
            ExtraParams::new().with_new_name("B.txt"),
        );

        run_operation(&drive, &task).await.unwrap();

        assert_eq!(
            drive.calls(),
            vec![RemoteCall::Patch {
                item: "d1!A".into(),
                destination: "d1!P".into(),
                name: Some("B.txt".into()),
            }]
        );
    }

    #[tokio::test]
    async fn destination_is_required() {
        let drive = FakeDrive::new();
        let owner = session(1, drive.clone());
        let task = task_with_extra(
            &owner,
            Operation::Move,
            file("d1", "A", "A.txt"),
            None,
            ExtraParams::new(),
        );

        let err = run_operation(&drive, &task).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
        assert!(drive.calls().is_empty());
    }
}
