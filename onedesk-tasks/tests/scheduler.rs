use std::sync::Arc;
use std::time::Duration;

use onedesk_graph::{DriveItem, GraphClient};
use onedesk_tasks::{
    ExtraParams, Operation, Scheduler, SchedulerConfig, SerialDispatcher, Session, TaskEvent,
    TaskStatus, UserId, UserQueue,
};
use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn item(value: serde_json::Value) -> DriveItem {
    serde_json::from_value(value).unwrap()
}

fn file(id: &str, name: &str) -> DriveItem {
    item(json!({ "id": id, "name": name, "parentReference": { "driveId": "d1" } }))
}

fn folder(id: &str, name: &str) -> DriveItem {
    item(json!({
        "id": id,
        "name": name,
        "folder": { "childCount": 0 },
        "parentReference": { "driveId": "d1" }
    }))
}

fn scheduler(workers: usize) -> Scheduler {
    let config = SchedulerConfig::default()
        .with_workers(workers)
        .with_copy_poll_interval(Duration::from_millis(20));
    Scheduler::start(config, Arc::new(SerialDispatcher::spawn())).unwrap()
}

fn session(server: &MockServer) -> Arc<Session> {
    let client = GraphClient::with_base_url(&server.uri(), "test-token").unwrap();
    Arc::new(Session::new(UserId(1), "alice", Arc::new(client)))
}

async fn wait_until(queue: &UserQueue, done: impl Fn(&UserQueue) -> bool) {
    let mut revisions = queue.watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(queue) {
            if revisions.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .unwrap();
}

fn finished(queue: &UserQueue) -> usize {
    let counts = queue.counts();
    counts.completed + counts.cancelled + counts.failed
}

#[tokio::test]
async fn finished_tasks_are_split_into_completed_and_failed() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/drives/d1/items/ok"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/drives/d1/items/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "itemNotFound", "message": "Item does not exist" }
        })))
        .mount(&server)
        .await;

    let scheduler = scheduler(5);
    let owner = session(&server);
    let queue = scheduler.add_session(&owner).await.unwrap();

    let ok = scheduler.new_task(
        Arc::clone(&owner),
        Operation::Delete,
        file("ok", "a.txt"),
        None,
        ExtraParams::new(),
    );
    let missing = scheduler.new_task(
        Arc::clone(&owner),
        Operation::Delete,
        file("missing", "b.txt"),
        None,
        ExtraParams::new(),
    );
    scheduler.submit(Arc::clone(&ok)).await.unwrap();
    scheduler.submit(Arc::clone(&missing)).await.unwrap();
    wait_until(&queue, |queue| finished(queue) == 2).await;

    assert_eq!(queue.completed().len(), 1);
    assert_eq!(queue.completed()[0].id(), ok.id());
    assert_eq!(queue.failed().len(), 1);
    let failure = missing.snapshot();
    assert_eq!(failure.status, TaskStatus::Failed);
    assert!(failure.ended_at.is_some());
    assert!(
        failure
            .failure_reason
            .unwrap()
            .contains("Item does not exist")
    );

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn priority_task_is_not_blocked_by_busy_workers() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/v1\.0/drives/d1/items/slow-\d$"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(1500)))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/drives/d1/items/fast"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let scheduler = scheduler(5);
    let owner = session(&server);
    let queue = scheduler.add_session(&owner).await.unwrap();
    let mut priority_done = scheduler.subscribe_priority_completed();

    for i in 0..5 {
        let task = scheduler.new_task(
            Arc::clone(&owner),
            Operation::Delete,
            file(&format!("slow-{i}"), "slow.bin"),
            None,
            ExtraParams::new(),
        );
        scheduler.submit(task).await.unwrap();
    }
    wait_until(&queue, |queue| queue.counts().running == 5).await;

    let urgent = scheduler.new_task(
        Arc::clone(&owner),
        Operation::Delete,
        file("fast", "fast.bin"),
        None,
        ExtraParams::new(),
    );
    scheduler.submit_priority(Arc::clone(&urgent)).unwrap();

    tokio::time::timeout(Duration::from_secs(1), priority_done.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(urgent.status(), TaskStatus::Completed);
    assert_eq!(queue.counts().running, 5);
    assert!(queue.pending().is_empty());
    assert!(queue.completed().iter().all(|task| task.id() != urgent.id()));

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn removing_a_user_cancels_pending_tasks_without_running_them() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/drives/d1/items/busy"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/v1\.0/drives/d1/items/queued-\d$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let scheduler = scheduler(1);
    let owner = session(&server);
    let queue = scheduler.add_session(&owner).await.unwrap();

    let busy = scheduler.new_task(
        Arc::clone(&owner),
        Operation::Delete,
        file("busy", "busy.bin"),
        None,
        ExtraParams::new(),
    );
    scheduler.submit(Arc::clone(&busy)).await.unwrap();
    wait_until(&queue, |queue| queue.counts().running == 1).await;

    let mut queued = Vec::new();
    for i in 0..2 {
        let task = scheduler.new_task(
            Arc::clone(&owner),
            Operation::Delete,
            file(&format!("queued-{i}"), "queued.bin"),
            None,
            ExtraParams::new(),
        );
        let events = task.subscribe();
        scheduler.submit(Arc::clone(&task)).await.unwrap();
        queued.push((task, events));
    }
    assert_eq!(queue.counts().pending, 2);

    assert!(scheduler.remove_session(owner.id()).await.unwrap());
    assert!(scheduler.user_queue(owner.id()).is_none());

    let mut busy_events = busy.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !busy.status().is_finished() {
            let _ = busy_events.recv().await;
        }
    })
    .await
    .unwrap();
    // Let the worker reach the orphaned lane entries.
    tokio::time::sleep(Duration::from_millis(200)).await;

    for (task, mut events) in queued {
        let snapshot = task.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        assert!(snapshot.ended_at.is_some());
        assert!(snapshot.started_at.is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            TaskEvent::Status(TaskStatus::Cancelled)
        );
        assert!(events.try_recv().is_err());
    }
    assert_eq!(busy.status(), TaskStatus::Completed);
    assert_eq!(queue.counts().pending, 0);
    assert!(queue.completed().is_empty());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn accepted_copy_reports_monitor_progress() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1.0/drives/d1/items/src/copy"))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("Location", format!("{}/monitor/job-1", server.uri()).as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/monitor/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "inProgress",
            "percentageComplete": 50.0
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/monitor/job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "percentageComplete": 100.0
        })))
        .mount(&server)
        .await;

    let scheduler = scheduler(5);
    let owner = session(&server);
    let queue = scheduler.add_session(&owner).await.unwrap();

    let task = scheduler.new_task(
        Arc::clone(&owner),
        Operation::Copy,
        file("src", "report.pdf"),
        Some(folder("dst", "Archive")),
        ExtraParams::new(),
    );
    let mut events = task.subscribe();
    scheduler.submit(Arc::clone(&task)).await.unwrap();
    wait_until(&queue, |queue| finished(queue) == 1).await;

    let mut progress = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let TaskEvent::Progress(value) = event {
            progress.push(value);
        }
    }
    assert_eq!(progress, [50.0, 100.0]);
    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(task.progress(), 100.0);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn folder_copy_fans_out_into_the_owner_queue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/drives/d1/items/dst/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1.0/drives/d1/items/dst/children"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "made",
            "name": "Photos",
            "folder": { "childCount": 0 },
            "parentReference": { "driveId": "d1", "id": "dst" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/drives/d1/items/photos/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                { "id": "p1", "name": "1.jpg", "parentReference": { "driveId": "d1" } },
                { "id": "p2", "name": "2.jpg", "parentReference": { "driveId": "d1" } },
                { "id": "p3", "name": "3.jpg", "parentReference": { "driveId": "d1" } }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/v1\.0/drives/d1/items/p\d/copy$"))
        .respond_with(ResponseTemplate::new(201))
        .expect(3)
        .mount(&server)
        .await;

    let scheduler = scheduler(5);
    let owner = session(&server);
    let queue = scheduler.add_session(&owner).await.unwrap();

    let task = scheduler.new_task(
        Arc::clone(&owner),
        Operation::Copy,
        folder("photos", "Photos"),
        Some(folder("dst", "Backup")),
        ExtraParams::new(),
    );
    scheduler.submit(Arc::clone(&task)).await.unwrap();
    wait_until(&queue, |queue| finished(queue) == 4).await;

    let completed = queue.completed();
    assert_eq!(completed.len(), 4);
    let children: Vec<_> = completed
        .iter()
        .filter(|child| child.id() != task.id())
        .collect();
    assert_eq!(children.len(), 3);
    for child in children {
        assert_eq!(child.owner_id(), owner.id());
        assert_eq!(
            child.destination().and_then(|d| d.id.as_deref()),
            Some("made")
        );
    }

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_cancels_the_running_task() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/drives/d1/items/stuck"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/drives/d1/items/waiting"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let scheduler = scheduler(1);
    let owner = session(&server);
    let queue = scheduler.add_session(&owner).await.unwrap();

    let stuck = scheduler.new_task(
        Arc::clone(&owner),
        Operation::Delete,
        file("stuck", "stuck.bin"),
        None,
        ExtraParams::new(),
    );
    let waiting = scheduler.new_task(
        Arc::clone(&owner),
        Operation::Delete,
        file("waiting", "waiting.bin"),
        None,
        ExtraParams::new(),
    );
    scheduler.submit(Arc::clone(&stuck)).await.unwrap();
    wait_until(&queue, |queue| queue.counts().running == 1).await;
    scheduler.submit(Arc::clone(&waiting)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), scheduler.shutdown())
        .await
        .unwrap()
        .unwrap();

    let snapshot = stuck.snapshot();
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert!(snapshot.started_at.is_some());
    assert!(snapshot.ended_at.is_some());
    assert_eq!(queue.cancelled()[0].id(), stuck.id());
    let counts = queue.counts();
    assert_eq!(counts.running, 0);
    assert_eq!(counts.cancelled, 1);
    assert_eq!(counts.pending, 1);
    assert_eq!(waiting.status(), TaskStatus::Pending);
}
