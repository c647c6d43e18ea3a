//! Integration tests for the tenant task mutation pipeline.
//!
//! Covers authorization by tenant, validation ordering, preservation of
//! comments and the activity log across updates, completion stamping,
//! comment ownership, set semantics of assignment, and file attachment.
//!
//! Verification command: `cargo test --test task_pipeline`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use taskhub_proto::codec;
use taskhub_proto::hub::{CommentDeleted, ServerFrame, TaskPayload};
use taskhub_proto::task::{ActivityType, CommentId, Task, TaskDraft, TaskStatus, UserId};
use taskhub_server::dispatch::Dispatcher;
use taskhub_server::error::HubError;
use taskhub_server::groups::{GroupId, GroupRegistry, Outbound};
use taskhub_server::identity::Actor;
use taskhub_server::store::{MemoryTaskStore, TaskStore};
use taskhub_server::tasks::TaskService;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn setup() -> (
    Arc<MemoryTaskStore>,
    Arc<GroupRegistry>,
    TaskService<MemoryTaskStore>,
) {
    let store = Arc::new(MemoryTaskStore::new());
    let registry = Arc::new(GroupRegistry::new());
    let tasks = TaskService::new(
        Arc::clone(&store),
        Dispatcher::new(Arc::clone(&registry)),
    );
    (store, registry, tasks)
}

fn alice() -> Actor {
    Actor::new("t1", "u1", "alice")
}

fn bob() -> Actor {
    Actor::new("t1", "u2", "bob")
}

fn draft_with_status(status: &str) -> TaskDraft {
    TaskDraft {
        title: Some("Review contract".to_string()),
        description: Some("Check the renewal terms".to_string()),
        due_date: Some(Utc::now() + Duration::days(5)),
        status: Some(status.to_string()),
        criticality: Some("High".to_string()),
        ..TaskDraft::default()
    }
}

fn draft() -> TaskDraft {
    draft_with_status("ToDo")
}

fn subscribe(registry: &GroupRegistry, group: &str) -> mpsc::UnboundedReceiver<Outbound> {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = registry.register(tx);
    registry.join(conn, &GroupId::new(group)).unwrap();
    rx
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(text) = rx.try_recv() {
        frames.push(codec::decode_server(&text).unwrap());
    }
    frames
}

async fn stored(store: &MemoryTaskStore, task: &Task) -> Task {
    store.get(task.id).await.unwrap().unwrap()
}

// ---------------------------------------------------------------------------
// Create / update / delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_announces_to_tenant_only() {
    let (_store, registry, tasks) = setup();
    let mut t1 = subscribe(&registry, "t1");
    let mut t2 = subscribe(&registry, "t2");

    let task = tasks.create(&alice(), draft()).await.unwrap();

    assert_eq!(task.tenant_id.as_str(), "t1");
    assert_eq!(task.activity_log[0].activity_type, ActivityType::Created);
    assert!(matches!(
        drain(&mut t1).as_slice(),
        [ServerFrame::TaskCreated(t)] if t.id == task.id
    ));
    assert!(drain(&mut t2).is_empty());
}

#[tokio::test]
async fn update_preserves_comments_and_activity_log() {
    let (store, _registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();
    tasks.add_comment(&bob(), task.id, "Looks good").await.unwrap();

    let updated = tasks
        .update(
            &alice(),
            task.id,
            TaskDraft {
                title: Some("Review contract v2".to_string()),
                ..draft()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.title, "Review contract v2");
    assert_eq!(updated.comments.len(), 1);
    let kinds: Vec<_> = updated
        .activity_log
        .iter()
        .map(|e| e.activity_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            ActivityType::Created,
            ActivityType::Commented,
            ActivityType::Updated
        ]
    );
    assert_eq!(stored(&store, &task).await, updated);
}

#[tokio::test]
async fn status_change_beats_plain_update() {
    let (_store, _registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();

    let updated = tasks
        .update(&alice(), task.id, draft_with_status("InProgress"))
        .await
        .unwrap();

    let last = updated.activity_log.last().unwrap();
    assert_eq!(last.activity_type, ActivityType::StatusChanged);
    assert_eq!(last.old_value.as_deref(), Some("ToDo"));
    assert_eq!(last.new_value.as_deref(), Some("InProgress"));
    assert_eq!(updated.activity_log.len(), 2);
}

#[tokio::test]
async fn completed_at_is_stamped_once() {
    let (_store, _registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();

    let done = tasks
        .update(&alice(), task.id, draft_with_status("Done"))
        .await
        .unwrap();
    let first_completed = done.completed_at.unwrap();
    assert_eq!(done.completed_by.as_deref(), Some("alice"));

    tasks
        .update(&bob(), task.id, draft_with_status("InProgress"))
        .await
        .unwrap();
    let done_again = tasks
        .update(&bob(), task.id, draft_with_status("Done"))
        .await
        .unwrap();

    assert_eq!(done_again.completed_at, Some(first_completed));
    assert_eq!(done_again.completed_by.as_deref(), Some("alice"));
}

#[tokio::test]
async fn validation_failure_writes_nothing() {
    let (store, _registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();
    let before = stored(&store, &task).await;

    let err = tasks
        .update(
            &alice(),
            task.id,
            TaskDraft {
                criticality: Some("Extreme".to_string()),
                ..draft()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HubError::ValidationFailed {
            field: "criticality",
            ..
        }
    ));
    assert_eq!(stored(&store, &task).await, before);
}

#[tokio::test]
async fn blank_title_reported_before_later_fields() {
    let (_store, _registry, tasks) = setup();
    let err = tasks
        .create(
            &alice(),
            TaskDraft {
                title: Some("   ".to_string()),
                status: Some("Bogus".to_string()),
                due_date: None,
                ..draft()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::ValidationFailed { field: "title", .. }));
}

#[tokio::test]
async fn delete_returns_audited_snapshot() {
    let (store, registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();
    let mut t1 = subscribe(&registry, "t1");

    let snapshot = tasks.delete(&alice(), task.id).await.unwrap();

    assert_eq!(
        snapshot.activity_log.last().unwrap().activity_type,
        ActivityType::Deleted
    );
    assert!(store.get(task.id).await.unwrap().is_none());
    assert_eq!(drain(&mut t1), vec![ServerFrame::TaskDeleted(task.id)]);
    assert!(matches!(
        tasks.get(&alice(), task.id).await,
        Err(HubError::NotFound(_))
    ));
}

#[tokio::test]
async fn other_tenant_cannot_touch_task() {
    let (store, _registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();
    let mallory = Actor::new("t2", "u9", "mallory");

    assert!(matches!(
        tasks.delete(&mallory, task.id).await,
        Err(HubError::NotFound(_))
    ));
    assert!(matches!(
        tasks.add_comment(&mallory, task.id, "hi").await,
        Err(HubError::NotFound(_))
    ));
    assert!(tasks.list(&mallory).await.unwrap().is_empty());
    assert!(store.get(task.id).await.unwrap().is_some());
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn only_author_may_delete_comment() {
    let (store, registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();
    let comment = tasks
        .add_comment(&alice(), task.id, "my note")
        .await
        .unwrap();
    let mut t1 = subscribe(&registry, "t1");

    let err = tasks
        .delete_comment(&bob(), task.id, comment.id)
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Forbidden(_)));
    assert_eq!(stored(&store, &task).await.comments.len(), 1);

    tasks
        .delete_comment(&alice(), task.id, comment.id)
        .await
        .unwrap();
    let after = stored(&store, &task).await;
    assert!(after.comments.is_empty());
    assert_eq!(
        after.activity_log.last().unwrap().activity_type,
        ActivityType::CommentDeleted
    );
    assert_eq!(
        drain(&mut t1),
        vec![ServerFrame::CommentDeleted(CommentDeleted {
            task_id: task.id,
            comment_id: comment.id
        })]
    );
}

#[tokio::test]
async fn deleting_missing_comment_is_not_found() {
    let (_store, _registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();
    let err = tasks
        .delete_comment(&alice(), task.id, CommentId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::NotFound(_)));
}

#[tokio::test]
async fn blank_comment_rejected() {
    let (_store, _registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();
    let err = tasks.add_comment(&alice(), task.id, "  ").await.unwrap_err();
    assert!(matches!(err, HubError::ValidationFailed { field: "text", .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_never_drop_comments() {
    let (store, _registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let tasks = tasks.clone();
        let id = task.id;
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                tasks
                    .add_comment(&bob(), id, &format!("comment {i}"))
                    .await
                    .map(|_| ())
            } else {
                tasks.update(&alice(), id, draft()).await.map(|_| ())
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let after = stored(&store, &task).await;
    assert_eq!(after.comments.len(), 10);
    assert_eq!(after.activity_log.len(), 21);
    assert!(
        after
            .activity_log
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp)
    );
}

// ---------------------------------------------------------------------------
// Assignment and files
// ---------------------------------------------------------------------------

#[tokio::test]
async fn assign_and_unassign_are_set_operations() {
    let (_store, _registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();
    let u = |s: &str| UserId::new(s);

    let assigned = tasks
        .assign(&alice(), task.id, vec![u("u2"), u("u3"), u("u2")])
        .await
        .unwrap();
    assert_eq!(assigned.len(), 2);

    let assigned = tasks
        .assign(&alice(), task.id, vec![u("u3")])
        .await
        .unwrap();
    assert_eq!(assigned.len(), 2);

    let assigned = tasks
        .unassign(&alice(), task.id, vec![u("u3"), u("ghost")])
        .await
        .unwrap();
    assert_eq!(assigned.into_iter().collect::<Vec<_>>(), vec![u("u2")]);
}

#[tokio::test]
async fn assign_requires_user_ids() {
    let (_store, _registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();
    let err = tasks.assign(&alice(), task.id, Vec::new()).await.unwrap_err();
    assert!(matches!(err, HubError::ValidationFailed { field: "userIds", .. }));
}

#[tokio::test]
async fn files_attach_and_detach_broadcast_updates() {
    let (_store, registry, tasks) = setup();
    let task = tasks.create(&alice(), draft()).await.unwrap();
    let mut t1 = subscribe(&registry, "t1");

    let with_files = tasks
        .add_files(
            &alice(),
            task.id,
            vec!["uploads/a.pdf".to_string(), "uploads/b.png".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(with_files.files, vec!["uploads/a.pdf", "uploads/b.png"]);

    let without = tasks
        .remove_file(&alice(), task.id, "uploads/a.pdf")
        .await
        .unwrap();
    assert_eq!(without.files, vec!["uploads/b.png"]);
    assert_eq!(without.updated_by, "alice");

    let frames = drain(&mut t1);
    assert_eq!(frames.len(), 2);
    assert!(
        frames
            .iter()
            .all(|f| matches!(f, ServerFrame::TaskUpdated(TaskPayload::Full(_))))
    );
}

#[tokio::test]
async fn status_enum_rejects_lowercase() {
    let (_store, _registry, tasks) = setup();
    let err = tasks
        .create(&alice(), draft_with_status("done"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        HubError::validation("status", "must be one of: ToDo, InProgress, Done")
    );
    let task = tasks
        .create(&alice(), draft_with_status("Done"))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert!(task.completed_at.is_some());
}
