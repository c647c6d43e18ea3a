//! Integration tests for group membership and broadcast fan-out.
//!
//! Verification command: `cargo test --test group_broadcast`

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use taskhub_proto::codec;
use taskhub_proto::hub::{ServerFrame, TaskPayload};
use taskhub_proto::share::ShareOptions;
use taskhub_proto::task::{TaskDraft, UserId};
use taskhub_server::dispatch::{Broadcast, Dispatcher};
use taskhub_server::groups::{ConnectionId, GroupId, GroupRegistry, Outbound};
use taskhub_server::identity::Actor;
use taskhub_server::share::ShareService;
use taskhub_server::store::MemoryTaskStore;
use taskhub_server::tasks::TaskService;
use tokio::sync::mpsc;

fn connect(
    registry: &GroupRegistry,
    groups: &[&str],
) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = registry.register(tx);
    for group in groups {
        registry.join(conn, &GroupId::new(*group)).unwrap();
    }
    (conn, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(text) = rx.try_recv() {
        frames.push(codec::decode_server(&text).unwrap());
    }
    frames
}

fn draft(title: &str) -> TaskDraft {
    TaskDraft {
        title: Some(title.to_string()),
        description: Some("details".to_string()),
        due_date: Some(Utc::now() + Duration::hours(6)),
        status: Some("ToDo".to_string()),
        criticality: Some("Low".to_string()),
        ..TaskDraft::default()
    }
}

#[tokio::test]
async fn two_members_observe_updates_in_the_same_order() {
    let registry = Arc::new(GroupRegistry::new());
    let store = Arc::new(MemoryTaskStore::new());
    let tasks = TaskService::new(store, Dispatcher::new(Arc::clone(&registry)));
    let actor = Actor::new("t1", "u1", "alice");
    let task = tasks.create(&actor, draft("first")).await.unwrap();

    let (_a, mut rx_a) = connect(&registry, &["t1"]);
    let (_b, mut rx_b) = connect(&registry, &["t1"]);

    tasks
        .update(&actor, task.id, draft("second"))
        .await
        .unwrap();
    tasks.update(&actor, task.id, draft("third")).await.unwrap();

    let titles = |frames: Vec<ServerFrame>| -> Vec<String> {
        frames
            .into_iter()
            .map(|f| match f {
                ServerFrame::TaskUpdated(TaskPayload::Full(t)) => t.title,
                other => panic!("unexpected frame {other:?}"),
            })
            .collect()
    };
    let seen_a = titles(drain(&mut rx_a));
    let seen_b = titles(drain(&mut rx_b));
    assert_eq!(seen_a, vec!["second", "third"]);
    assert_eq!(seen_a, seen_b);
}

#[tokio::test]
async fn members_observe_updates_to_different_tasks_in_the_same_order() {
    let registry = Arc::new(GroupRegistry::new());
    let tasks = TaskService::new(
        Arc::new(MemoryTaskStore::new()),
        Dispatcher::new(Arc::clone(&registry)),
    );
    let actor = Actor::new("t1", "u1", "alice");
    let first = tasks.create(&actor, draft("first")).await.unwrap();
    let second = tasks.create(&actor, draft("second")).await.unwrap();

    let (_a, mut rx_a) = connect(&registry, &["t1"]);
    let (_b, mut rx_b) = connect(&registry, &["t1"]);

    tasks.update(&actor, first.id, draft("first, edited")).await.unwrap();
    tasks.update(&actor, second.id, draft("second, edited")).await.unwrap();
    tasks.update(&actor, first.id, draft("first, again")).await.unwrap();

    let ids = |frames: Vec<ServerFrame>| -> Vec<_> {
        frames
            .into_iter()
            .map(|f| match f {
                ServerFrame::TaskUpdated(TaskPayload::Full(t)) => (t.id, t.title),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect()
    };
    let seen_a = ids(drain(&mut rx_a));
    let seen_b = ids(drain(&mut rx_b));
    assert_eq!(
        seen_a,
        vec![
            (first.id, "first, edited".to_string()),
            (second.id, "second, edited".to_string()),
            (first.id, "first, again".to_string()),
        ]
    );
    assert_eq!(seen_a, seen_b);
}

#[tokio::test]
async fn share_group_gets_projection_tenant_gets_full_record() {
    let registry = Arc::new(GroupRegistry::new());
    let store = Arc::new(MemoryTaskStore::new());
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let tasks = TaskService::new(Arc::clone(&store), dispatcher.clone());
    let shares = ShareService::new(store, dispatcher);
    let actor = Actor::new("t1", "u1", "alice");

    let task = tasks.create(&actor, draft("shared")).await.unwrap();
    let receipt = shares
        .share(&actor, task.id, &ShareOptions::default())
        .await
        .unwrap();
    let (_tenant, mut tenant_rx) = connect(&registry, &["t1"]);
    let (_viewer, mut viewer_rx) = connect(&registry, &[receipt.public_share_id.as_str()]);

    tasks
        .assign(&actor, task.id, vec![UserId::new("u7")])
        .await
        .unwrap();

    let tenant_frames = drain(&mut tenant_rx);
    assert!(matches!(
        tenant_frames.as_slice(),
        [ServerFrame::TaskUpdated(TaskPayload::Full(t))] if t.assigned_users.contains(&UserId::new("u7"))
    ));

    let raw = viewer_rx.try_recv().unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["type"], "TaskUpdated");
    assert!(json["payload"].get("tenantId").is_none());
    assert!(json["payload"].get("assignedUsers").is_none());
    assert_eq!(json["payload"]["title"], "shared");
}

#[tokio::test]
async fn share_group_sees_comment_changes_without_comment_text() {
    let registry = Arc::new(GroupRegistry::new());
    let store = Arc::new(MemoryTaskStore::new());
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let tasks = TaskService::new(Arc::clone(&store), dispatcher.clone());
    let shares = ShareService::new(store, dispatcher);
    let actor = Actor::new("t1", "u1", "alice");

    let task = tasks.create(&actor, draft("discussed")).await.unwrap();
    let receipt = shares
        .share(&actor, task.id, &ShareOptions::default())
        .await
        .unwrap();
    let (_tenant, mut tenant_rx) = connect(&registry, &["t1"]);
    let (_viewer, mut viewer_rx) = connect(&registry, &[receipt.public_share_id.as_str()]);

    let comment = tasks
        .add_comment(&actor, task.id, "private remark")
        .await
        .unwrap();
    tasks
        .delete_comment(&actor, task.id, comment.id)
        .await
        .unwrap();

    assert!(matches!(
        drain(&mut tenant_rx).as_slice(),
        [ServerFrame::CommentAdded(_), ServerFrame::CommentDeleted(_)]
    ));

    let mut raw = Vec::new();
    while let Ok(text) = viewer_rx.try_recv() {
        raw.push(text);
    }
    assert_eq!(raw.len(), 2);
    for text in &raw {
        assert!(!text.contains("private remark"));
        let json: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(json["type"], "TaskUpdated");
        assert!(json["payload"].get("comments").is_none());
        assert!(json["payload"].get("tenantId").is_none());
        assert_eq!(json["payload"]["title"], "discussed");
    }
}

#[tokio::test]
async fn unshared_task_comments_reach_only_the_tenant() {
    let registry = Arc::new(GroupRegistry::new());
    let tasks = TaskService::new(
        Arc::new(MemoryTaskStore::new()),
        Dispatcher::new(Arc::clone(&registry)),
    );
    let actor = Actor::new("t1", "u1", "alice");
    let task = tasks.create(&actor, draft("quiet")).await.unwrap();
    let (_tenant, mut tenant_rx) = connect(&registry, &["t1"]);

    tasks.add_comment(&actor, task.id, "hello").await.unwrap();

    assert!(matches!(
        drain(&mut tenant_rx).as_slice(),
        [ServerFrame::CommentAdded(_)]
    ));
    assert_eq!(registry.group_count(), 1);
}

#[test]
fn other_tenants_receive_nothing() {
    let registry = Arc::new(GroupRegistry::new());
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let (_t1, mut rx_t1) = connect(&registry, &["t1"]);
    let (_t2, mut rx_t2) = connect(&registry, &["t2"]);

    let delivery = dispatcher.dispatch(&GroupId::new("t1"), &ServerFrame::Error {
        reason: "ping".to_string(),
    });

    assert_eq!(delivery.delivered, 1);
    assert_eq!(drain(&mut rx_t1).len(), 1);
    assert!(drain(&mut rx_t2).is_empty());
}

#[test]
fn dead_receiver_does_not_block_others_and_is_pruned_lazily() {
    let registry = Arc::new(GroupRegistry::new());
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let (dead, dead_rx) = connect(&registry, &["t1"]);
    let (_live, mut live_rx) = connect(&registry, &["t1"]);
    drop(dead_rx);

    let frame = ServerFrame::Error {
        reason: "hello".to_string(),
    };
    let delivery = dispatcher.dispatch(&GroupId::new("t1"), &frame);
    assert_eq!(delivery.delivered, 1);
    assert_eq!(delivery.failed, 1);
    assert_eq!(drain(&mut live_rx), vec![frame]);

    // Still a member until the sweep runs.
    assert_eq!(registry.group_size(&GroupId::new("t1")), 2);
    assert_eq!(registry.prune_closed(), vec![dead]);
    assert_eq!(registry.group_size(&GroupId::new("t1")), 1);
    assert!(registry.groups_of(dead).is_empty());
}

#[test]
fn unregister_leaves_every_group_and_collects_empty_ones() {
    let registry = GroupRegistry::new();
    let (conn, _rx) = connect(&registry, &["t1", "u1", "token-abc"]);
    assert_eq!(registry.group_count(), 3);

    assert_eq!(registry.unregister(conn), Some(3));
    assert_eq!(registry.group_count(), 0);
    assert_eq!(registry.connection_count(), 0);
}

#[test]
fn tenant_only_broadcast_skips_share_group() {
    let registry = Arc::new(GroupRegistry::new());
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let (_viewer, mut viewer_rx) = connect(&registry, &["tok"]);
    let (_member, mut member_rx) = connect(&registry, &["t1"]);

    let mut broadcast = Broadcast {
        tenant_id: "t1".into(),
        share_token: Some(taskhub_proto::share::ShareToken::new("tok")),
        tenant_frame: ServerFrame::Left {
            group: "x".to_string(),
        },
        share_frame: None,
    };
    dispatcher.publish(&broadcast);
    assert_eq!(drain(&mut viewer_rx).len(), 1);
    assert_eq!(drain(&mut member_rx).len(), 1);

    broadcast = broadcast.tenant_only();
    dispatcher.publish(&broadcast);
    assert!(drain(&mut viewer_rx).is_empty());
    assert_eq!(drain(&mut member_rx).len(), 1);
}
