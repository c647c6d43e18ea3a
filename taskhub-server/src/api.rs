//! HTTP surface and server bootstrap.
//!
//! Routes are thin: they extract the [`Actor`], hand the request to a
//! service, and let [`HubError`] pick the status code.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use taskhub_proto::share::{
    PublicTaskPatch, PublicTaskView, ShareOptions, ShareReceipt, ShareState, ShareToken,
};
use taskhub_proto::task::{
    AssignRequest, Comment, CommentDraft, CommentId, FileRemoval, FilesRequest, Task, TaskDraft,
    TaskId, UserId,
};
use tokio::task::JoinHandle;

use crate::config::HubConfig;
use crate::dispatch::Dispatcher;
use crate::error::HubError;
use crate::groups::GroupRegistry;
use crate::hub;
use crate::identity::Actor;
use crate::reminders::{ReminderScanner, ReminderSummary};
use crate::share::ShareService;
use crate::store::TaskStore;
use crate::tasks::TaskService;

/// Shared server state: the services and the registry they publish through.
pub struct AppState<S> {
    /// Tenant-scoped task operations.
    pub tasks: TaskService<S>,
    /// Public share lifecycle.
    pub shares: ShareService<S>,
    /// Due-date reminders.
    pub reminders: ReminderScanner<S>,
    /// Event fan-out.
    pub dispatcher: Dispatcher,
    /// Resolved configuration.
    pub config: HubConfig,
}

impl<S: TaskStore> AppState<S> {
    /// Wires every service to one store and one fresh group registry.
    #[must_use]
    pub fn new(store: Arc<S>, config: HubConfig) -> Self {
        let dispatcher = Dispatcher::new(Arc::new(GroupRegistry::new()));
        Self {
            tasks: TaskService::new(Arc::clone(&store), dispatcher.clone()),
            shares: ShareService::new(Arc::clone(&store), dispatcher.clone()),
            reminders: ReminderScanner::new(store, dispatcher.clone()),
            dispatcher,
            config,
        }
    }
}

/// Builds the full router: hub endpoint, tenant API, public links, health.
pub fn router<S: TaskStore>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/hub/collaboration", get(hub::ws_handler::<S>))
        .route("/api/tasks", get(list_tasks::<S>).post(create_task::<S>))
        .route("/api/tasks/reminders", get(find_due::<S>))
        .route("/api/tasks/send-reminders", post(send_reminders::<S>))
        .route(
            "/api/tasks/{id}",
            get(get_task::<S>).put(update_task::<S>).delete(delete_task::<S>),
        )
        .route("/api/tasks/{id}/assign", post(assign::<S>))
        .route("/api/tasks/{id}/unassign", post(unassign::<S>))
        .route(
            "/api/tasks/{id}/files",
            post(add_files::<S>).delete(remove_file::<S>),
        )
        .route(
            "/api/tasks/{id}/comments",
            get(list_comments::<S>).post(add_comment::<S>),
        )
        .route(
            "/api/tasks/{id}/comments/{comment_id}",
            delete(delete_comment::<S>),
        )
        .route("/api/tasks/{id}/share", post(share_task::<S>))
        .route("/api/tasks/{id}/revoke-share", post(revoke_share::<S>))
        .route(
            "/public/task/{token}",
            get(resolve_public::<S>).put(update_public::<S>),
        )
        .route("/health", get(health::<S>))
        .with_state(state)
}

/// Starts the server with a pre-built [`AppState`] and returns the bound
/// address and a join handle. The handle also drives the heartbeat prune
/// sweep; aborting it stops both.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state<S: TaskStore>(
    addr: &str,
    state: Arc<AppState<S>>,
) -> Result<(SocketAddr, JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;
    let every = state.config.heartbeat();

    let handle = tokio::spawn(async move {
        tokio::select! {
            result = axum::serve(listener, app) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "server error");
                }
            }
            () = hub::prune_loop(state, every) => {}
        }
    });

    Ok((bound_addr, handle))
}

/// `?hours=N` on the reminder routes.
#[derive(Debug, Deserialize)]
struct HorizonQuery {
    hours: Option<i64>,
}

impl HorizonQuery {
    fn horizon(&self, default: chrono::Duration) -> Result<chrono::Duration, HubError> {
        match self.hours {
            None => Ok(default),
            Some(hours) => chrono::Duration::try_hours(hours)
                .filter(|_| hours > 0)
                .ok_or_else(|| HubError::validation("hours", "hours must be positive")),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssignedUsers {
    assigned_users: BTreeSet<UserId>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    connections: usize,
    groups: usize,
}

type AppResult<T> = Result<T, HubError>;

async fn list_tasks<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
) -> AppResult<Json<Vec<Task>>> {
    state.tasks.list(&actor).await.map(Json)
}

async fn create_task<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Json(draft): Json<TaskDraft>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let task = state.tasks.create(&actor, draft).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Path(id): Path<TaskId>,
) -> AppResult<Json<Task>> {
    state.tasks.get(&actor, id).await.map(Json)
}

async fn update_task<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Path(id): Path<TaskId>,
    Json(draft): Json<TaskDraft>,
) -> AppResult<Json<Task>> {
    state.tasks.update(&actor, id, draft).await.map(Json)
}

async fn delete_task<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Path(id): Path<TaskId>,
) -> AppResult<Json<Task>> {
    state.tasks.delete(&actor, id).await.map(Json)
}

async fn assign<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Path(id): Path<TaskId>,
    Json(req): Json<AssignRequest>,
) -> AppResult<Json<AssignedUsers>> {
    let assigned_users = state.tasks.assign(&actor, id, req.user_ids).await?;
    Ok(Json(AssignedUsers { assigned_users }))
}

async fn unassign<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Path(id): Path<TaskId>,
    Json(req): Json<AssignRequest>,
) -> AppResult<Json<AssignedUsers>> {
    let assigned_users = state.tasks.unassign(&actor, id, req.user_ids).await?;
    Ok(Json(AssignedUsers { assigned_users }))
}

async fn add_files<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Path(id): Path<TaskId>,
    Json(req): Json<FilesRequest>,
) -> AppResult<Json<Task>> {
    state.tasks.add_files(&actor, id, req.paths).await.map(Json)
}

async fn remove_file<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Path(id): Path<TaskId>,
    Json(req): Json<FileRemoval>,
) -> AppResult<Json<Task>> {
    state.tasks.remove_file(&actor, id, &req.path).await.map(Json)
}

async fn list_comments<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Path(id): Path<TaskId>,
) -> AppResult<Json<Vec<Comment>>> {
    state.tasks.comments(&actor, id).await.map(Json)
}

async fn add_comment<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Path(id): Path<TaskId>,
    Json(req): Json<CommentDraft>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let comment = state.tasks.add_comment(&actor, id, &req.text).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn delete_comment<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Path((id, comment_id)): Path<(TaskId, CommentId)>,
) -> AppResult<StatusCode> {
    state.tasks.delete_comment(&actor, id, comment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn share_task<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Path(id): Path<TaskId>,
    options: Option<Json<ShareOptions>>,
) -> AppResult<Json<ShareReceipt>> {
    let options = options.map(|Json(o)| o).unwrap_or_default();
    state.shares.share(&actor, id, &options).await.map(Json)
}

async fn revoke_share<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Path(id): Path<TaskId>,
) -> AppResult<Json<ShareState>> {
    state.shares.revoke(&actor, id).await.map(Json)
}

async fn find_due<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Query(query): Query<HorizonQuery>,
) -> AppResult<Json<Vec<Task>>> {
    let horizon = query.horizon(state.config.reminder_horizon)?;
    state
        .reminders
        .find_due(&actor.tenant_id, horizon)
        .await
        .map(Json)
}

async fn send_reminders<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    actor: Actor,
    Query(query): Query<HorizonQuery>,
) -> AppResult<Json<ReminderSummary>> {
    let horizon = query.horizon(state.config.reminder_horizon)?;
    state
        .reminders
        .send_reminders(&actor.tenant_id, horizon)
        .await
        .map(Json)
}

async fn resolve_public<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(token): Path<String>,
) -> AppResult<Json<PublicTaskView>> {
    state.shares.resolve(&ShareToken::new(token)).await.map(Json)
}

async fn update_public<S: TaskStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(token): Path<String>,
    Json(patch): Json<PublicTaskPatch>,
) -> AppResult<Json<PublicTaskView>> {
    state
        .shares
        .update_via_token(&ShareToken::new(token), patch)
        .await
        .map(Json)
}

async fn health<S: TaskStore>(State(state): State<Arc<AppState<S>>>) -> Json<Health> {
    let registry = state.dispatcher.registry();
    Json(Health {
        status: "ok",
        connections: registry.connection_count(),
        groups: registry.group_count(),
    })
}
