//! Axum JSON API over the catalog index, wishlists and operator actions.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gamedex_core::{AppId, CatalogRecord, UserId, WishlistEntry};
use gamedex_index::{IndexEntry, WishlistError, WishlistOrder, NAME_SEARCH_LIMIT, TAG_COUNT_LIMIT, TAG_SEARCH_LIMIT};
use gamedex_sync::{build_services, maybe_build_scheduler, GamedexConfig, Services, SyncError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "gamedex-web";

/// Header carrying the caller identity for operator-only routes.
pub const OPERATOR_HEADER: &str = "x-operator-id";

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[derive(Debug, Serialize)]
struct GameView<'a> {
    #[serde(flatten)]
    record: &'a CatalogRecord,
    #[serde(rename = "TotalReviews")]
    total_reviews: u64,
}

impl<'a> From<&'a IndexEntry> for GameView<'a> {
    fn from(entry: &'a IndexEntry) -> Self {
        Self {
            record: &entry.record,
            total_reviews: entry.total_reviews,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NameQuery {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct WishlistQuery {
    sort: Option<WishlistOrder>,
}

/// Adds a catalog game by ID, or by exact name when no ID is given.
#[derive(Debug, Deserialize)]
struct AddRequest {
    id: Option<AppId>,
    name: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/games/by-name", get(game_by_name_handler))
        .route("/games/{id}", get(game_by_id_handler))
        .route("/search", get(search_handler))
        .route("/tags/{tag}", get(tag_handler))
        .route(
            "/users/{user}/wishlist",
            get(wishlist_handler).post(wishlist_add_handler).delete(wishlist_remove_handler),
        )
        .route("/users/{user}/wishlist/count", get(wishlist_count_handler))
        .route("/users/{user}/wishlist/import", post(wishlist_import_handler))
        .route("/users/{user}/wishlist/merge", post(wishlist_merge_handler))
        .route("/users/{user}/wishlist/tags", get(wishlist_tags_handler))
        .route("/admin/refresh/{id}", post(refresh_handler))
        .route("/admin/sync", post(sync_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = GamedexConfig::from_env();
    let services = build_services(&config).await?;
    let scheduler = maybe_build_scheduler(&config, Arc::clone(&services.engine)).await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!(cron = %config.sync_cron, "sync scheduler started");
    }
    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "serving catalog api");
    axum::serve(listener, app(AppState::new(services))).await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let (complete, incomplete) = state.services.engine.partition_sizes().await;
    Json(serde_json::json!({
        "indexed": state.services.index.len(),
        "complete": complete,
        "incomplete": incomplete,
    }))
    .into_response()
}

async fn game_by_id_handler(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<AppId>) -> Response {
    match state.services.index.get_by_id(id) {
        Some(entry) => Json(GameView::from(entry.as_ref())).into_response(),
        None => not_found(format!("no game with ID {id}")),
    }
}

async fn game_by_name_handler(State(state): State<Arc<AppState>>, Query(query): Query<NameQuery>) -> Response {
    match state.services.index.get_by_exact_name(&query.name) {
        Some(entry) => Json(GameView::from(entry.as_ref())).into_response(),
        None => not_found(format!("no game named {:?}", query.name.trim())),
    }
}

async fn search_handler(State(state): State<Arc<AppState>>, Query(query): Query<SearchQuery>) -> Response {
    let hits = state
        .services
        .index
        .search_by_name(&query.q, query.limit.unwrap_or(NAME_SEARCH_LIMIT));
    Json(hits.iter().map(|e| GameView::from(e.as_ref())).collect::<Vec<_>>()).into_response()
}

async fn tag_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(tag): AxumPath<String>,
    Query(query): Query<LimitQuery>,
) -> Response {
    let hits = state
        .services
        .index
        .search_by_tag(&tag, query.limit.unwrap_or(TAG_SEARCH_LIMIT));
    Json(hits.iter().map(|e| GameView::from(e.as_ref())).collect::<Vec<_>>()).into_response()
}

async fn wishlist_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<UserId>,
    Query(query): Query<WishlistQuery>,
) -> Response {
    let wishlists = &state.services.wishlists;
    let result = match query.sort {
        Some(order) => wishlists.sorted(user, order).await,
        None => wishlists.list(user).await,
    };
    match result {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn wishlist_count_handler(State(state): State<Arc<AppState>>, AxumPath(user): AxumPath<UserId>) -> Response {
    match state.services.wishlists.count(user).await {
        Ok(count) => Json(serde_json::json!({ "count": count })).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn wishlist_add_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<UserId>,
    Json(request): Json<AddRequest>,
) -> Response {
    let index = &state.services.index;
    let found = match (request.id, request.name.as_deref()) {
        (Some(id), _) => index.get_by_id(id),
        (None, Some(name)) => index.get_by_exact_name(name),
        (None, None) => return bad_request("either id or name is required"),
    };
    let Some(found) = found else {
        return not_found("game is not in the catalog".to_string());
    };
    let entry = WishlistEntry::from(&found.record);
    match state.services.wishlists.add(user, entry.clone()).await {
        Ok(added) => {
            let status = if added { StatusCode::CREATED } else { StatusCode::OK };
            (status, Json(serde_json::json!({ "added": added, "entry": entry }))).into_response()
        }
        Err(WishlistError::Rejected { entry, reason }) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": "entry does not match the catalog", "entry": entry, "reason": reason })),
        )
            .into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn wishlist_remove_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<UserId>,
    Query(query): Query<NameQuery>,
) -> Response {
    match state.services.wishlists.remove(user, &query.name).await {
        Ok(removed) => Json(serde_json::json!({ "removed": removed })).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn wishlist_import_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<UserId>,
    Json(entries): Json<Vec<WishlistEntry>>,
) -> Response {
    match state.services.wishlists.import(user, entries).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn wishlist_merge_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<UserId>,
    Json(entries): Json<Vec<WishlistEntry>>,
) -> Response {
    match state.services.wishlists.merge(user, entries).await {
        Ok((wishlist, report)) => Json(serde_json::json!({ "wishlist": wishlist, "report": report })).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn wishlist_tags_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(user): AxumPath<UserId>,
    Query(query): Query<LimitQuery>,
) -> Response {
    match state
        .services
        .wishlists
        .tag_counts(user, query.limit.unwrap_or(TAG_COUNT_LIMIT))
        .await
    {
        Ok(counts) => Json(counts).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<AppId>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    sync_response(state.services.engine.refresh(id).await)
}

async fn sync_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    sync_response(state.services.engine.run_sync().await)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let caller = headers
        .get(OPERATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<UserId>().ok());
    let Some(caller) = caller else {
        return Err(error_json(StatusCode::UNAUTHORIZED, "operator identity required".to_string()));
    };
    state
        .services
        .gate
        .authorize(caller)
        .map_err(|err| error_json(StatusCode::FORBIDDEN, err.to_string()))
}

fn sync_response(result: Result<gamedex_core::SyncReport, SyncError>) -> Response {
    match result {
        Ok(report) => Json(report).into_response(),
        Err(SyncError::Persist { report, source }) => {
            error!(error = %source, "sync results not persisted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": source.to_string(), "report": report })),
            )
                .into_response()
        }
        Err(err) => server_error(err.into()),
    }
}

fn error_json(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn not_found(message: String) -> Response {
    error_json(StatusCode::NOT_FOUND, message)
}

fn bad_request(message: &str) -> Response {
    error_json(StatusCode::BAD_REQUEST, message.to_string())
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %err, "request failed");
    error_json(StatusCode::INTERNAL_SERVER_ERROR, format!("Server error: {err}"))
}
