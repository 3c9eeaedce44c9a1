//! # API Handlers
//!
//! Axum handlers for the story endpoints. Store work is synchronous, so every
//! handler grabs the current snapshot and runs against it on the blocking
//! pool; a reload that lands mid-request does not affect that request.

use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stories_core::{SearchRequest, StoryHit, StoryRecord};
use stories_store::{Page, SchemaInfo, SnapshotInfo, Stats, StoreError};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/all", get(get_all))
        .route("/api/stats", get(get_stats))
        .route("/api/schema", get(get_schema))
        .route("/api/search", post(search))
        .route("/api/story/:id", get(get_story))
        .route("/api/reload", post(reload))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run store work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

async fn root(State(state): State<Arc<AppState>>) -> String {
    format!(
        "stories-hub {}: endpoints under /api (up {}s)\n",
        env!("CARGO_PKG_VERSION"),
        state.start_time.elapsed().as_secs()
    )
}

// =============================================================================
// Filter String
// =============================================================================

#[derive(Deserialize)]
pub struct AllParams {
    limit: Option<u32>,
    offset: Option<u32>,
    #[serde(default)]
    filter: String,
}

#[derive(Serialize)]
pub struct AllResponse {
    stories: Vec<StoryHit>,
    total: u64,
    unique_authors: u64,
    limit: u32,
    offset: u32,
    filter: String,
}

pub async fn get_all(
    State(state): State<Arc<AppState>>,
    params: Result<Query<AllParams>, QueryRejection>,
) -> Result<Json<AllResponse>, ApiError> {
    let Query(params) = params?;
    let limit = params
        .limit
        .unwrap_or(state.server.default_limit)
        .min(state.server.max_limit);
    let offset = params.offset.unwrap_or(0);

    let parsed = stories_core::parse(&params.filter);
    let query = stories_core::compile(&parsed.predicates, &parsed.free_text);

    let snapshot = state.store.snapshot();
    let outcome = blocking(move || snapshot.execute(&query, Page::new(limit, offset)))
        .await
        .map_err(|e| e.context("filter error"))?;

    Ok(Json(AllResponse {
        stories: outcome.rows,
        total: outcome.total,
        unique_authors: outcome.unique_authors,
        limit,
        offset,
        filter: params.filter,
    }))
}

// =============================================================================
// Structured Search
// =============================================================================

#[derive(Serialize)]
pub struct SearchResponse {
    count: usize,
    results: Vec<StoryHit>,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    request: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Json(request) = request?;
    let query = stories_core::compile_search(&request);
    let page = Page::new(state.server.search_limit, 0);

    let snapshot = state.store.snapshot();
    let results = blocking(move || snapshot.fetch(&query, page)).await?;

    Ok(Json(SearchResponse {
        count: results.len(),
        results,
    }))
}

// =============================================================================
// Lookup & Introspection
// =============================================================================

pub async fn get_story(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StoryRecord>, ApiError> {
    let snapshot = state.store.snapshot();
    let key = id.clone();
    blocking(move || snapshot.get_story(&key))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("story {} not found", id)))
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<Stats>, ApiError> {
    let snapshot = state.store.snapshot();
    Ok(Json(blocking(move || snapshot.stats()).await?))
}

pub async fn get_schema(State(state): State<Arc<AppState>>) -> Result<Json<SchemaInfo>, ApiError> {
    let snapshot = state.store.snapshot();
    Ok(Json(blocking(move || snapshot.schema()).await?))
}

// =============================================================================
// Reload
// =============================================================================

pub async fn reload(State(state): State<Arc<AppState>>) -> Result<Json<SnapshotInfo>, ApiError> {
    let path = state
        .data_file
        .clone()
        .ok_or_else(|| ApiError::BadRequest("no data file configured".into()))?;

    let next = blocking(move || state.store.reload(&path)).await?;
    Ok(Json(next.info()))
}
