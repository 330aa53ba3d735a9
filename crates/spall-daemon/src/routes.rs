//! The HTTP route table.
//!
//! JSON in, JSON out; streaming endpoints answer `text/event-stream`.
//! Not-found errors map to 404 bodies `{code, message}`, everything
//! else to 500 with the same shape.

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::error;

use spall_core::{now_ms, CorpusId, Error, Event, NoteId, QueryId, WorkspaceId};
use spall_pipeline::paths::canonicalize;
use spall_query::SearchMode;

use crate::sse::{global_events, stream_operation};
use crate::AppHandle;

const DEFAULT_LIST_LIMIT: usize = 50;
const DEFAULT_SEARCH_LIMIT: usize = 10;
const DEFAULT_RECENT_LIMIT: usize = 10;

pub fn router(app: AppHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/events", get(events))
        .route("/shutdown", post(shutdown))
        .route("/workspace/", post(workspace_create).get(workspace_get))
        .route("/workspace/list", get(workspace_list))
        .route("/workspace/{id}", delete(workspace_delete))
        .route("/corpus/", post(corpus_create).get(corpus_get))
        .route("/corpus/list", get(corpus_list))
        .route("/corpus/{id}", delete(corpus_delete))
        .route("/corpus/{id}/list", get(corpus_note_paths))
        .route("/corpus/{id}/notes", get(corpus_notes))
        .route(
            "/corpus/{id}/note/{*path}",
            get(corpus_note_get).put(corpus_note_upsert),
        )
        .route("/corpus/note", post(note_add))
        .route("/corpus/sync", post(corpus_sync))
        .route("/note/{id}", get(note_get).put(note_update))
        .route("/query/", post(query_create))
        .route("/query/recent", get(query_recent))
        .route("/query/{id}", get(query_get))
        .route("/query/{id}/notes", get(query_notes))
        .route("/query/{id}/search", get(query_search))
        .route("/query/{id}/vsearch", get(query_vsearch))
        .route("/query/{id}/fetch", post(query_fetch))
        .route("/query/{id}/paths", get(query_paths))
        .route("/commit/", post(commit))
        .route("/sse/corpus/sync", post(sse_sync))
        .route("/sse/corpus/note", post(sse_note_add))
        .route("/sse/corpus/{id}/note/{*path}", put(sse_note_upsert))
        .route("/sse/note/{id}", put(sse_note_update))
        .layer(middleware::from_fn_with_state(app.clone(), track_requests))
        .with_state(app)
}

/// Counts every in-flight request for the idle tracker.
async fn track_requests(State(app): State<AppHandle>, req: Request, next: Next) -> Response {
    let _guard = app.idle.request_guard();
    next.run(req).await
}

/// Route-boundary error wrapper.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {}", self.0);
        }
        (status, Json(crate::error_body(&self.0))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn health() -> impl IntoResponse {
    Json("ok")
}

async fn stats(State(app): State<AppHandle>) -> ApiResult<impl IntoResponse> {
    Ok(Json(app.storage.stats()?))
}

async fn events(State(app): State<AppHandle>) -> impl IntoResponse {
    global_events(&app).await
}

/// Acknowledges, then terminates itself; the signal path releases the
/// lock.
async fn shutdown(State(_app): State<AppHandle>) -> impl IntoResponse {
    let pid = std::process::id();
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        crate::lock::terminate_pid(pid);
    });
    Json(serde_json::json!({"ok": true}))
}

// ---- workspaces ----

#[derive(Deserialize)]
struct NameBody {
    name: String,
}

#[derive(Deserialize)]
struct NameOrIdParams {
    name: Option<String>,
    id: Option<i64>,
}

async fn workspace_create(
    State(app): State<AppHandle>,
    Json(body): Json<NameBody>,
) -> ApiResult<impl IntoResponse> {
    let (workspace, created) = app.storage.get_or_create_workspace(&body.name)?;
    let event = if created {
        Event::WorkspaceCreated {
            info: workspace.clone(),
        }
    } else {
        Event::WorkspaceUpdated {
            info: workspace.clone(),
        }
    };
    app.bus.publish(event).await;
    Ok(Json(workspace))
}

async fn workspace_get(
    State(app): State<AppHandle>,
    Query(params): Query<NameOrIdParams>,
) -> ApiResult<impl IntoResponse> {
    let workspace = match (params.name, params.id) {
        (Some(name), _) => app.storage.get_workspace_by_name(&name)?,
        (None, Some(id)) => app.storage.get_workspace_by_id(WorkspaceId(id))?,
        (None, None) => return Err(Error::WorkspaceNotFound("missing name or id".into()).into()),
    };
    Ok(Json(workspace))
}

async fn workspace_list(State(app): State<AppHandle>) -> ApiResult<impl IntoResponse> {
    Ok(Json(app.storage.list_workspaces()?))
}

async fn workspace_delete(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    app.storage.remove_workspace(WorkspaceId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- corpora ----

async fn corpus_create(
    State(app): State<AppHandle>,
    Json(body): Json<NameBody>,
) -> ApiResult<impl IntoResponse> {
    let (corpus, created) = app.storage.get_or_create_corpus(&body.name)?;
    let event = if created {
        Event::CorpusCreated {
            info: corpus.clone(),
        }
    } else {
        Event::CorpusUpdated {
            info: corpus.clone(),
        }
    };
    app.bus.publish(event).await;
    Ok(Json(corpus))
}

async fn corpus_get(
    State(app): State<AppHandle>,
    Query(params): Query<NameOrIdParams>,
) -> ApiResult<impl IntoResponse> {
    let corpus = match (params.name, params.id) {
        (Some(name), _) => app.storage.get_corpus_by_name(&name)?,
        (None, Some(id)) => app.storage.get_corpus_by_id(CorpusId(id))?,
        (None, None) => return Err(Error::CorpusNotFound("missing name or id".into()).into()),
    };
    Ok(Json(corpus))
}

async fn corpus_list(State(app): State<AppHandle>) -> ApiResult<impl IntoResponse> {
    Ok(Json(app.storage.list_corpora()?))
}

async fn corpus_delete(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    app.storage.remove_corpus(CorpusId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn corpus_note_paths(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    app.storage.get_corpus_by_id(CorpusId(id))?;
    let notes = app.storage.list_notes(CorpusId(id))?;
    let listing: Vec<serde_json::Value> = notes
        .into_iter()
        .map(|n| serde_json::json!({"id": n.id, "path": n.path}))
        .collect();
    Ok(Json(listing))
}

#[derive(Deserialize)]
struct NotesParams {
    path: Option<String>,
    after: Option<String>,
    limit: Option<usize>,
}

async fn corpus_notes(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
    Query(params): Query<NotesParams>,
) -> ApiResult<impl IntoResponse> {
    app.storage.get_corpus_by_id(CorpusId(id))?;
    let page = app.storage.list_notes_by_path(
        &[CorpusId(id)],
        params.path.as_deref().unwrap_or("*"),
        params.after.as_deref(),
        params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
    )?;
    Ok(Json(page))
}

// ---- notes ----

#[derive(Deserialize)]
struct AddNoteBody {
    corpus: i64,
    path: String,
    content: String,
    #[serde(default)]
    dupe: bool,
}

#[derive(Deserialize)]
struct NoteContentBody {
    content: String,
    #[serde(default)]
    dupe: bool,
}

async fn note_add(
    State(app): State<AppHandle>,
    Json(body): Json<AddNoteBody>,
) -> ApiResult<impl IntoResponse> {
    let path = canonicalize(&body.path);
    let note = app
        .storage
        .add_note(CorpusId(body.corpus), &path, &body.content, body.dupe)?;
    app.bus
        .publish(Event::NoteCreated { info: note.clone() })
        .await;
    Ok(Json(note))
}

async fn corpus_note_get(
    State(app): State<AppHandle>,
    Path((id, path)): Path<(i64, String)>,
) -> ApiResult<impl IntoResponse> {
    let note = app.storage.get_note(CorpusId(id), &canonicalize(&path))?;
    Ok(Json(note))
}

async fn corpus_note_upsert(
    State(app): State<AppHandle>,
    Path((id, path)): Path<(i64, String)>,
    Json(body): Json<NoteContentBody>,
) -> ApiResult<impl IntoResponse> {
    app.storage.get_corpus_by_id(CorpusId(id))?;
    let path = canonicalize(&path);
    let (note, created) =
        app.storage
            .upsert_note(CorpusId(id), &path, &body.content, body.dupe)?;
    let event = if created {
        Event::NoteCreated { info: note.clone() }
    } else {
        Event::NoteUpdated { info: note.clone() }
    };
    app.bus.publish(event).await;
    Ok(Json(note))
}

async fn note_get(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(app.storage.get_note_by_id(NoteId(id))?))
}

async fn note_update(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
    Json(body): Json<NoteContentBody>,
) -> ApiResult<impl IntoResponse> {
    let note = app.storage.update_note(NoteId(id), &body.content, body.dupe)?;
    app.bus
        .publish(Event::NoteUpdated { info: note.clone() })
        .await;
    Ok(Json(note))
}

// ---- sync ----

#[derive(Deserialize)]
struct SyncBody {
    corpus: i64,
    dir: String,
    glob: String,
    #[serde(default)]
    prefix: Option<String>,
}

async fn corpus_sync(
    State(app): State<AppHandle>,
    Json(body): Json<SyncBody>,
) -> ApiResult<impl IntoResponse> {
    let provider = app.provider().await?;
    let ctx = spall_core::RequestContext::new();
    spall_pipeline::sync(
        &app.storage,
        &provider,
        &app.bus,
        &ctx,
        std::path::Path::new(&body.dir),
        &body.glob,
        CorpusId(body.corpus),
        body.prefix.as_deref().unwrap_or(""),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- queries ----

#[derive(Deserialize)]
struct CreateQueryBody {
    viewer: i64,
    #[serde(default)]
    tracked: bool,
    corpora: Vec<i64>,
}

#[derive(Deserialize)]
struct RecentParams {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    path: Option<String>,
    limit: Option<usize>,
    mode: Option<String>,
}

#[derive(Deserialize)]
struct PathParams {
    path: Option<String>,
}

#[derive(Deserialize)]
struct FetchBody {
    ids: Vec<i64>,
}

async fn query_create(
    State(app): State<AppHandle>,
    Json(body): Json<CreateQueryBody>,
) -> ApiResult<impl IntoResponse> {
    let corpora: Vec<CorpusId> = body.corpora.into_iter().map(CorpusId).collect();
    let query = app
        .engine
        .create(WorkspaceId(body.viewer), body.tracked, &corpora)?;
    Ok(Json(query))
}

async fn query_recent(
    State(app): State<AppHandle>,
    Query(params): Query<RecentParams>,
) -> ApiResult<impl IntoResponse> {
    let queries = app
        .engine
        .recent(params.limit.unwrap_or(DEFAULT_RECENT_LIMIT))?;
    Ok(Json(serde_json::json!({ "queries": queries })))
}

async fn query_get(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(app.engine.get(QueryId(id))?))
}

async fn query_notes(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
    Query(params): Query<NotesParams>,
) -> ApiResult<impl IntoResponse> {
    let page = app.engine.notes(
        QueryId(id),
        params.path.as_deref(),
        params.after.as_deref(),
        params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
    )?;
    Ok(Json(page))
}

async fn query_search(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
    Query(params): Query<SearchParams>,
) -> ApiResult<impl IntoResponse> {
    let results = app.engine.search(
        QueryId(id),
        &params.q,
        params.path.as_deref(),
        params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        SearchMode::parse(params.mode.as_deref()),
    )?;
    Ok(Json(serde_json::json!({ "results": results })))
}

async fn query_vsearch(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
    Query(params): Query<SearchParams>,
) -> ApiResult<impl IntoResponse> {
    let provider = app.provider().await?;
    let results = app
        .engine
        .vsearch(
            &provider,
            QueryId(id),
            &params.q,
            params.path.as_deref(),
            params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        )
        .await?;
    Ok(Json(serde_json::json!({ "results": results })))
}

async fn query_fetch(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
    Json(body): Json<FetchBody>,
) -> ApiResult<impl IntoResponse> {
    let ids: Vec<NoteId> = body.ids.into_iter().map(NoteId).collect();
    let notes = app.engine.fetch(QueryId(id), &ids)?;
    Ok(Json(serde_json::json!({ "notes": notes })))
}

async fn query_paths(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
    Query(params): Query<PathParams>,
) -> ApiResult<impl IntoResponse> {
    let paths = app.engine.paths(QueryId(id), params.path.as_deref())?;
    Ok(Json(serde_json::json!({ "paths": paths })))
}

async fn commit(State(app): State<AppHandle>) -> ApiResult<impl IntoResponse> {
    let receipt = app.storage.commit_all(now_ms())?;
    Ok(Json(receipt))
}

// ---- streaming ----

async fn sse_sync(
    State(app): State<AppHandle>,
    Json(body): Json<SyncBody>,
) -> impl IntoResponse {
    let handle = app.clone();
    stream_operation(&app, move |ctx| async move {
        let provider = handle.provider().await?;
        spall_pipeline::sync(
            &handle.storage,
            &provider,
            &handle.bus,
            &ctx,
            std::path::Path::new(&body.dir),
            &body.glob,
            CorpusId(body.corpus),
            body.prefix.as_deref().unwrap_or(""),
        )
        .await?;
        Ok(())
    })
}

async fn sse_note_add(
    State(app): State<AppHandle>,
    Json(body): Json<AddNoteBody>,
) -> impl IntoResponse {
    let handle = app.clone();
    stream_operation(&app, move |ctx| async move {
        let path = canonicalize(&body.path);
        let note =
            handle
                .storage
                .add_note(CorpusId(body.corpus), &path, &body.content, body.dupe)?;
        handle
            .bus
            .publish(Event::NoteCreated { info: note.clone() })
            .await;
        embed_notes(&handle, &ctx, &[note.id]).await
    })
}

async fn sse_note_upsert(
    State(app): State<AppHandle>,
    Path((id, path)): Path<(i64, String)>,
    Json(body): Json<NoteContentBody>,
) -> impl IntoResponse {
    let handle = app.clone();
    stream_operation(&app, move |ctx| async move {
        handle.storage.get_corpus_by_id(CorpusId(id))?;
        let path = canonicalize(&path);
        let (note, created) =
            handle
                .storage
                .upsert_note(CorpusId(id), &path, &body.content, body.dupe)?;
        let event = if created {
            Event::NoteCreated { info: note.clone() }
        } else {
            Event::NoteUpdated { info: note.clone() }
        };
        handle.bus.publish(event).await;
        embed_notes(&handle, &ctx, &[note.id]).await
    })
}

async fn sse_note_update(
    State(app): State<AppHandle>,
    Path(id): Path<i64>,
    Json(body): Json<NoteContentBody>,
) -> impl IntoResponse {
    let handle = app.clone();
    stream_operation(&app, move |ctx| async move {
        let note = handle
            .storage
            .update_note(NoteId(id), &body.content, body.dupe)?;
        handle
            .bus
            .publish(Event::NoteUpdated { info: note.clone() })
            .await;
        embed_notes(&handle, &ctx, &[note.id]).await
    })
}

async fn embed_notes(
    app: &AppHandle,
    ctx: &spall_core::RequestContext,
    ids: &[NoteId],
) -> spall_core::Result<()> {
    let provider = app.provider().await?;
    spall_pipeline::embed::embed(&app.storage, &provider, &app.bus, ctx, ids).await
}
