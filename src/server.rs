//! Reference notes backend: the remote collection, file store and accounts
//! the client's [`HttpRepository`](crate::http::HttpRepository) talks to.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::catalog;
use crate::http::UID_HEADER;
use crate::models::{Credentials, Identity, NewNote, Note, NoteListResponse, StoredFileResponse};
use crate::repository::validate_credentials;
use crate::storage::NoteStorage;
use crate::user_storage::{UserStorage, UserStorageError};

type ApiResult<T> = Result<T, (StatusCode, String)>;

pub struct AppState {
    pub notes: NoteStorage,
    pub users: UserStorage,
    /// Prefix for file URLs handed back to clients.
    pub public_url: String,
    pub password_cost: u32,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static(UID_HEADER)])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/notes", get(list_notes).post(create_note))
        .route("/notes/:id/like", post(like_note))
        .route("/notes/:id/download", get(download_note))
        .route("/files", post(upload_file))
        .route("/files/:name", get(get_file))
        .route("/auth/anonymous", post(sign_in_anonymously))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .layer(cors)
        .with_state(state)
}

fn internal(context: &str, err: anyhow::Error) -> (StatusCode, String) {
    error!("{context}: {err:#}");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{}: {}", context, err))
}

fn require_uid(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(UID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "You must be signed in".to_string()))
}

async fn list_notes(State(state): State<Arc<AppState>>) -> ApiResult<Json<NoteListResponse>> {
    let notes = state
        .notes
        .list_notes()
        .await
        .map_err(|e| internal("Failed to retrieve notes", e))?;

    Ok(Json(NoteListResponse { notes }))
}

async fn create_note(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<NewNote>,
) -> ApiResult<(StatusCode, Json<Note>)> {
    let uid = require_uid(&headers)?;

    if payload.title.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Title cannot be empty".to_string()));
    }
    if !catalog::is_upload_subject(&payload.subject) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Unknown subject '{}'", payload.subject),
        ));
    }

    // Counters always start at zero and the owner is whoever is calling.
    let record = NewNote::new(
        payload.title,
        payload.subject,
        payload.author,
        payload.file_url,
        Some(uid),
    );
    let note = state
        .notes
        .add_note(record)
        .await
        .map_err(|e| internal("Failed to save note", e))?;

    info!(note_id = %note.id, "Note created");
    Ok((StatusCode::CREATED, Json(note)))
}

async fn like_note(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Note>> {
    require_uid(&headers)?;

    state
        .notes
        .increment_likes(&id)
        .await
        .map_err(|e| internal("Failed to record like", e))?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Note not found: {}", id)))
}

/// Serves a note's file. The download is only counted once the bytes are in hand.
async fn download_note(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let not_found = || (StatusCode::NOT_FOUND, format!("Note not found: {}", id));
    let note = state.notes.find_note(&id).await.ok_or_else(not_found)?;

    let name = note.file_url.rsplit('/').next().unwrap_or_default();
    let bytes = load_file(&state, name).await?;

    state
        .notes
        .record_download(&id)
        .await
        .map_err(|e| internal("Failed to record download", e))?
        .ok_or_else(not_found)?;

    Ok(attachment(name, bytes))
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    name: String,
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<StoredFileResponse>)> {
    require_uid(&headers)?;

    if body.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "File cannot be empty".to_string()));
    }

    let name = state
        .notes
        .store_file(&params.name, &body)
        .await
        .map_err(|e| internal("Failed to store file", e))?;

    let url = format!("{}/files/{}", state.public_url, name);
    info!(%url, size = body.len(), "File stored");
    Ok((StatusCode::CREATED, Json(StoredFileResponse { url })))
}

async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = load_file(&state, &name).await?;
    Ok(attachment(&name, bytes))
}

async fn load_file(state: &AppState, name: &str) -> ApiResult<Vec<u8>> {
    state
        .notes
        .read_file(name)
        .await
        .map_err(|e| {
            warn!("Rejected file lookup '{}': {}", name, e);
            (StatusCode::NOT_FOUND, format!("File not found: {}", name))
        })?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("File not found: {}", name)))
}

fn attachment(name: &str, bytes: Vec<u8>) -> impl IntoResponse {
    let disposition = format!("attachment; filename=\"{}\"", name);
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
}

async fn sign_in_anonymously() -> Json<Identity> {
    Json(Identity::anonymous())
}

async fn signup(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Credentials>,
) -> ApiResult<(StatusCode, Json<Identity>)> {
    validate_credentials(&payload.username, &payload.password)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let password_hash = bcrypt::hash(&payload.password, state.password_cost)
        .map_err(|e| internal("Failed to hash password", e.into()))?;

    let account = state
        .users
        .register(&payload.username, password_hash)
        .await
        .map_err(|e| match e {
            UserStorageError::DuplicateUsername(name) => (
                StatusCode::BAD_REQUEST,
                format!("Username already exists: {}", name),
            ),
            UserStorageError::Persistence(e) => internal("Failed to save account", e),
        })?;

    info!(username = %account.username, "Account created");
    Ok((StatusCode::CREATED, Json(account.identity())))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Credentials>,
) -> ApiResult<Json<Identity>> {
    let invalid = || (StatusCode::UNAUTHORIZED, "Invalid username or password".to_string());

    let account = state.users.find(&payload.username).await.ok_or_else(invalid)?;

    let valid = bcrypt::verify(&payload.password, &account.password_hash)
        .map_err(|e| internal("Failed to verify password", e.into()))?;
    if !valid {
        return Err(invalid());
    }

    Ok(Json(account.identity()))
}
