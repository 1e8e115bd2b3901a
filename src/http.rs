//! [`NotesRepository`] over HTTP, talking to the notes server.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{FeedError, FeedResult};
use crate::models::{Credentials, Identity, NewNote, Note, NoteListResponse, StoredFileResponse};
use crate::repository::{validate_credentials, Accounts, NotesRepository};

pub const UID_HEADER: &str = "x-notenest-uid";

pub struct HttpRepository {
    client: Client,
    base_url: String,
    identity: Mutex<Option<Identity>>,
}

impl HttpRepository {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            identity: Mutex::new(None),
        }
    }

    /// Starts from an identity restored by the caller.
    pub fn with_identity(self, identity: Option<Identity>) -> Self {
        *self.identity() = identity;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn identity(&self) -> MutexGuard<'_, Option<Identity>> {
        self.identity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_identity(&self) -> Option<Identity> {
        self.identity().clone()
    }

    fn remember(&self, identity: &Identity) {
        *self.identity() = Some(identity.clone());
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.current_identity() {
            Some(identity) => request.header(UID_HEADER, identity.uid),
            None => request,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> FeedResult<T> {
        let response = check(request.send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Maps a non-success status onto an error kind.
///
/// A bare 404 is a routing problem (wrong base URL, old server), so it is a
/// `Transport` error. Calls whose 404 means "no such record" handle it first.
async fn check(response: Response) -> FeedResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => FeedError::Validation(body),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FeedError::Auth(body),
        other => FeedError::Transport(format!("{}: {}", other, body)),
    })
}

#[async_trait]
impl NotesRepository for HttpRepository {
    async fn fetch_all(&self) -> FeedResult<Vec<Note>> {
        let list: NoteListResponse = self.send_json(self.client.get(self.url("/notes"))).await?;
        Ok(list.notes)
    }

    async fn increment_likes(&self, note_id: &str) -> FeedResult<()> {
        let request = self.client.post(self.url(&format!("/notes/{}/like", note_id)));
        let response = self.authorized(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FeedError::NotFound(note_id.to_string()));
        }
        check(response).await?;
        Ok(())
    }

    async fn store_file(&self, bytes: Vec<u8>, suggested_name: &str) -> FeedResult<String> {
        let request = self
            .client
            .post(self.url("/files"))
            .query(&[("name", suggested_name)])
            .body(bytes);
        let stored: StoredFileResponse = self.send_json(self.authorized(request)).await?;
        Ok(stored.url)
    }

    async fn create_note(&self, record: NewNote) -> FeedResult<Note> {
        let request = self.client.post(self.url("/notes")).json(&record);
        self.send_json(self.authorized(request)).await
    }

    async fn ensure_identity(&self) -> FeedResult<Identity> {
        if let Some(identity) = self.current_identity() {
            return Ok(identity);
        }
        let identity: Identity = self
            .send_json(self.client.post(self.url("/auth/anonymous")))
            .await?;
        self.remember(&identity);
        Ok(identity)
    }

    fn set_identity(&self, identity: Option<Identity>) {
        *self.identity() = identity;
    }
}

#[async_trait]
impl Accounts for HttpRepository {
    async fn sign_up(&self, username: &str, password: &str) -> FeedResult<Identity> {
        validate_credentials(username, password)?;
        let body = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        let identity: Identity = self
            .send_json(self.client.post(self.url("/auth/signup")).json(&body))
            .await?;
        self.remember(&identity);
        Ok(identity)
    }

    async fn log_in(&self, username: &str, password: &str) -> FeedResult<Identity> {
        let body = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        let identity: Identity = self
            .send_json(self.client.post(self.url("/auth/login")).json(&body))
            .await?;
        self.remember(&identity);
        Ok(identity)
    }

    /// Sessions are just the uid header, so there is nothing to revoke remotely.
    async fn sign_out(&self) -> FeedResult<()> {
        self.identity().take();
        Ok(())
    }
}
