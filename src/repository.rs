//! Notes repository contract and its in-process implementation.
//!
//! The feed never talks to a backend directly; every remote round-trip goes
//! through [`NotesRepository`]. Counters are only ever changed by the
//! repository itself, never by arithmetic on a cached copy.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{FeedError, FeedResult};
use crate::models::{Identity, NewNote, Note};
use crate::storage::stored_file_name;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Low bcrypt cost for the in-process account table.
const MEMORY_HASH_COST: u32 = 4;

#[async_trait]
pub trait NotesRepository: Send + Sync {
    /// Returns the whole remote collection.
    async fn fetch_all(&self) -> FeedResult<Vec<Note>>;

    /// Atomically adds one like to the note.
    ///
    /// Returns `Err(FeedError::NotFound)` if the id is unknown.
    async fn increment_likes(&self, note_id: &str) -> FeedResult<()>;

    /// Stores the bytes and returns the URL they can be retrieved from.
    async fn store_file(&self, bytes: Vec<u8>, suggested_name: &str) -> FeedResult<String>;

    /// Persists a record; the repository assigns `id` and `created_at`.
    async fn create_note(&self, record: NewNote) -> FeedResult<Note>;

    /// Obtains at least an anonymous identity.
    async fn ensure_identity(&self) -> FeedResult<Identity>;

    /// Replaces the identity later calls act as; `None` forgets it.
    fn set_identity(&self, identity: Option<Identity>);
}

/// Username/password accounts layered on top of a repository.
#[async_trait]
pub trait Accounts: Send + Sync {
    async fn sign_up(&self, username: &str, password: &str) -> FeedResult<Identity>;
    async fn log_in(&self, username: &str, password: &str) -> FeedResult<Identity>;

    /// Drops the signed-in identity; the next `ensure_identity` is anonymous.
    async fn sign_out(&self) -> FeedResult<()>;
}

pub fn validate_credentials(username: &str, password: &str) -> FeedResult<()> {
    if username.trim().is_empty() {
        return Err(FeedError::Validation("Username cannot be empty".to_string()));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(FeedError::Validation(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

struct Account {
    uid: String,
    username: String,
    password_hash: String,
}

/// Repository that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryRepository {
    notes: RwLock<Vec<Note>>,
    files: RwLock<HashMap<String, Vec<u8>>>,
    accounts: RwLock<Vec<Account>>,
    identity: Mutex<Option<Identity>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notes(notes: Vec<Note>) -> Self {
        Self {
            notes: RwLock::new(notes),
            ..Self::default()
        }
    }

    /// A handful of sample notes for offline browsing.
    pub fn demo() -> Self {
        let now = Utc::now();
        let sample = |id: &str, title: &str, subject: &str, author: &str, days: i64, likes, downloads| Note {
            id: id.to_string(),
            title: title.to_string(),
            subject: subject.to_string(),
            author: author.to_string(),
            file_url: format!("memory://files/{}.pdf", id),
            created_at: Some(now - Duration::days(days)),
            downloads,
            likes,
            owner_uid: None,
        };

        Self::with_notes(vec![
            sample("demo-1", "Kinematics Cheat Sheet", "Physics", "asha", 1, 12, 40),
            sample("demo-2", "Calculus Limits Explained", "Math", "rahul", 3, 25, 31),
            sample("demo-3", "Organic Reactions Summary", "Chemistry", "meera", 2, 7, 18),
            sample("demo-4", "Kannada Grammar Basics", "Kannada", "Guest", 6, 4, 9),
            sample("demo-5", "Data Structures Notes", "CS", "vikram", 0, 19, 52),
            sample("demo-6", "Shakespeare Sonnets Analysis", "English", "Guest", 9, 3, 6),
        ])
    }

    pub async fn stored_file_count(&self) -> usize {
        self.files.read().await.len()
    }

    fn identity(&self) -> MutexGuard<'_, Option<Identity>> {
        self.identity.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl NotesRepository for MemoryRepository {
    async fn fetch_all(&self) -> FeedResult<Vec<Note>> {
        Ok(self.notes.read().await.clone())
    }

    async fn increment_likes(&self, note_id: &str) -> FeedResult<()> {
        let mut notes = self.notes.write().await;
        let note = notes
            .iter_mut()
            .find(|n| n.id == note_id)
            .ok_or_else(|| FeedError::NotFound(note_id.to_string()))?;
        note.likes = note.likes.saturating_add(1);
        Ok(())
    }

    async fn store_file(&self, bytes: Vec<u8>, suggested_name: &str) -> FeedResult<String> {
        let name = stored_file_name(suggested_name);
        let url = format!("memory://files/{}", name);
        self.files.write().await.insert(name, bytes);
        Ok(url)
    }

    async fn create_note(&self, record: NewNote) -> FeedResult<Note> {
        let note = Note::create(record);
        self.notes.write().await.push(note.clone());
        Ok(note)
    }

    async fn ensure_identity(&self) -> FeedResult<Identity> {
        let mut identity = self.identity();
        if let Some(current) = identity.as_ref() {
            return Ok(current.clone());
        }
        let guest = Identity::anonymous();
        debug!(uid = %guest.uid, "Issued anonymous identity");
        *identity = Some(guest.clone());
        Ok(guest)
    }

    fn set_identity(&self, identity: Option<Identity>) {
        *self.identity() = identity;
    }
}

#[async_trait]
impl Accounts for MemoryRepository {
    async fn sign_up(&self, username: &str, password: &str) -> FeedResult<Identity> {
        validate_credentials(username, password)?;
        let mut accounts = self.accounts.write().await;
        if accounts.iter().any(|a| a.username == username) {
            return Err(FeedError::Validation("Username already exists".to_string()));
        }

        let password_hash = bcrypt::hash(password, MEMORY_HASH_COST)
            .map_err(|e| FeedError::Transport(format!("Failed to hash password: {}", e)))?;
        let account = Account {
            uid: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash,
        };
        let identity = Identity::registered(account.uid.clone(), account.username.clone());
        accounts.push(account);

        *self.identity() = Some(identity.clone());
        Ok(identity)
    }

    async fn log_in(&self, username: &str, password: &str) -> FeedResult<Identity> {
        let accounts = self.accounts.read().await;
        let invalid = || FeedError::Auth("Invalid username or password".to_string());
        let account = accounts
            .iter()
            .find(|a| a.username == username)
            .ok_or_else(invalid)?;

        let valid = bcrypt::verify(password, &account.password_hash)
            .map_err(|e| FeedError::Transport(format!("Failed to verify password: {}", e)))?;
        if !valid {
            return Err(invalid());
        }

        let identity = Identity::registered(account.uid.clone(), account.username.clone());
        *self.identity() = Some(identity.clone());
        Ok(identity)
    }

    async fn sign_out(&self) -> FeedResult<()> {
        self.identity().take();
        Ok(())
    }
}
