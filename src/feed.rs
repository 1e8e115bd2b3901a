//! Note feed view-model.
//!
//! Holds the local note cache plus the active subject filter and sort key,
//! derives the display list from them, and routes every mutation through a
//! [`NotesRepository`] followed by a reconciling refresh.
//!
//! # Invariants
//! - The cache is replaced wholesale by a refresh, never merged.
//! - A refresh response older than the last applied one is discarded.
//! - Counters shown to listeners always come from the repository.
//! - Listeners run after the state lock is released.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::catalog::{self, ALL_SUBJECTS_ID};
use crate::error::{FeedError, FeedResult};
use crate::models::{Identity, NewNote, Note, SortKey, GUEST_AUTHOR};
use crate::repository::{Accounts, NotesRepository};

pub type DisplayListener = Arc<dyn Fn(&[Note]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The response replaced the cache.
    Applied,
    /// A later-issued refresh had already been applied.
    Superseded,
}

struct FeedState {
    notes: Vec<Note>,
    subject_id: String,
    sort_key: SortKey,
    identity: Option<Identity>,
    applied_seq: u64,
}

pub struct FeedViewModel<R> {
    repo: R,
    state: Mutex<FeedState>,
    listeners: Mutex<Vec<(ListenerId, DisplayListener)>>,
    next_listener: AtomicU64,
    issued_seq: AtomicU64,
}

impl<R: NotesRepository> FeedViewModel<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            state: Mutex::new(FeedState {
                notes: Vec::new(),
                subject_id: ALL_SUBJECTS_ID.to_string(),
                sort_key: SortKey::default(),
                identity: None,
                applied_seq: 0,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            issued_seq: AtomicU64::new(0),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn subject_filter(&self) -> String {
        self.state().subject_id.clone()
    }

    pub fn sort_key(&self) -> SortKey {
        self.state().sort_key
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state().identity.clone()
    }

    /// Replaces the acting identity, e.g. from a restored session. The
    /// repository is switched over too, so later writes carry the same uid.
    pub fn set_identity(&self, identity: Option<Identity>) {
        self.repo.set_identity(identity.clone());
        self.adopt_identity(identity);
    }

    /// Asks the repository for at least an anonymous identity and adopts it.
    pub async fn ensure_identity(&self) -> FeedResult<Identity> {
        if let Some(identity) = self.identity() {
            return Ok(identity);
        }
        let identity = self.repo.ensure_identity().await?;
        debug!(uid = %identity.uid, anonymous = identity.anonymous, "Identity established");
        self.adopt_identity(Some(identity.clone()));
        Ok(identity)
    }

    /// Registers a renderer; it is called with the new display list after
    /// every change to it.
    pub fn on_display_list_changed(
        &self,
        listener: impl Fn(&[Note]) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let listener: DisplayListener = Arc::new(listener);
        lock(&self.listeners).push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Fetches the full collection and replaces the cache with it.
    ///
    /// Repository failures propagate unchanged and leave the cache as it was.
    /// Safe to retry.
    pub async fn refresh(&self) -> FeedResult<RefreshOutcome> {
        let seq = self.issued_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let fetched = self.repo.fetch_all().await?;

        let display = {
            let mut state = self.state();
            if seq < state.applied_seq {
                debug!(seq, applied = state.applied_seq, "Discarding stale refresh");
                return Ok(RefreshOutcome::Superseded);
            }
            state.notes = dedupe_by_id(fetched);
            state.applied_seq = seq;
            debug!(seq, count = state.notes.len(), "Note cache replaced");
            derive_display_list(&state.notes, &state.subject_id, state.sort_key)?
        };

        self.notify(&display);
        Ok(RefreshOutcome::Applied)
    }

    /// Restricts the display list to one catalog subject (`"all"` clears it).
    pub fn set_subject_filter(&self, subject_id: &str) -> FeedResult<()> {
        catalog::resolve_display_name(subject_id)?;

        let display = {
            let mut state = self.state();
            state.subject_id = subject_id.to_string();
            derive_display_list(&state.notes, &state.subject_id, state.sort_key)?
        };

        self.notify(&display);
        Ok(())
    }

    pub fn set_sort_key(&self, sort_key: &str) -> FeedResult<()> {
        let key: SortKey = sort_key.parse()?;

        let display = {
            let mut state = self.state();
            state.sort_key = key;
            derive_display_list(&state.notes, &state.subject_id, state.sort_key)?
        };

        self.notify(&display);
        Ok(())
    }

    pub fn derive_display_list(&self) -> FeedResult<Vec<Note>> {
        let state = self.state();
        derive_display_list(&state.notes, &state.subject_id, state.sort_key)
    }

    /// Adds one like through the repository, then refreshes so the shown
    /// count is the server's.
    ///
    /// Not retried on failure: a repeated call after an indeterminate error
    /// may count twice.
    pub async fn like(&self, note_id: &str) -> FeedResult<()> {
        {
            let state = self.state();
            if state.identity.is_none() {
                return Err(FeedError::Auth("You must sign in to like notes".to_string()));
            }
            if !state.notes.iter().any(|n| n.id == note_id) {
                return Err(FeedError::NotFound(note_id.to_string()));
            }
        }

        self.repo.increment_likes(note_id).await?;
        info!(note_id, "Like recorded");

        self.refresh().await?;
        Ok(())
    }

    /// Stores the file, creates the note record, and reconciles the cache.
    ///
    /// The two repository steps are not transactional. If record creation
    /// fails after the bytes were stored, the error is returned and the
    /// stored file is left behind.
    pub async fn upload(
        &self,
        title: &str,
        subject: &str,
        file_name: &str,
        file_bytes: Vec<u8>,
        author: &str,
    ) -> FeedResult<Note> {
        let title = title.trim();
        if title.is_empty() {
            return Err(FeedError::Validation("Title cannot be empty".to_string()));
        }
        if !catalog::is_upload_subject(subject) {
            return Err(FeedError::Validation(format!(
                "'{}' is not an uploadable subject",
                subject
            )));
        }
        if file_bytes.is_empty() {
            return Err(FeedError::Validation("File cannot be empty".to_string()));
        }

        let identity = self.ensure_identity().await?;
        let author = match author.trim() {
            "" => GUEST_AUTHOR,
            name => name,
        };

        let size = file_bytes.len();
        let file_url = self.repo.store_file(file_bytes, file_name).await?;
        debug!(%file_url, size, "File stored");

        let record = NewNote::new(
            title.to_string(),
            subject.to_string(),
            author.to_string(),
            file_url.clone(),
            Some(identity.uid),
        );
        let note = match self.repo.create_note(record).await {
            Ok(note) => note,
            Err(err) => {
                warn!(%file_url, error = %err, "Note record creation failed; stored file is orphaned");
                return Err(err);
            }
        };
        info!(note_id = %note.id, subject = %note.subject, "Note uploaded");

        let display = {
            let mut state = self.state();
            if !state.notes.iter().any(|n| n.id == note.id) {
                state.notes.push(note.clone());
            }
            derive_display_list(&state.notes, &state.subject_id, state.sort_key)?
        };
        self.notify(&display);

        self.refresh().await?;
        Ok(note)
    }

    fn state(&self) -> MutexGuard<'_, FeedState> {
        lock(&self.state)
    }

    /// Records an identity the repository already holds.
    fn adopt_identity(&self, identity: Option<Identity>) {
        self.state().identity = identity;
    }

    fn notify(&self, display: &[Note]) {
        let listeners: Vec<DisplayListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(display);
        }
    }
}

impl<R: NotesRepository + Accounts> FeedViewModel<R> {
    pub async fn sign_up(&self, username: &str, password: &str) -> FeedResult<Identity> {
        let identity = self.repo.sign_up(username, password).await?;
        info!(username, "Account created");
        self.adopt_identity(Some(identity.clone()));
        Ok(identity)
    }

    pub async fn log_in(&self, username: &str, password: &str) -> FeedResult<Identity> {
        let identity = self.repo.log_in(username, password).await?;
        info!(username, "Logged in");
        self.adopt_identity(Some(identity.clone()));
        Ok(identity)
    }

    /// Signs out of the repository and forgets the identity. A later upload
    /// runs under a fresh anonymous identity.
    pub async fn log_out(&self) -> FeedResult<()> {
        self.repo.sign_out().await?;
        self.adopt_identity(None);
        info!("Logged out");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dedupe_by_id(notes: Vec<Note>) -> Vec<Note> {
    let mut seen = HashSet::with_capacity(notes.len());
    notes
        .into_iter()
        .filter(|note| {
            let fresh = seen.insert(note.id.clone());
            if !fresh {
                warn!(note_id = %note.id, "Dropping duplicate note id from refresh");
            }
            fresh
        })
        .collect()
}

/// Filters `notes` to the subject behind `subject_id` and orders them by
/// `sort_key`. Equal keys keep their cache order.
pub fn derive_display_list(
    notes: &[Note],
    subject_id: &str,
    sort_key: SortKey,
) -> FeedResult<Vec<Note>> {
    let mut display: Vec<Note> = if subject_id == ALL_SUBJECTS_ID {
        notes.to_vec()
    } else {
        let subject = catalog::resolve_display_name(subject_id)?;
        notes.iter().filter(|n| n.subject == subject).cloned().collect()
    };

    // `sort_by` is stable. `None < Some(_)`, so pending timestamps land last.
    match sort_key {
        SortKey::Newest => display.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortKey::Trending => display.sort_by(|a, b| b.likes.cmp(&a.likes)),
        SortKey::Downloads => display.sort_by(|a, b| b.downloads.cmp(&a.downloads)),
    }

    Ok(display)
}
