//! JSON-file note collection and file store backing the reference server.

use crate::models::{NewNote, Note};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

const NOTES_FILE: &str = "notes.json";
const FILES_DIR: &str = "files";

pub struct NoteStorage {
    data_dir: PathBuf,
    notes: RwLock<Vec<Note>>,
}

impl NoteStorage {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(data_dir.join(FILES_DIR))
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let notes_path = data_dir.join(NOTES_FILE);
        let notes = if notes_path.exists() {
            let data = fs::read_to_string(&notes_path)
                .context("Failed to read notes file")?;
            serde_json::from_str(&data)
                .context("Failed to parse notes file")?
        } else {
            Vec::new()
        };

        Ok(Self {
            data_dir,
            notes: RwLock::new(notes),
        })
    }

    pub async fn list_notes(&self) -> Result<Vec<Note>> {
        Ok(self.notes.read().await.clone())
    }

    pub async fn find_note(&self, id: &str) -> Option<Note> {
        self.notes.read().await.iter().find(|n| n.id == id).cloned()
    }

    pub async fn add_note(&self, record: NewNote) -> Result<Note> {
        let note = Note::create(record);
        let mut notes = self.notes.write().await;
        notes.push(note.clone());
        self.save_to_disk(&notes)?;
        Ok(note)
    }

    /// Returns `None` when no note has this id.
    pub async fn increment_likes(&self, id: &str) -> Result<Option<Note>> {
        self.update_counter(id, |note| note.likes = note.likes.saturating_add(1))
            .await
    }

    pub async fn record_download(&self, id: &str) -> Result<Option<Note>> {
        self.update_counter(id, |note| note.downloads = note.downloads.saturating_add(1))
            .await
    }

    async fn update_counter(&self, id: &str, apply: impl FnOnce(&mut Note)) -> Result<Option<Note>> {
        let mut notes = self.notes.write().await;

        let Some(note) = notes.iter_mut().find(|n| n.id == id) else {
            return Ok(None);
        };
        apply(note);
        let updated = note.clone();
        self.save_to_disk(&notes)?;

        Ok(Some(updated))
    }

    /// Writes the bytes under a fresh unique name and returns that name.
    pub async fn store_file(&self, suggested_name: &str, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            bail!("Refusing to store an empty file");
        }
        let name = stored_file_name(suggested_name);
        fs::write(self.file_path(&name)?, bytes)
            .context("Failed to write stored file")?;
        Ok(name)
    }

    pub async fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.file_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).context("Failed to read stored file")?;
        Ok(Some(bytes))
    }

    fn file_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            bail!("Invalid stored file name: {}", name);
        }
        Ok(self.data_dir.join(FILES_DIR).join(name))
    }

    fn save_to_disk(&self, notes: &[Note]) -> Result<()> {
        let json = serde_json::to_string_pretty(notes)
            .context("Failed to serialize notes")?;
        fs::write(self.data_dir.join(NOTES_FILE), json)
            .context("Failed to write to notes file")?;
        Ok(())
    }
}

/// `<millis>_<uuid>_<name>` with anything outside `[A-Za-z0-9._-]` replaced.
pub fn stored_file_name(suggested: &str) -> String {
    let base = Path::new(suggested)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let mut clean: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    clean = clean.trim_start_matches('.').to_string();
    if clean.is_empty() {
        clean = "file".to_string();
    }

    format!(
        "{}_{}_{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        clean
    )
}
