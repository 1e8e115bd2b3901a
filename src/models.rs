use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::FeedError;

pub const GUEST_AUTHOR: &str = "Guest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub subject: String,
    pub author: String,
    pub file_url: String,
    /// Server-assigned; absent while the write is still pending.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub owner_uid: Option<String>,
}

impl Note {
    /// Materializes a new record the way a backend does: fresh id, current timestamp.
    pub fn create(record: NewNote) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: record.title,
            subject: record.subject,
            author: record.author,
            file_url: record.file_url,
            created_at: Some(Utc::now()),
            downloads: record.downloads,
            likes: record.likes,
            owner_uid: record.owner_uid,
        }
    }
}

/// Record handed to `create_note`; the repository assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNote {
    pub title: String,
    pub subject: String,
    pub author: String,
    pub file_url: String,
    pub downloads: u64,
    pub likes: u64,
    pub owner_uid: Option<String>,
}

impl NewNote {
    pub fn new(
        title: String,
        subject: String,
        author: String,
        file_url: String,
        owner_uid: Option<String>,
    ) -> Self {
        Self {
            title,
            subject,
            author,
            file_url,
            downloads: 0,
            likes: 0,
            owner_uid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub username: Option<String>,
    pub anonymous: bool,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            username: None,
            anonymous: true,
        }
    }

    pub fn registered(uid: String, username: String) -> Self {
        Self {
            uid,
            username: Some(username),
            anonymous: false,
        }
    }

    pub fn display_name(&self) -> &str {
        match (&self.username, self.anonymous) {
            (Some(name), false) => name.as_str(),
            _ => GUEST_AUTHOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortKey {
    #[default]
    Newest,
    Trending,
    Downloads,
}

impl SortKey {
    pub const ALL: [SortKey; 3] = [SortKey::Newest, SortKey::Trending, SortKey::Downloads];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Newest => "newest",
            SortKey::Trending => "trending",
            SortKey::Downloads => "downloads",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(SortKey::Newest),
            "trending" => Ok(SortKey::Trending),
            "downloads" => Ok(SortKey::Downloads),
            other => Err(FeedError::Validation(format!(
                "unrecognized sort key '{}'; expected newest|trending|downloads",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredFileResponse {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NoteListResponse {
    pub notes: Vec<Note>,
}
