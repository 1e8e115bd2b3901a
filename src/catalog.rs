//! Fixed subject catalog shared by the filter list and the upload form.

use crate::error::{FeedError, FeedResult};

/// Catalog id meaning "no filter".
pub const ALL_SUBJECTS_ID: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub id: &'static str,
    pub name: &'static str,
}

const SUBJECTS: &[Subject] = &[
    Subject { id: ALL_SUBJECTS_ID, name: "All Notes" },
    Subject { id: "phy", name: "Physics" },
    Subject { id: "kan", name: "Kannada" },
    Subject { id: "hin", name: "Hindi" },
    Subject { id: "san", name: "Sanskrit" },
    Subject { id: "math", name: "Math" },
    Subject { id: "chem", name: "Chemistry" },
    Subject { id: "cs", name: "CS" },
    Subject { id: "eng", name: "English" },
];

/// Every catalog entry in display order, including the `all` sentinel.
pub fn subjects() -> &'static [Subject] {
    SUBJECTS
}

/// Entries a note can be uploaded under.
pub fn upload_subjects() -> impl Iterator<Item = &'static Subject> {
    SUBJECTS.iter().filter(|s| s.id != ALL_SUBJECTS_ID)
}

pub fn find_by_id(id: &str) -> Option<&'static Subject> {
    SUBJECTS.iter().find(|s| s.id == id)
}

/// Maps a catalog id to the subject name stored on notes.
pub fn resolve_display_name(id: &str) -> FeedResult<&'static str> {
    find_by_id(id)
        .map(|s| s.name)
        .ok_or_else(|| FeedError::Validation(format!("unknown subject id '{}'", id)))
}

pub fn is_upload_subject(name: &str) -> bool {
    upload_subjects().any(|s| s.name == name)
}
