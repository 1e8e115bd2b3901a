//! NoteNest: a shared study-notes feed.
//!
//! The client side is the [`feed::FeedViewModel`], which keeps a local copy
//! of the note collection, derives the filtered and sorted display list, and
//! routes likes and uploads through a [`repository::NotesRepository`].
//! The `server` binary hosts a reference backend for that repository.

pub mod catalog;
pub mod config;
pub mod error;
pub mod feed;
pub mod http;
pub mod logging;
pub mod models;
pub mod repository;
pub mod server;
pub mod storage;
pub mod user_storage;

pub use error::{FeedError, FeedResult};
pub use feed::{FeedViewModel, ListenerId, RefreshOutcome};
pub use http::HttpRepository;
pub use models::{Identity, NewNote, Note, SortKey};
pub use repository::{Accounts, MemoryRepository, NotesRepository};
