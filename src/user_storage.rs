//! Account table for the reference server, kept in `users.json`.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::FeedError;
use crate::models::Identity;

const USERS_FILE: &str = "users.json";

#[derive(Error, Debug)]
pub enum UserStorageError {
    #[error("Username already exists: {0}")]
    DuplicateUsername(String),

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl From<UserStorageError> for FeedError {
    fn from(err: UserStorageError) -> Self {
        match err {
            UserStorageError::DuplicateUsername(name) => {
                FeedError::Validation(format!("Username already exists: {}", name))
            }
            UserStorageError::Persistence(e) => FeedError::Transport(format!("{:#}", e)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub uid: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl AccountRecord {
    pub fn identity(&self) -> Identity {
        Identity::registered(self.uid.clone(), self.username.clone())
    }
}

pub struct UserStorage {
    path: PathBuf,
    accounts: RwLock<Vec<AccountRecord>>,
}

impl UserStorage {
    pub fn open(data_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = data_dir.into().join(USERS_FILE);
        let accounts = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        Ok(Self {
            path,
            accounts: RwLock::new(accounts),
        })
    }

    /// Adds an account under a fresh uid. Usernames are unique.
    pub async fn register(
        &self,
        username: &str,
        password_hash: String,
    ) -> Result<AccountRecord, UserStorageError> {
        let mut accounts = self.accounts.write().await;
        if accounts.iter().any(|a| a.username == username) {
            return Err(UserStorageError::DuplicateUsername(username.to_string()));
        }

        let record = AccountRecord {
            uid: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash,
            created_at: Utc::now(),
        };
        accounts.push(record.clone());
        if let Err(e) = self.persist(&accounts) {
            accounts.pop();
            return Err(e.into());
        }
        Ok(record)
    }

    pub async fn find(&self, username: &str) -> Option<AccountRecord> {
        let accounts = self.accounts.read().await;
        accounts.iter().find(|a| a.username == username).cloned()
    }

    fn persist(&self, accounts: &[AccountRecord]) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(accounts).context("Failed to serialize accounts")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}
