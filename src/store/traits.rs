//! Store traits for session credential persistence.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential entry is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid credential entry name: {0}")]
    InvalidName(String),
    #[error("lock poisoned")]
    Poisoned,
    #[error("credential store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Opaque multi-file session credentials, keyed by entry name.
///
/// Each entry maps to one file in a directory-backed store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub BTreeMap<String, serde_json::Value>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.0.insert(name.into(), value);
    }

    /// Overlay the entries of `update` onto this set.
    pub fn merge(&mut self, update: Credentials) {
        self.0.extend(update.0);
    }
}

/// Persistence for the credentials of the single bridged account.
///
/// Implementations that touch the disk must not block the async runtime.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load every stored entry. An empty store yields empty credentials.
    async fn load(&self) -> StoreResult<Credentials>;

    /// Persist the given entries, replacing entries with the same name.
    async fn save(&self, credentials: &Credentials) -> StoreResult<()>;

    /// Delete everything and leave an empty, usable store behind.
    async fn wipe(&self) -> StoreResult<()>;

    /// Whether the store currently holds no entries.
    async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.load().await?.is_empty())
    }
}

/// Entry names become file names, so they must stay inside the store.
pub(crate) fn validate_entry_name(name: &str) -> StoreResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(|c: char| c == '/' || c == '\\' || c == '\0');
    if bad {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overlays_entries() {
        let mut creds = Credentials::new();
        creds.insert("creds", serde_json::json!({ "me": "a" }));
        creds.insert("pre-key-1", serde_json::json!(1));

        let mut update = Credentials::new();
        update.insert("creds", serde_json::json!({ "me": "b" }));
        creds.merge(update);

        assert_eq!(creds.len(), 2);
        assert_eq!(creds.get("creds"), Some(&serde_json::json!({ "me": "b" })));
    }

    #[test]
    fn test_validate_entry_name() {
        assert!(validate_entry_name("creds").is_ok());
        assert!(validate_entry_name("app-state-sync-key-AAA=").is_ok());
        assert!(validate_entry_name("").is_err());
        assert!(validate_entry_name("..").is_err());
        assert!(validate_entry_name("../etc/passwd").is_err());
    }
}
