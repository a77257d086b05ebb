//! In-memory credential store for development and testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::store::{validate_entry_name, CredentialStore, Credentials, StoreError, StoreResult};

/// In-memory implementation of [`CredentialStore`].
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<Credentials>,
    wipes: AtomicUsize,
}

impl MemoryCredentialStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with credentials.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(credentials),
            wipes: AtomicUsize::new(0),
        }
    }

    /// How many times the store has been wiped.
    pub fn wipe_count(&self) -> usize {
        self.wipes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> StoreResult<Credentials> {
        let credentials = self.credentials.read().map_err(|_| StoreError::Poisoned)?;
        Ok(credentials.clone())
    }

    async fn save(&self, update: &Credentials) -> StoreResult<()> {
        for name in update.0.keys() {
            validate_entry_name(name)?;
        }
        let mut credentials = self.credentials.write().map_err(|_| StoreError::Poisoned)?;
        credentials.merge(update.clone());
        Ok(())
    }

    async fn wipe(&self) -> StoreResult<()> {
        let mut credentials = self.credentials.write().map_err(|_| StoreError::Poisoned)?;
        *credentials = Credentials::new();
        self.wipes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
