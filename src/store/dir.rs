//! Directory-backed credential store.
//!
//! One `<name>.json` file per credential entry, all inside a single
//! directory that can be wiped wholesale. File I/O runs on the blocking
//! pool.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::store::{validate_entry_name, CredentialStore, Credentials, StoreResult};

const ENTRY_EXTENSION: &str = "json";

/// Credential store rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DirCredentialStore {
    dir: PathBuf,
}

impl DirCredentialStore {
    /// Open the store, creating the directory if it does not exist yet.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{ENTRY_EXTENSION}"))
    }

    /// Paths of the entry files currently on disk. Anything that is not a
    /// `.json` file, such as an interrupted `.json.tmp` write, is ignored.
    fn entry_paths(&self) -> StoreResult<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn read_entries(&self) -> StoreResult<Credentials> {
        let mut credentials = Credentials::new();
        for path in self.entry_paths()? {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let contents = fs::read_to_string(&path)?;
            credentials.insert(name, serde_json::from_str(&contents)?);
        }
        debug!(dir = %self.dir.display(), entries = credentials.len(), "loaded credentials");
        Ok(credentials)
    }

    fn write_entries(&self, credentials: &Credentials) -> StoreResult<()> {
        fs::create_dir_all(&self.dir)?;
        for (name, value) in &credentials.0 {
            validate_entry_name(name)?;
            let path = self.entry_path(name);
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, serde_json::to_vec(value)?)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }

    fn remove_all(&self) -> StoreResult<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        fs::create_dir_all(&self.dir)?;
        debug!(dir = %self.dir.display(), "wiped credentials");
        Ok(())
    }
}

async fn blocking<R, F>(f: F) -> StoreResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> StoreResult<R> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[async_trait]
impl CredentialStore for DirCredentialStore {
    async fn load(&self) -> StoreResult<Credentials> {
        let store = self.clone();
        blocking(move || store.read_entries()).await
    }

    async fn save(&self, credentials: &Credentials) -> StoreResult<()> {
        let store = self.clone();
        let credentials = credentials.clone();
        blocking(move || store.write_entries(&credentials)).await
    }

    async fn wipe(&self) -> StoreResult<()> {
        let store = self.clone();
        blocking(move || store.remove_all()).await
    }

    async fn is_empty(&self) -> StoreResult<bool> {
        let store = self.clone();
        blocking(move || Ok(store.entry_paths()?.is_empty())).await
    }
}
