//! Persisted session token.
//!
//! The token lives under the fixed key [`TOKEN_KEY`] in
//! `<data_dir>/client.json`, written with owner-only permissions (0o600).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use casino_core::ClientError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Key the session token is stored under.
pub const TOKEN_KEY: &str = "casino-token";

const STORE_FILE_NAME: &str = "client.json";
const STORE_VERSION: u32 = 1;

/// Errors raised by token stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for ClientError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Client-local persistence for the session token.
pub trait TokenStore: Send + Sync {
    /// Stored token, if any.
    fn load(&self) -> Result<Option<String>, StoreError>;
    /// Replace the stored token.
    fn save(&self, token: &str) -> Result<(), StoreError>;
    /// Forget the stored token. No-op when none is stored.
    fn clear(&self) -> Result<(), StoreError>;
}

/// On-disk layout of the client state file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile {
    version: u32,
    #[serde(default)]
    last_updated: String,
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

/// [`TokenStore`] backed by a JSON file.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    /// Store at `<data_dir>/client.json`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::at(data_dir.join(STORE_FILE_NAME))
    }

    /// Store at an explicit file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file. Missing, unreadable, or foreign files read as empty.
    fn read(&self) -> StoreFile {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StoreFile::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to read token store: {e}");
                return StoreFile::default();
            }
        };

        match serde_json::from_str::<StoreFile>(&data) {
            Ok(file) if file.version == STORE_VERSION => file,
            Ok(file) => {
                tracing::warn!("unsupported token store version: {}", file.version);
                StoreFile::default()
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to parse token store: {e}");
                StoreFile::default()
            }
        }
    }

    fn write(&self, file: &mut StoreFile) -> Result<(), StoreError> {
        file.version = STORE_VERSION;
        file.last_updated = chrono::Utc::now().to_rfc3339();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(file)?;
        std::fs::write(&self.path, &json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&self.path, perms);
        }

        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        let _lock = self.lock.lock();
        Ok(self.read().entries.remove(TOKEN_KEY))
    }

    fn save(&self, token: &str) -> Result<(), StoreError> {
        let _lock = self.lock.lock();
        let mut file = self.read();
        let _ = file.entries.insert(TOKEN_KEY.to_owned(), token.to_owned());
        self.write(&mut file)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _lock = self.lock.lock();
        let mut file = self.read();
        if file.entries.remove(TOKEN_KEY).is_none() {
            return Ok(());
        }
        self.write(&mut file)
    }
}

/// [`TokenStore`] kept in memory, for tests and ephemeral clients.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    /// Store pre-seeded with `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        Ok(self.token.lock().clone())
    }

    fn save(&self, token: &str) -> Result<(), StoreError> {
        *self.token.lock() = Some(token.to_owned());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.token.lock() = None;
        Ok(())
    }
}
