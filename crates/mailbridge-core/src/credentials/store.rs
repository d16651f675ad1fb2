//! File-backed credential store.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use mailbridge_oauth::CredentialSet;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Directory under the user config directory.
pub const STORE_DIR: &str = "mailbridge";

/// File name of the credential record.
pub const CREDENTIALS_FILE: &str = "credentials.json";

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Error type for credential store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading, writing or deleting the file failed.
    #[error("Credential file {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// The file exists but does not hold a credential record.
    #[error("Credential file {path} is corrupt: {source}")]
    Corrupt {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Credentials could not be serialized.
    #[error("Failed to serialize credentials: {0}")]
    Serialize(#[source] serde_json::Error),

    /// No per-user configuration directory on this platform.
    #[error("No user configuration directory available")]
    NoConfigDir,
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for credential store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Default credential file: `<config dir>/mailbridge/credentials.json`.
///
/// # Errors
///
/// Returns [`StoreError::NoConfigDir`] when the platform has no config dir.
pub fn default_location() -> StoreResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(STORE_DIR).join(CREDENTIALS_FILE))
        .ok_or(StoreError::NoConfigDir)
}

/// Credential file at a fixed path.
///
/// There is no locking here; the refresh coordinator is the only writer
/// after login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at [`default_location`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoConfigDir`] when the platform has no config dir.
    pub fn at_default_location() -> StoreResult<Self> {
        default_location().map(Self::new)
    }

    /// Path of the credential file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the stored record with `credentials`.
    ///
    /// The record is written to a sibling temp file created with owner-only
    /// permissions and renamed over the target, so readers never observe a
    /// partial write.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn save(&self, credentials: &CredentialSet) -> StoreResult<()> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(dir).await?;
        }

        let body = serde_json::to_vec_pretty(credentials).map_err(StoreError::Serialize)?;
        let temp = self.temp_path();

        if let Err(e) = write_private(&temp, &body).await {
            remove_quietly(&temp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp, &self.path).await {
            remove_quietly(&temp).await;
            return Err(StoreError::io(&self.path, e));
        }
        restrict_file(&self.path).await?;

        debug!(path = %self.path.display(), "Saved credentials");
        Ok(())
    }

    /// Loads the stored record.
    ///
    /// Returns `Ok(None)` when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(&self) -> StoreResult<Option<CredentialSet>> {
        let body = match fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored credentials");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Deletes the stored record. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn clear(&self) -> StoreResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Cleared credentials");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map_or_else(|| OsString::from(CREDENTIALS_FILE), OsString::from);
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

async fn create_private_dir(dir: &Path) -> StoreResult<()> {
    if fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);

    builder
        .create(dir)
        .await
        .map_err(|e| StoreError::io(dir, e))?;
    debug!(dir = %dir.display(), "Created credential directory");
    Ok(())
}

async fn write_private(path: &Path, body: &[u8]) -> StoreResult<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);

    let mut file = options
        .open(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    // A leftover temp file keeps its old mode; tighten it before writing.
    restrict_file(path).await?;
    file.write_all(body)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    file.sync_all().await.map_err(|e| StoreError::io(path, e))
}

#[cfg(unix)]
async fn restrict_file(path: &Path) -> StoreResult<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(FILE_MODE))
        .await
        .map_err(|e| StoreError::io(path, e))
}

#[cfg(not(unix))]
#[allow(clippy::unused_async)]
async fn restrict_file(_path: &Path) -> StoreResult<()> {
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to remove temp credential file: {e}");
        }
    }
}
