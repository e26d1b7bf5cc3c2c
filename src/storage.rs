//! Shared storage directory.
//!
//! The directory is written by this service (uploads, normalized images) and by
//! the downstream automation (generated media). Nothing here ever overwrites an
//! existing file: every write claims its name with create-new semantics.

use std::fmt;
use std::io::ErrorKind as StdIoErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, warn};

/// Extension used for normalized images.
pub const JPEG_EXTENSION: &str = "jpg";
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

const MAX_NAME_ATTEMPTS: usize = 16;
const MAX_EXTENSION_LEN: usize = 16;

/// Produces the token part of a stored file name.
pub type TokenSource = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create storage directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free file name found after {0} attempts")]
    NamesExhausted(usize),
}

/// A file that lives in the storage directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Bare file name, as handed to the downstream automation
    pub name: String,
    pub path: PathBuf,
    pub content_type: String,
    /// Name the client uploaded the file under
    pub original_name: String,
}

impl StoredFile {
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.name)
    }
}

/// Handle to the shared storage directory.
#[derive(Clone)]
pub struct StorageRoot {
    dir: PathBuf,
    tokens: TokenSource,
}

impl fmt::Debug for StorageRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRoot").field("dir", &self.dir).finish()
    }
}

impl StorageRoot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_token_source(dir, Arc::new(unique_token))
    }

    pub fn with_token_source(dir: impl Into<PathBuf>, tokens: TokenSource) -> Self {
        Self {
            dir: dir.into(),
            tokens,
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    /// Create the directory, including parents, if it doesn't exist yet.
    pub async fn ensure_dir(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StorageError::CreateDir {
                path: self.dir.clone(),
                source,
            })
    }

    /// Resolve a client-supplied file name to a path inside the directory.
    ///
    /// Returns `None` for anything that is not a single plain path component.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return None;
        }
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(self.dir.join(name)),
            _ => None,
        }
    }

    /// Persist an upload under a freshly generated unique name.
    ///
    /// A name is only taken if both `<token>.<ext>` and its `.jpg` sibling are
    /// free, so a later normalization has a target of its own.
    pub async fn store(
        &self,
        original_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<StoredFile, StorageError> {
        self.ensure_dir().await?;

        let extension = sanitize_extension(original_name);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let mut token = (self.tokens)();
            if attempt > 0 {
                token = format!("{token}-{attempt}");
            }
            let name = match &extension {
                Some(ext) => format!("{token}.{ext}"),
                None => token.clone(),
            };
            let path = self.dir.join(&name);

            if extension.as_deref() != Some(JPEG_EXTENSION) {
                let sibling = self.dir.join(format!("{token}.{JPEG_EXTENSION}"));
                if tokio::fs::try_exists(&sibling).await.unwrap_or(true) {
                    debug!(%name, "JPEG sibling already taken, generating a new name");
                    continue;
                }
            }

            match create_new(&path, data).await {
                Ok(()) => {
                    debug!(%name, original_name, size = data.len(), "Stored upload");
                    return Ok(StoredFile {
                        name,
                        path,
                        content_type: content_type.to_string(),
                        original_name: original_name.to_string(),
                    });
                }
                Err(error) if error.kind() == StdIoErrorKind::AlreadyExists => {
                    warn!(%name, attempt, "Generated file name already exists, retrying");
                }
                Err(source) => return Err(StorageError::Write { path, source }),
            }
        }

        Err(StorageError::NamesExhausted(MAX_NAME_ATTEMPTS))
    }

    /// Append a line to a log file kept in the directory.
    pub async fn append_log(&self, file_name: &str, line: &str) -> Result<(), StorageError> {
        self.ensure_dir().await?;
        let path = self.dir.join(file_name);
        let write = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        };
        write
            .await
            .map_err(|source| StorageError::Write { path, source })
    }
}

/// Write `data` to `path`, failing if the file already exists.
pub(crate) async fn create_new(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;

    if let Err(error) = write_all_and_flush(&mut file, data).await {
        // don't leave a truncated file behind under a claimed name
        let _ = tokio::fs::remove_file(path).await;
        return Err(error);
    }
    Ok(())
}

async fn write_all_and_flush(file: &mut tokio::fs::File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data).await?;
    file.flush().await
}

/// `<unix millis>-<random>`, e.g. `1718012345678-482913374`
pub fn unique_token() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let random: u32 = rand::random_range(0..1_000_000_000);
    format!("{millis}-{random}")
}

fn sanitize_extension(original_name: &str) -> Option<String> {
    Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(str::to_string)
}
