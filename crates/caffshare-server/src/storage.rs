//! File-system layout for uploaded originals and derived previews.
//!
//! Originals live under `<files_root>/<owner public id>/<stem>_<timestamp>.caff`
//! and previews under `<previews_root>/<owner public id>/<stem>_<timestamp>.gif`.
//! The relative structure below both roots is identical, so a preview path is
//! always computable from its original.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};

/// The single accepted upload extension (compared case-insensitively).
pub const CAFF_EXTENSION: &str = "caff";

/// Longest stem kept in a stored file name, in bytes. Leaves room for the
/// timestamp and extension under the usual 255-byte name limit.
pub const MAX_STEM_BYTES: usize = 200;

/// Extension of derived previews.
pub const PREVIEW_EXTENSION: &str = "gif";

/// Suffix appended to a preview while the decoder is still writing it.
const STAGING_SUFFIX: &str = "part";

/// Storage failures. All of them are infrastructure errors from the
/// caller's point of view.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("path already exists: {}", .0.display())]
    Collision(PathBuf),

    #[error("path is not under the storage root: {}", .0.display())]
    OutsideRoot(PathBuf),

    #[error("preview was not produced: {}", .0.display())]
    EmptyPreview(PathBuf),

    #[error("invalid path component: {0}")]
    InvalidName(String),
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Root directories for the store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub files_root: PathBuf,
    pub previews_root: PathBuf,
}

/// Decides where uploaded bytes live and performs the writes.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    files_root: PathBuf,
    previews_root: PathBuf,
}

impl ArtifactStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            files_root: config.files_root,
            previews_root: config.previews_root,
        }
    }

    pub fn files_root(&self) -> &Path {
        &self.files_root
    }

    pub fn previews_root(&self) -> &Path {
        &self.previews_root
    }

    /// Builds the path for a new original and creates the owner's directory.
    ///
    /// The timestamp suffix is the only collision guard for uploads of the
    /// same stem by the same owner; see [`ArtifactStore::write_original`].
    pub async fn reserve_path(
        &self,
        owner_public_id: &str,
        declared_filename: &str,
    ) -> Result<PathBuf, StorageError> {
        self.reserve_path_at(owner_public_id, declared_filename, Utc::now())
            .await
    }

    pub(crate) async fn reserve_path_at(
        &self,
        owner_public_id: &str,
        declared_filename: &str,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, StorageError> {
        check_segment(owner_public_id)?;
        let stem = sanitize_stem(declared_filename)?;

        let owner_dir = self.files_root.join(owner_public_id);
        fs::create_dir_all(&owner_dir)
            .await
            .map_err(|e| StorageError::io(&owner_dir, e))?;

        Ok(owner_dir.join(format!(
            "{}_{}.{}",
            stem,
            upload_timestamp(now),
            CAFF_EXTENSION
        )))
    }

    /// Copies `body` into a new file at `original_path`.
    ///
    /// The file is opened with create-new semantics, so an exact timestamp
    /// collision fails with [`StorageError::Collision`] instead of
    /// overwriting another upload. A partially written file is removed
    /// before the error is returned.
    pub async fn write_original<R>(
        &self,
        original_path: &Path,
        body: &mut R,
    ) -> Result<u64, StorageError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(original_path)
            .await
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    StorageError::Collision(original_path.to_path_buf())
                } else {
                    StorageError::io(original_path, e)
                }
            })?;

        let written = async {
            let written = tokio::io::copy(body, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, io::Error>(written)
        }
        .await;

        match written {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                drop(file);
                if let Err(cleanup) = fs::remove_file(original_path).await {
                    tracing::warn!(
                        path = %original_path.display(),
                        error = %cleanup,
                        "Failed to remove partially written original"
                    );
                }
                Err(StorageError::io(original_path, e))
            }
        }
    }

    /// Maps an original path to its preview path: same relative structure,
    /// rooted under the previews root, with the preview extension.
    pub fn derive_preview_path(&self, original_path: &Path) -> Result<PathBuf, StorageError> {
        let relative = original_path
            .strip_prefix(&self.files_root)
            .map_err(|_| StorageError::OutsideRoot(original_path.to_path_buf()))?;
        Ok(self
            .previews_root
            .join(relative)
            .with_extension(PREVIEW_EXTENSION))
    }

    /// Creates the preview's directory and lets `producer` write it.
    ///
    /// The producer receives a staging path next to `preview_path`. Only a
    /// non-empty staging file from a successful producer is renamed into
    /// place; in every other case the staging file is discarded, so readers
    /// never observe a partial preview.
    pub async fn finalize_preview<F, Fut, E>(
        &self,
        preview_path: &Path,
        producer: F,
    ) -> Result<(), E>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<StorageError>,
    {
        if let Some(parent) = preview_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }

        let staging = staging_path(preview_path);
        discard(&staging).await;

        if let Err(e) = producer(staging.clone()).await {
            discard(&staging).await;
            return Err(e);
        }

        let produced = match fs::metadata(&staging).await {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                discard(&staging).await;
                return Err(StorageError::io(&staging, e).into());
            }
        };
        if !produced {
            discard(&staging).await;
            return Err(StorageError::EmptyPreview(preview_path.to_path_buf()).into());
        }

        fs::rename(&staging, preview_path)
            .await
            .map_err(|e| StorageError::io(preview_path, e))?;
        Ok(())
    }

    /// Relative key of an original: `<owner>/<stem>_<timestamp>`, without
    /// extension, `/`-separated. This is what the record store persists.
    pub fn relative_key(&self, original_path: &Path) -> Result<String, StorageError> {
        let relative = original_path
            .strip_prefix(&self.files_root)
            .map_err(|_| StorageError::OutsideRoot(original_path.to_path_buf()))?
            .with_extension("");

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => segments.push(
                    segment
                        .to_str()
                        .ok_or_else(|| StorageError::InvalidName(relative.display().to_string()))?
                        .to_string(),
                ),
                _ => return Err(StorageError::InvalidName(relative.display().to_string())),
            }
        }
        if segments.is_empty() {
            return Err(StorageError::InvalidName(String::new()));
        }
        Ok(segments.join("/"))
    }

    /// Path of the original for a persisted relative key.
    pub fn original_for_key(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(append_extension(
            self.files_root.join(key_to_relative(key)?),
            CAFF_EXTENSION,
        ))
    }

    /// Path of the preview for a persisted relative key.
    pub fn preview_for_key(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(append_extension(
            self.previews_root.join(key_to_relative(key)?),
            PREVIEW_EXTENSION,
        ))
    }

    /// Removes an original. A file that is already gone is not an error.
    pub async fn remove_original(&self, original_path: &Path) -> Result<(), StorageError> {
        remove_if_present(original_path).await
    }

    /// Removes both files of an ingested artifact, e.g. when the record that
    /// would reference them could not be created.
    pub async fn remove_artifact(&self, key: &str) -> Result<(), StorageError> {
        remove_if_present(&self.preview_for_key(key)?).await?;
        remove_if_present(&self.original_for_key(key)?).await
    }
}

/// Formats the collision-avoidance suffix: `yyyy.MM.dd.HH-mm-ss-f-ff`
/// (tenths, then tenths and hundredths of a second).
pub fn upload_timestamp(now: DateTime<Utc>) -> String {
    let hundredths = now.timestamp_subsec_millis() / 10;
    format!(
        "{}-{}-{:02}",
        now.format("%Y.%m.%d.%H-%M-%S"),
        hundredths / 10,
        hundredths
    )
}

/// Splits an untrusted declared filename into `(stem, extension)`.
///
/// Directory components (either separator) are dropped. Returns `None` when
/// the final component has no extension.
pub fn split_declared_filename(declared: &str) -> Option<(&str, &str)> {
    let name = declared.rsplit(['/', '\\']).next().unwrap_or(declared);
    name.rsplit_once('.')
}

/// Stem used in the stored file name.
fn sanitize_stem(declared_filename: &str) -> Result<String, StorageError> {
    let stem = match split_declared_filename(declared_filename) {
        Some((stem, _)) => stem,
        None => declared_filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(declared_filename),
    };

    let stem: String = stem
        .trim()
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();

    if stem.is_empty() || stem == "." || stem == ".." || stem.len() > MAX_STEM_BYTES {
        return Err(StorageError::InvalidName(declared_filename.to_string()));
    }
    Ok(stem)
}

/// A single directory name: no separators, no traversal.
fn check_segment(segment: &str) -> Result<(), StorageError> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\'])
        || segment.chars().any(char::is_control)
    {
        return Err(StorageError::InvalidName(segment.to_string()));
    }
    Ok(())
}

fn key_to_relative(key: &str) -> Result<PathBuf, StorageError> {
    let mut relative = PathBuf::new();
    for segment in key.split('/') {
        check_segment(segment).map_err(|_| StorageError::InvalidName(key.to_string()))?;
        relative.push(segment);
    }
    if relative.as_os_str().is_empty() {
        return Err(StorageError::InvalidName(key.to_string()));
    }
    Ok(relative)
}

// Stems may contain dots (the timestamp does), so `with_extension` would
// clobber part of the stem here.
fn append_extension(path: PathBuf, extension: &str) -> PathBuf {
    let mut name = path.into_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn staging_path(preview_path: &Path) -> PathBuf {
    append_extension(preview_path.to_path_buf(), STAGING_SUFFIX)
}

async fn remove_if_present(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

async fn discard(path: &Path) {
    if let Err(e) = remove_if_present(path).await {
        tracing::warn!(error = %e, "Failed to discard staging file");
    }
}
