//! CAFF upload ingestion: validate, persist, decode, publish.
//!
//! Each upload runs once, start to finish, on the request that triggered it:
//!
//! 1. surface validation of the declared filename
//! 2. owner resolution from a public user identifier
//! 3. persisting the original under the owner's namespace
//! 4. decoding it into a preview (bounded by a timeout and a permit pool)
//! 5. publishing the relative key for the record store
//!
//! There are no retries. A rejected file has to be uploaded again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use caffshare_ids::{IdCodec, Namespace};
use tokio::io::AsyncRead;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::decoder::{CaffDecoder, DecoderError, DECODE_OK};
use crate::storage::{
    split_declared_filename, ArtifactStore, StorageError, CAFF_EXTENSION, MAX_STEM_BYTES,
};

/// Message returned when the decoder rejects an upload.
pub const INVALID_CONTENT_MESSAGE: &str = "The CAFF file was not correct!";

/// What to do with a persisted original when decoding it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RejectedUploadPolicy {
    /// Remove the original.
    #[default]
    Delete,
    /// Keep the original for inspection; its path is logged.
    Retain,
}

/// Tunables for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub decode_timeout: Duration,
    pub max_concurrent_decodes: usize,
    pub rejected_uploads: RejectedUploadPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decode_timeout: Duration::from_secs(30),
            max_concurrent_decodes: 4,
            rejected_uploads: RejectedUploadPolicy::Delete,
        }
    }
}

/// An uploader as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub id: i64,
    pub username: String,
}

/// Lookup of active uploaders by internal key.
#[async_trait]
pub trait OwnerDirectory: Send + Sync {
    /// Returns the owner if it exists and is active.
    async fn find_active_owner(&self, id: i64) -> Result<Option<Owner>, sqlx::Error>;
}

/// A single upload. Consumed by [`IngestionPipeline::ingest`].
#[derive(Debug)]
pub struct UploadRequest<R> {
    /// Client-supplied filename. Untrusted.
    pub declared_filename: String,
    /// Public identifier of the uploader.
    pub owner_public_id: String,
    pub body: R,
}

/// The outcome of a successful ingestion.
///
/// Both files exist and the preview is non-empty.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub owner: Owner,
    /// Display name: the declared filename's stem.
    pub name: String,
    /// `<owner>/<stem>_<timestamp>`, persisted by the record store.
    pub key: String,
    pub original_path: PathBuf,
    pub preview_path: PathBuf,
    pub size_bytes: u64,
}

/// How a failure should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Rejected before anything was written.
    MalformedRequest,
    /// The decoder rejected the file.
    InvalidContent,
    /// Storage or decoder infrastructure failed.
    Infrastructure,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    BadRequest(String),

    #[error("No User was found with the id {0}!")]
    OwnerNotFound(String),

    #[error("{}", INVALID_CONTENT_MESSAGE)]
    InvalidContent { status: i32 },

    #[error("owner lookup failed: {0}")]
    Lookup(#[from] sqlx::Error),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("decoder failure: {0}")]
    Decoder(#[from] DecoderError),

    #[error("decoder timed out after {0:?}")]
    DecodeTimeout(Duration),
}

impl IngestError {
    pub fn kind(&self) -> FailureKind {
        match self {
            IngestError::BadRequest(_) | IngestError::OwnerNotFound(_) => {
                FailureKind::MalformedRequest
            }
            IngestError::InvalidContent { .. } => FailureKind::InvalidContent,
            IngestError::Lookup(_)
            | IngestError::Storage(_)
            | IngestError::Decoder(_)
            | IngestError::DecodeTimeout(_) => FailureKind::Infrastructure,
        }
    }
}

/// Orchestrates uploads over an [`ArtifactStore`] and a [`CaffDecoder`].
pub struct IngestionPipeline {
    ids: Arc<IdCodec>,
    store: Arc<ArtifactStore>,
    decoder: Arc<dyn CaffDecoder>,
    owners: Arc<dyn OwnerDirectory>,
    decode_permits: Semaphore,
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(
        ids: Arc<IdCodec>,
        store: Arc<ArtifactStore>,
        decoder: Arc<dyn CaffDecoder>,
        owners: Arc<dyn OwnerDirectory>,
        config: PipelineConfig,
    ) -> Self {
        let permits = config.max_concurrent_decodes.max(1);
        Self {
            ids,
            store,
            decoder,
            owners,
            decode_permits: Semaphore::new(permits),
            config,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Runs one upload to completion.
    pub async fn ingest<R>(&self, request: UploadRequest<R>) -> Result<StoredArtifact, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let UploadRequest {
            declared_filename,
            owner_public_id,
            mut body,
        } = request;

        // Step 1: Surface validation
        let name = validate_filename(&declared_filename)?;

        // Step 2: Resolve the owner
        let owner = self.resolve_owner(&owner_public_id).await?;

        // Step 3: Persist the original
        let original_path = self
            .store
            .reserve_path(&owner_public_id, &declared_filename)
            .await?;
        let size_bytes = match self.store.write_original(&original_path, &mut body).await {
            Ok(size) => size,
            Err(e) => {
                error!(path = %original_path.display(), error = %e, "Failed to persist original");
                return Err(e.into());
            }
        };

        // Step 4: Decode into the preview location
        let preview_path = match self.decode(&original_path).await {
            Ok(path) => path,
            Err(e) => {
                self.handle_rejected(&original_path, &e).await;
                return Err(e);
            }
        };

        // Step 5: Publish
        let key = self.store.relative_key(&original_path)?;
        info!(
            owner = %owner_public_id,
            key = %key,
            size_bytes,
            "CAFF upload ingested"
        );

        Ok(StoredArtifact {
            owner,
            name,
            key,
            original_path,
            preview_path,
            size_bytes,
        })
    }

    async fn resolve_owner(&self, owner_public_id: &str) -> Result<Owner, IngestError> {
        let not_found = || IngestError::OwnerNotFound(owner_public_id.to_string());

        let id = self
            .ids
            .decode_key(Namespace::User, owner_public_id)
            .map_err(|_| not_found())?;

        self.owners.find_active_owner(id).await?.ok_or_else(not_found)
    }

    async fn decode(&self, original_path: &Path) -> Result<PathBuf, IngestError> {
        let preview_path = self.store.derive_preview_path(original_path)?;

        self.store
            .finalize_preview(&preview_path, |staging| async move {
                self.run_decoder(original_path, &staging).await
            })
            .await?;

        Ok(preview_path)
    }

    async fn run_decoder(&self, input: &Path, output: &Path) -> Result<(), IngestError> {
        // The semaphore is never closed, so this only waits for a free slot.
        let _permit = self.decode_permits.acquire().await.ok();

        let timeout = self.config.decode_timeout;
        match tokio::time::timeout(timeout, self.decoder.decode(input, output)).await {
            Err(_) => Err(IngestError::DecodeTimeout(timeout)),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(DECODE_OK)) => Ok(()),
            Ok(Ok(status)) => Err(IngestError::InvalidContent { status }),
        }
    }

    async fn handle_rejected(&self, original_path: &Path, cause: &IngestError) {
        match cause.kind() {
            FailureKind::InvalidContent => {
                info!(path = %original_path.display(), error = %cause, "Decoder rejected upload");
            }
            _ => {
                error!(path = %original_path.display(), error = %cause, "Decoding failed");
            }
        }

        match self.config.rejected_uploads {
            RejectedUploadPolicy::Delete => {
                if let Err(e) = self.store.remove_original(original_path).await {
                    warn!(error = %e, "Failed to remove rejected original");
                }
            }
            RejectedUploadPolicy::Retain => {
                warn!(path = %original_path.display(), "Retaining rejected original");
            }
        }
    }
}

/// Checks the declared filename and returns its stem.
pub fn validate_filename(declared_filename: &str) -> Result<String, IngestError> {
    let (stem, extension) = split_declared_filename(declared_filename)
        .ok_or_else(|| IngestError::BadRequest("Bad file extension!".to_string()))?;

    if !extension.eq_ignore_ascii_case(CAFF_EXTENSION) {
        return Err(IngestError::BadRequest("Bad file extension!".to_string()));
    }

    let stem = stem.trim();
    if stem.is_empty() || stem.chars().all(|c| c == '.') || stem.len() > MAX_STEM_BYTES {
        return Err(IngestError::BadRequest("Bad file name!".to_string()));
    }

    Ok(stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename_accepts_caff() {
        assert_eq!(validate_filename("photo.caff").unwrap(), "photo");
        assert_eq!(validate_filename("PHOTO.CAFF").unwrap(), "PHOTO");
        assert_eq!(validate_filename("a.b.CaFf").unwrap(), "a.b");
    }

    #[test]
    fn test_validate_filename_rejects_other_extensions() {
        for name in ["photo.gif", "photo.caff.exe", "photo", "caff", "photo.caf"] {
            let err = validate_filename(name).unwrap_err();
            assert_eq!(err.to_string(), "Bad file extension!", "{}", name);
            assert_eq!(err.kind(), FailureKind::MalformedRequest);
        }
    }

    #[test]
    fn test_validate_filename_rejects_empty_stem() {
        for name in [".caff", " .caff", "dir/..caff"] {
            let err = validate_filename(name).unwrap_err();
            assert_eq!(err.to_string(), "Bad file name!", "{}", name);
        }
    }

    #[test]
    fn test_validate_filename_limits_stem_length() {
        let longest = format!("{}.caff", "a".repeat(MAX_STEM_BYTES));
        assert_eq!(validate_filename(&longest).unwrap().len(), MAX_STEM_BYTES);

        // Multi-byte characters count by their encoded length.
        let wide = format!("{}.caff", "é".repeat(MAX_STEM_BYTES / 2 + 1));
        let err = validate_filename(&wide).unwrap_err();
        assert_eq!(err.to_string(), "Bad file name!");
        assert_eq!(err.kind(), FailureKind::MalformedRequest);
    }

    #[test]
    fn test_validate_filename_drops_directories() {
        assert_eq!(validate_filename("../../evil.caff").unwrap(), "evil");
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            IngestError::OwnerNotFound("x".into()).kind(),
            FailureKind::MalformedRequest
        );
        assert_eq!(
            IngestError::InvalidContent { status: 1 }.kind(),
            FailureKind::InvalidContent
        );
        assert_eq!(
            IngestError::DecodeTimeout(Duration::from_secs(1)).kind(),
            FailureKind::Infrastructure
        );
        assert_eq!(
            IngestError::Decoder(DecoderError::Terminated).kind(),
            FailureKind::Infrastructure
        );
    }

    #[test]
    fn test_invalid_content_message() {
        let err = IngestError::InvalidContent { status: 1 };
        assert_eq!(err.to_string(), INVALID_CONTENT_MESSAGE);
    }

    #[test]
    fn test_default_policy_deletes() {
        assert_eq!(
            PipelineConfig::default().rejected_uploads,
            RejectedUploadPolicy::Delete
        );
    }
}
