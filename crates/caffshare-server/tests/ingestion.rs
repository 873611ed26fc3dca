//! End-to-end ingestion tests against a temporary directory.
//!
//! The decoder is replaced by in-process stubs and the owner directory by an
//! in-memory map, so these run without PostgreSQL or a decoder binary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use caffshare_ids::{IdCodec, IdConfig, Namespace};
use caffshare_server::decoder::{CaffDecoder, DecoderError};
use caffshare_server::pipeline::{
    FailureKind, Owner, OwnerDirectory, PipelineConfig, RejectedUploadPolicy,
};
use caffshare_server::storage::StorageError;
use caffshare_server::{ArtifactStore, IngestError, IngestionPipeline, StoreConfig, UploadRequest};
use tempfile::TempDir;

const GIF_BYTES: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
const CAFF_MAGIC: &[u8] = b"CAFF";

/// Writes a GIF when the input starts with the CAFF magic, otherwise exits 1.
struct MagicDecoder {
    calls: AtomicUsize,
}

#[async_trait]
impl CaffDecoder for MagicDecoder {
    async fn decode(&self, input: &Path, output: &Path) -> Result<i32, DecoderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let contents = tokio::fs::read(input).await.map_err(DecoderError::Wait)?;
        if !contents.starts_with(CAFF_MAGIC) {
            return Ok(1);
        }
        tokio::fs::write(output, GIF_BYTES)
            .await
            .map_err(DecoderError::Wait)?;
        Ok(0)
    }
}

/// Never finishes within any reasonable timeout.
struct HangingDecoder;

#[async_trait]
impl CaffDecoder for HangingDecoder {
    async fn decode(&self, _input: &Path, _output: &Path) -> Result<i32, DecoderError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(0)
    }
}

/// Reports success without writing anything.
struct SilentDecoder;

#[async_trait]
impl CaffDecoder for SilentDecoder {
    async fn decode(&self, _input: &Path, _output: &Path) -> Result<i32, DecoderError> {
        Ok(0)
    }
}

/// Writes half a preview, then dies.
struct CrashingDecoder;

#[async_trait]
impl CaffDecoder for CrashingDecoder {
    async fn decode(&self, _input: &Path, output: &Path) -> Result<i32, DecoderError> {
        tokio::fs::write(output, &GIF_BYTES[..4])
            .await
            .map_err(DecoderError::Wait)?;
        Err(DecoderError::Terminated)
    }
}

#[derive(Default)]
struct InMemoryOwners {
    owners: HashMap<i64, Owner>,
}

#[async_trait]
impl OwnerDirectory for InMemoryOwners {
    async fn find_active_owner(&self, id: i64) -> Result<Option<Owner>, sqlx::Error> {
        Ok(self.owners.get(&id).cloned())
    }
}

struct Harness {
    _dir: TempDir,
    files_root: PathBuf,
    previews_root: PathBuf,
    ids: Arc<IdCodec>,
    pipeline: IngestionPipeline,
}

impl Harness {
    fn new(decoder: Arc<dyn CaffDecoder>, config: PipelineConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let files_root = dir.path().join("Files");
        let previews_root = dir.path().join("Previews");

        let ids = Arc::new(IdCodec::new(IdConfig::new("ingestion-tests", 8)).unwrap());
        let store = Arc::new(ArtifactStore::new(StoreConfig {
            files_root: files_root.clone(),
            previews_root: previews_root.clone(),
        }));

        let mut owners = InMemoryOwners::default();
        owners.owners.insert(
            1,
            Owner {
                id: 1,
                username: "alice".to_string(),
            },
        );

        let pipeline =
            IngestionPipeline::new(ids.clone(), store, decoder, Arc::new(owners), config);

        Self {
            _dir: dir,
            files_root,
            previews_root,
            ids,
            pipeline,
        }
    }

    fn with_decoder(decoder: Arc<dyn CaffDecoder>) -> Self {
        Self::new(decoder, PipelineConfig::default())
    }

    fn alice(&self) -> String {
        self.ids.encode_key(Namespace::User, 1).unwrap()
    }

    async fn upload(
        &self,
        filename: &str,
        owner: &str,
        body: &[u8],
    ) -> Result<caffshare_server::StoredArtifact, IngestError> {
        self.pipeline
            .ingest(UploadRequest {
                declared_filename: filename.to_string(),
                owner_public_id: owner.to_string(),
                body,
            })
            .await
    }
}

fn magic_decoder() -> Arc<MagicDecoder> {
    Arc::new(MagicDecoder {
        calls: AtomicUsize::new(0),
    })
}

fn valid_caff() -> Vec<u8> {
    let mut body = CAFF_MAGIC.to_vec();
    body.extend_from_slice(&[0u8; 64]);
    body
}

/// Lists every regular file below `root`, relative to it.
fn files_under(root: &Path) -> Vec<PathBuf> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                out.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

#[tokio::test]
async fn test_valid_upload_produces_original_and_preview() {
    let h = Harness::with_decoder(magic_decoder());
    let owner = h.alice();
    let body = valid_caff();

    let stored = h.upload("photo.caff", &owner, &body).await.unwrap();

    assert_eq!(stored.name, "photo");
    assert_eq!(stored.owner.username, "alice");
    assert_eq!(stored.size_bytes, body.len() as u64);

    assert!(stored.original_path.starts_with(h.files_root.join(&owner)));
    assert_eq!(stored.original_path.extension().unwrap(), "caff");
    assert_eq!(std::fs::read(&stored.original_path).unwrap(), body);

    assert!(stored.preview_path.starts_with(h.previews_root.join(&owner)));
    assert_eq!(stored.preview_path.extension().unwrap(), "gif");
    assert_eq!(std::fs::read(&stored.preview_path).unwrap(), GIF_BYTES);

    let (key_owner, key_file) = stored.key.split_once('/').unwrap();
    assert_eq!(key_owner, owner);
    assert!(key_file.starts_with("photo_"));
    assert!(!stored.key.ends_with(".caff"));
}

#[tokio::test]
async fn test_key_resolves_back_to_both_files() {
    let h = Harness::with_decoder(magic_decoder());
    let stored = h.upload("photo.caff", &h.alice(), &valid_caff()).await.unwrap();

    let store = h.pipeline.store();
    assert_eq!(store.original_for_key(&stored.key).unwrap(), stored.original_path);
    assert_eq!(store.preview_for_key(&stored.key).unwrap(), stored.preview_path);
}

#[tokio::test]
async fn test_uppercase_extension_is_accepted() {
    let h = Harness::with_decoder(magic_decoder());
    let stored = h.upload("Holiday.CAFF", &h.alice(), &valid_caff()).await.unwrap();
    assert_eq!(stored.name, "Holiday");
}

#[tokio::test]
async fn test_bad_extension_writes_nothing() {
    let decoder = magic_decoder();
    let h = Harness::with_decoder(decoder.clone());

    let err = h.upload("photo.png", &h.alice(), &valid_caff()).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::MalformedRequest);
    assert_eq!(err.to_string(), "Bad file extension!");
    assert!(files_under(&h.files_root).is_empty());
    assert!(files_under(&h.previews_root).is_empty());
    assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_overlong_name_is_rejected_before_writing() {
    let decoder = magic_decoder();
    let h = Harness::with_decoder(decoder.clone());
    let filename = format!("{}.caff", "a".repeat(300));

    let err = h.upload(&filename, &h.alice(), &valid_caff()).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::MalformedRequest);
    assert_eq!(err.to_string(), "Bad file name!");
    assert!(!h.files_root.exists());
    assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_owner_is_rejected_before_writing() {
    let h = Harness::with_decoder(magic_decoder());
    let stranger = h.ids.encode_key(Namespace::User, 42).unwrap();

    for owner in [stranger.as_str(), "not-an-id", ""] {
        let err = h.upload("photo.caff", owner, &valid_caff()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::MalformedRequest);
        assert!(matches!(err, IngestError::OwnerNotFound(_)));
        assert_eq!(err.to_string(), format!("No User was found with the id {}!", owner));
    }

    assert!(!h.files_root.exists());
}

#[tokio::test]
async fn test_owner_id_from_another_namespace_is_rejected() {
    let h = Harness::with_decoder(magic_decoder());
    let caff_id = h.ids.encode_key(Namespace::Caff, 1).unwrap();

    let err = h.upload("photo.caff", &caff_id, &valid_caff()).await.unwrap_err();
    assert!(matches!(err, IngestError::OwnerNotFound(_)));
}

#[tokio::test]
async fn test_rejected_content_removes_original_by_default() {
    let h = Harness::with_decoder(magic_decoder());

    let err = h.upload("bad.caff", &h.alice(), b"not a caff").await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::InvalidContent);
    assert_eq!(err.to_string(), "The CAFF file was not correct!");
    assert!(files_under(&h.files_root).is_empty());
    assert!(files_under(&h.previews_root).is_empty());
}

#[tokio::test]
async fn test_rejected_content_is_retained_when_configured() {
    let config = PipelineConfig {
        rejected_uploads: RejectedUploadPolicy::Retain,
        ..PipelineConfig::default()
    };
    let h = Harness::new(magic_decoder(), config);

    let err = h.upload("bad.caff", &h.alice(), b"not a caff").await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::InvalidContent);
    let originals = files_under(&h.files_root);
    assert_eq!(originals.len(), 1);
    assert_eq!(originals[0].extension().unwrap(), "caff");
    assert!(files_under(&h.previews_root).is_empty());
}

#[tokio::test]
async fn test_hung_decoder_times_out_as_infrastructure_failure() {
    let config = PipelineConfig {
        decode_timeout: Duration::from_millis(50),
        ..PipelineConfig::default()
    };
    let h = Harness::new(Arc::new(HangingDecoder), config);

    let err = h.upload("photo.caff", &h.alice(), &valid_caff()).await.unwrap_err();

    assert!(matches!(err, IngestError::DecodeTimeout(_)));
    assert_eq!(err.kind(), FailureKind::Infrastructure);
    assert!(files_under(&h.files_root).is_empty());
    assert!(files_under(&h.previews_root).is_empty());
}

#[tokio::test]
async fn test_success_without_output_is_not_published() {
    let h = Harness::with_decoder(Arc::new(SilentDecoder));

    let err = h.upload("photo.caff", &h.alice(), &valid_caff()).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Infrastructure);
    assert!(matches!(
        err,
        IngestError::Storage(StorageError::EmptyPreview(_))
    ));
    assert!(files_under(&h.previews_root).is_empty());
}

#[tokio::test]
async fn test_crashed_decoder_leaves_no_partial_preview() {
    let h = Harness::with_decoder(Arc::new(CrashingDecoder));

    let err = h.upload("photo.caff", &h.alice(), &valid_caff()).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Infrastructure);
    assert!(matches!(err, IngestError::Decoder(DecoderError::Terminated)));
    assert!(files_under(&h.previews_root).is_empty());
}

#[tokio::test]
async fn test_same_stem_uploads_get_distinct_keys() {
    let h = Harness::with_decoder(magic_decoder());
    let owner = h.alice();

    let first = h.upload("photo.caff", &owner, &valid_caff()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = h.upload("photo.caff", &owner, &valid_caff()).await.unwrap();

    assert_ne!(first.key, second.key);
    assert_eq!(files_under(&h.files_root).len(), 2);
    assert_eq!(files_under(&h.previews_root).len(), 2);
}

#[tokio::test]
async fn test_concurrent_uploads_are_isolated() {
    let decoder = magic_decoder();
    let h = Arc::new(Harness::with_decoder(decoder.clone()));

    let mut tasks = Vec::new();
    for name in ["one.caff", "two.caff", "three.caff"] {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            let owner = h.alice();
            h.upload(name, &owner, &valid_caff()).await
        }));
    }

    let mut keys = Vec::new();
    for task in tasks {
        keys.push(task.await.unwrap().unwrap().key);
    }
    keys.sort();
    keys.dedup();

    assert_eq!(keys.len(), 3);
    assert_eq!(decoder.calls.load(Ordering::SeqCst), 3);
    assert_eq!(files_under(&h.previews_root).len(), 3);
}
