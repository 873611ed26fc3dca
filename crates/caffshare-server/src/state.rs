//! Shared handler state.

use std::sync::Arc;

use caffshare_ids::IdCodec;
use sqlx::PgPool;

use crate::pipeline::IngestionPipeline;
use crate::storage::ArtifactStore;

/// Default upload body limit (64 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// State shared by every route. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub ids: Arc<IdCodec>,
    pub pipeline: Arc<IngestionPipeline>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(pool: PgPool, ids: Arc<IdCodec>, pipeline: Arc<IngestionPipeline>) -> Self {
        Self {
            pool,
            ids,
            pipeline,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        self.pipeline.store()
    }
}
