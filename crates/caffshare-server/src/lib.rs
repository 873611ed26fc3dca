//! CAFF Share Server - upload ingestion and API for CAFF files
//!
//! This crate provides the ingestion pipeline that turns an untrusted CAFF
//! upload into a stored original plus a decoder-generated preview, and the
//! REST API that exposes the resulting records under public identifiers.

pub mod config;
pub mod db;
pub mod decoder;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod storage;

pub use error::AppError;
pub use pipeline::{IngestError, IngestionPipeline, StoredArtifact, UploadRequest};
pub use routes::create_router;
pub use state::AppState;
pub use storage::{ArtifactStore, StoreConfig};
