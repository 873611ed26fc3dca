//! CAFF Share API server binary.

use std::sync::Arc;

use anyhow::{Context, Result};
use caffshare_ids::IdCodec;
use caffshare_server::config::ServerConfig;
use caffshare_server::db::{create_pool, run_migrations};
use caffshare_server::decoder::CommandDecoder;
use caffshare_server::{create_router, AppState, ArtifactStore, IngestionPipeline};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("caffshare_server=info,tower_http=info")),
        )
        .init();

    let config = ServerConfig::parse();

    let ids = Arc::new(IdCodec::new(config.id_config()).context("invalid identifier settings")?);
    let store = Arc::new(ArtifactStore::new(config.store_config()));
    let decoder = Arc::new(CommandDecoder::new(&config.decoder));

    let pool = create_pool(&config.database_url)
        .await
        .context("failed to connect to the database")?;
    run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let pipeline = Arc::new(IngestionPipeline::new(
        ids.clone(),
        store,
        decoder,
        Arc::new(pool.clone()),
        config.pipeline_config(),
    ));

    let state = AppState::new(pool, ids, pipeline).with_max_upload_bytes(config.max_upload_bytes);
    let app = create_router(state);

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(
        addr = %config.bind,
        files = %config.files_root.display(),
        previews = %config.previews_root.display(),
        decoder = %config.decoder.display(),
        "listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
