//! Server configuration, read once at startup from flags or environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use caffshare_ids::IdConfig;
use clap::Parser;

use crate::pipeline::{PipelineConfig, RejectedUploadPolicy};
use crate::state::DEFAULT_MAX_UPLOAD_BYTES;
use crate::storage::StoreConfig;

/// CAFF Share API server
#[derive(Debug, Clone, Parser)]
#[command(name = "caffshare-server")]
#[command(version, about, long_about = None)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "CAFFSHARE_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Directory holding uploaded originals
    #[arg(long, env = "CAFFSHARE_FILES_ROOT", default_value = "Files")]
    pub files_root: PathBuf,

    /// Directory holding generated previews
    #[arg(long, env = "CAFFSHARE_PREVIEWS_ROOT", default_value = "Previews")]
    pub previews_root: PathBuf,

    /// Salt for public identifiers. Changing it invalidates every issued id.
    #[arg(long, env = "CAFFSHARE_ID_SALT", hide_env_values = true)]
    pub id_salt: String,

    /// Minimum length of public identifiers
    #[arg(long, env = "CAFFSHARE_ID_MIN_LENGTH", default_value_t = 8)]
    pub id_min_length: usize,

    /// Decoder executable, invoked as `<decoder> <input.caff> <output.gif>`
    #[arg(long, env = "CAFFSHARE_DECODER")]
    pub decoder: PathBuf,

    /// Seconds a single decode may run before it is killed
    #[arg(long, env = "CAFFSHARE_DECODE_TIMEOUT_SECS", default_value_t = 30)]
    pub decode_timeout_secs: u64,

    /// Maximum number of decodes running at once
    #[arg(long, env = "CAFFSHARE_MAX_CONCURRENT_DECODES", default_value_t = 4)]
    pub max_concurrent_decodes: usize,

    /// What to do with originals the decoder rejects
    #[arg(long, env = "CAFFSHARE_REJECTED_UPLOADS", value_enum, default_value_t = RejectedUploadPolicy::Delete)]
    pub rejected_uploads: RejectedUploadPolicy,

    /// Maximum accepted upload body size in bytes
    #[arg(long, env = "CAFFSHARE_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    pub fn id_config(&self) -> IdConfig {
        IdConfig::new(self.id_salt.clone(), self.id_min_length)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            files_root: self.files_root.clone(),
            previews_root: self.previews_root.clone(),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            decode_timeout: Duration::from_secs(self.decode_timeout_secs),
            max_concurrent_decodes: self.max_concurrent_decodes,
            rejected_uploads: self.rejected_uploads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> ServerConfig {
        let mut args = vec![
            "caffshare-server",
            "--database-url",
            "postgres://localhost/caffshare",
            "--id-salt",
            "pepper",
            "--decoder",
            "/usr/local/bin/caff-parser",
        ];
        args.extend_from_slice(extra);
        ServerConfig::try_parse_from(args).expect("arguments should parse")
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.files_root, PathBuf::from("Files"));
        assert_eq!(config.previews_root, PathBuf::from("Previews"));
        assert_eq!(config.id_min_length, 8);

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.decode_timeout, Duration::from_secs(30));
        assert_eq!(pipeline.max_concurrent_decodes, 4);
        assert_eq!(pipeline.rejected_uploads, RejectedUploadPolicy::Delete);
    }

    #[test]
    fn test_retain_policy_flag() {
        let config = parse(&["--rejected-uploads", "retain", "--decode-timeout-secs", "5"]);
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.rejected_uploads, RejectedUploadPolicy::Retain);
        assert_eq!(pipeline.decode_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_id_config_carries_salt() {
        let config = parse(&["--id-min-length", "12"]);
        let ids = config.id_config();
        assert_eq!(ids.salt, "pepper");
        assert_eq!(ids.min_length, 12);
    }
}
