//! One-off decoder runs for checking a CAFF file outside the server.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use caffshare_server::decoder::{CaffDecoder, DecoderError, DECODE_OK};
use serde::Serialize;

/// How a single decoder run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Status 0 and a non-empty preview.
    Valid { preview_bytes: u64 },
    /// The decoder rejected the file.
    Rejected { status: i32 },
    /// Status 0 but no usable preview was written.
    MissingPreview,
    /// The decoder did not finish in time and was killed.
    TimedOut { after_secs: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub elapsed_ms: u64,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        matches!(self.outcome, Outcome::Valid { .. })
    }
}

/// Default preview location: the input path with a `.gif` extension.
pub fn default_output(input: &Path) -> PathBuf {
    input.with_extension("gif")
}

/// Runs `decoder` once on `input`, writing to `output`.
///
/// Spawn and wait failures are returned as errors. Everything the decoder
/// itself decided is reported in the [`ValidationReport`].
pub async fn run(
    decoder: &dyn CaffDecoder,
    input: &Path,
    output: &Path,
    timeout: Duration,
) -> Result<ValidationReport, DecoderError> {
    let started = Instant::now();

    let outcome = match tokio::time::timeout(timeout, decoder.decode(input, output)).await {
        Err(_) => Outcome::TimedOut {
            after_secs: timeout.as_secs(),
        },
        Ok(result) => match result? {
            DECODE_OK => match tokio::fs::metadata(output).await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => Outcome::Valid {
                    preview_bytes: meta.len(),
                },
                _ => Outcome::MissingPreview,
            },
            status => Outcome::Rejected { status },
        },
    };

    Ok(ValidationReport {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        outcome,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
}
