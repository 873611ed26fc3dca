//! Boundary to the external CAFF decoder.
//!
//! The decoder validates an untrusted CAFF file and, if it is valid, writes
//! an animated GIF preview. It is reached through one narrow call:
//! `(input path, output path) -> status`, where `0` means the output now
//! exists and anything else means the input failed validation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

/// Maximum stderr bytes kept for diagnostics.
const MAX_STDERR_BYTES: usize = 2048;

/// Status reported by a successful decode.
pub const DECODE_OK: i32 = 0;

/// Failures that are not attributable to the file's content.
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("failed to start decoder {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for decoder: {0}")]
    Wait(#[source] std::io::Error),

    #[error("decoder was terminated without an exit status")]
    Terminated,
}

/// The decoder seam.
///
/// Implementations may block on CPU or I/O. Callers must not run two decodes
/// against the same output path concurrently.
#[async_trait]
pub trait CaffDecoder: Send + Sync {
    /// Validates `input` and writes its preview to `output`.
    ///
    /// Returns the decoder's status code; `Err` is reserved for failures to
    /// run the decoder at all.
    async fn decode(&self, input: &Path, output: &Path) -> Result<i32, DecoderError>;
}

/// Runs an external decoder executable as `<program> [args..] <input> <output>`.
///
/// The child is killed if the returned future is dropped, which is how the
/// pipeline's decode timeout stops a hung decoder.
#[derive(Debug, Clone)]
pub struct CommandDecoder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandDecoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments placed before the input and output paths.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl CaffDecoder for CommandDecoder {
    async fn decode(&self, input: &Path, output: &Path) -> Result<i32, DecoderError> {
        let result = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output_result = match result {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                return Err(DecoderError::Spawn {
                    program: self.program.clone(),
                    source: e,
                });
            }
            Err(e) => return Err(DecoderError::Wait(e)),
        };

        let code = output_result.status.code().ok_or(DecoderError::Terminated)?;
        if code != DECODE_OK {
            tracing::debug!(
                input = %input.display(),
                status = code,
                stderr = %truncate_stderr(&output_result.stderr),
                "Decoder rejected input"
            );
        }
        Ok(code)
    }
}

fn truncate_stderr(stderr: &[u8]) -> String {
    if stderr.len() > MAX_STDERR_BYTES {
        format!(
            "{}...[truncated, total {} bytes]",
            String::from_utf8_lossy(&stderr[..MAX_STDERR_BYTES]),
            stderr.len()
        )
    } else {
        String::from_utf8_lossy(stderr).trim_end().to_string()
    }
}
