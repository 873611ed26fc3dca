// CAFF Share CLI - operator tool for identifiers, storage paths and decoder checks

mod validate;

use std::path::{Path, PathBuf};
use std::time::Duration;

use caffshare_ids::{IdCodec, IdConfig, Namespace};
use caffshare_server::decoder::CommandDecoder;
use caffshare_server::{ArtifactStore, StoreConfig};
use clap::{Args, Parser, Subcommand};

/// caffshare - CAFF Share operator tool
#[derive(Parser)]
#[command(name = "caffshare")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode or decode public identifiers
    Id {
        #[command(subcommand)]
        action: IdAction,
    },
    /// Show the storage key and preview path of a stored original
    Paths {
        /// Path of the original under the files root
        original: PathBuf,

        #[arg(long, env = "CAFFSHARE_FILES_ROOT", default_value = "Files")]
        files_root: PathBuf,

        #[arg(long, env = "CAFFSHARE_PREVIEWS_ROOT", default_value = "Previews")]
        previews_root: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Run the decoder once on a CAFF file
    Validate {
        /// CAFF file to check
        input: PathBuf,

        /// Where to write the preview (defaults to <input>.gif)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Decoder executable
        #[arg(long, env = "CAFFSHARE_DECODER")]
        decoder: PathBuf,

        /// Seconds before the decoder is killed
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum IdAction {
    /// Turn an internal key into a public identifier
    Encode {
        /// user, caff or comment
        namespace: Namespace,
        id: u64,
        #[command(flatten)]
        codec: CodecArgs,
    },
    /// Turn a public identifier back into its internal key
    Decode {
        /// user, caff or comment
        namespace: Namespace,
        public_id: String,
        #[command(flatten)]
        codec: CodecArgs,
    },
}

#[derive(Args)]
struct CodecArgs {
    /// Identifier salt; must match the server's
    #[arg(long, env = "CAFFSHARE_ID_SALT", hide_env_values = true)]
    salt: String,

    #[arg(long, env = "CAFFSHARE_ID_MIN_LENGTH", default_value_t = 8)]
    min_length: usize,
}

impl CodecArgs {
    fn codec(&self) -> anyhow::Result<IdCodec> {
        IdCodec::new(IdConfig::new(self.salt.clone(), self.min_length))
            .map_err(|e| anyhow::anyhow!("Invalid identifier settings: {}", e))
    }
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Id { action } => handle_id(action),
        Commands::Paths {
            original,
            files_root,
            previews_root,
            json,
        } => handle_paths(&original, files_root, previews_root, json),
        Commands::Validate {
            input,
            output,
            decoder,
            timeout_secs,
            json,
        } => handle_validate(&input, output, decoder, timeout_secs, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn handle_id(action: IdAction) -> anyhow::Result<()> {
    match action {
        IdAction::Encode {
            namespace,
            id,
            codec,
        } => {
            println!("{}", codec.codec()?.encode(namespace, id));
            Ok(())
        }
        IdAction::Decode {
            namespace,
            public_id,
            codec,
        } => {
            let id = codec
                .codec()?
                .decode(namespace, &public_id)
                .map_err(|_| anyhow::anyhow!("'{}' is not a valid {} id", public_id, namespace))?;
            println!("{}", id);
            Ok(())
        }
    }
}

#[derive(serde::Serialize)]
struct PathsReport {
    key: String,
    original: PathBuf,
    preview: PathBuf,
}

fn resolve_paths(
    original: &Path,
    files_root: PathBuf,
    previews_root: PathBuf,
) -> anyhow::Result<PathsReport> {
    let store = ArtifactStore::new(StoreConfig {
        files_root,
        previews_root,
    });
    let key = store.relative_key(original)?;
    let preview = store.derive_preview_path(original)?;
    Ok(PathsReport {
        key,
        original: original.to_path_buf(),
        preview,
    })
}

fn handle_paths(
    original: &Path,
    files_root: PathBuf,
    previews_root: PathBuf,
    json: bool,
) -> anyhow::Result<()> {
    let report = resolve_paths(original, files_root, previews_root)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Key:      {}", report.key);
        println!("Original: {}", report.original.display());
        println!("Preview:  {}", report.preview.display());
    }
    Ok(())
}

fn handle_validate(
    input: &Path,
    output: Option<PathBuf>,
    decoder: PathBuf,
    timeout_secs: u64,
    json: bool,
) -> anyhow::Result<()> {
    use colored::Colorize;

    if !input.is_file() {
        anyhow::bail!("'{}' is not a file", input.display());
    }
    let output = output.unwrap_or_else(|| validate::default_output(input));
    let decoder = CommandDecoder::new(decoder);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(validate::run(
        &decoder,
        input,
        &output,
        Duration::from_secs(timeout_secs),
    ))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &report.outcome {
            validate::Outcome::Valid { preview_bytes } => {
                println!("{} {}", "✓".green().bold(), "CAFF file is valid".green());
                println!();
                println!("  Preview: {} ({} bytes)", report.output.display(), preview_bytes);
            }
            validate::Outcome::Rejected { status } => {
                println!("{} {}", "✗".red().bold(), "CAFF file was rejected".red());
                println!();
                println!("  Decoder status: {}", status);
            }
            validate::Outcome::MissingPreview => {
                println!(
                    "{} {}",
                    "!".yellow().bold(),
                    "Decoder succeeded but wrote no preview".yellow()
                );
            }
            validate::Outcome::TimedOut { after_secs } => {
                println!(
                    "{} {}",
                    "!".yellow().bold(),
                    format!("Decoder timed out after {}s", after_secs).yellow()
                );
            }
        }
        println!("  Took:    {} ms", report.elapsed_ms);
    }

    if !report.is_valid() {
        std::process::exit(2);
    }
    Ok(())
}
