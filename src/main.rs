//! hashbox CLI - content-addressed file storage from the command line
//!
//! Every command prints one JSON object on stdout (except `download` without
//! `--output`, which streams the raw bytes). Logs go to stderr and are
//! controlled by `RUST_LOG`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use hashbox::{BackendConfig, BlobStore, ContentHash, FsConfig, S3Config};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "hashbox")]
#[command(about = "Content-addressed file storage on S3-compatible servers or a local directory")]
#[command(version)]
struct Cli {
    /// Config file to read when no backend flags are given
    /// [default: <config dir>/hashbox/config.json]
    #[arg(short, long, env = "HASHBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Backend to use; inferred from --endpoint / --root when omitted
    #[arg(short, long, env = "HASHBOX_BACKEND")]
    backend: Option<BackendKind>,

    /// S3 endpoint URL
    #[arg(long, env = "HASHBOX_ENDPOINT")]
    endpoint: Option<String>,

    /// S3 access key
    #[arg(long, env = "HASHBOX_ACCESS_KEY")]
    access_key: Option<String>,

    /// S3 secret key
    #[arg(long, env = "HASHBOX_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// S3 bucket [default: file-server]
    #[arg(long, env = "HASHBOX_BUCKET")]
    bucket: Option<String>,

    /// S3 region [default: us-east-1]
    #[arg(long, env = "HASHBOX_REGION")]
    region: Option<String>,

    /// Root directory for the fs backend
    #[arg(long, env = "HASHBOX_ROOT")]
    root: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum BackendKind {
    S3,
    Fs,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the backend given by flags, then write it to the config file
    Init,

    /// Store a file and print its hash
    Upload {
        /// File to upload
        file: PathBuf,
        /// Display name (used as the visible file name by the fs backend)
        #[arg(short, long, default_value = "")]
        name: String,
    },

    /// Fetch a file by hash
    Download {
        /// Content hash (40 hex characters)
        hash: String,
        /// Write the content here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Remove a file by hash (succeeds if absent)
    Delete {
        /// Content hash (40 hex characters)
        hash: String,
    },

    /// Print the content hash of a local file without storing it
    Hash {
        /// File to hash
        file: PathBuf,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        let _ = output(
            &cli.format,
            &serde_json::json!({
                "status": "error",
                "message": format!("{:#}", e)
            }),
        );
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Init => {
            let backend = flag_backend(cli)?
                .context("init needs --endpoint/--access-key/--secret-key or --root")?;
            let path = config_path(cli)?;
            // Only settings that open (creating the bucket) get saved.
            let store = backend.open()?;
            backend.save(&path)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "backend": store.backend_name(),
                    "config": path.display().to_string()
                }),
            )?;
        }

        Commands::Upload { file, name } => {
            let store = open_store(cli)?;
            let hash = store.upload(file, name)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "hash": hash,
                    "backend": store.backend_name()
                }),
            )?;
        }

        Commands::Download { hash, output: save_path } => {
            let hash: ContentHash = hash.parse()?;
            let store = open_store(cli)?;
            let data = store.download(&hash, save_path.as_deref())?;
            match save_path {
                Some(path) => output(
                    &cli.format,
                    &serde_json::json!({
                        "status": "ok",
                        "hash": hash,
                        "size": data.len(),
                        "path": path.display().to_string()
                    }),
                )?,
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&data)?;
                    stdout.flush()?;
                }
            }
        }

        Commands::Delete { hash } => {
            let hash: ContentHash = hash.parse()?;
            let store = open_store(cli)?;
            store.delete(&hash)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "hash": hash
                }),
            )?;
        }

        Commands::Hash { file } => {
            let data = std::fs::read(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "hash": ContentHash::digest(&data),
                    "size": data.len()
                }),
            )?;
        }
    }

    Ok(())
}

fn open_store(cli: &Cli) -> anyhow::Result<Box<dyn BlobStore>> {
    let backend = match flag_backend(cli)? {
        Some(backend) => backend,
        None => {
            let path = config_path(cli)?;
            let mut backend = BackendConfig::load(&path)?;
            if let BackendConfig::S3(s3) = &mut backend {
                apply_overrides(cli, s3);
            }
            backend
        }
    };
    Ok(backend.open()?)
}

/// Backend described by command-line flags (or their env vars), if any
fn flag_backend(cli: &Cli) -> anyhow::Result<Option<BackendConfig>> {
    let kind = cli.backend.or(if cli.endpoint.is_some() {
        Some(BackendKind::S3)
    } else if cli.root.is_some() {
        Some(BackendKind::Fs)
    } else {
        None
    });

    match kind {
        Some(BackendKind::S3) => {
            let endpoint = cli
                .endpoint
                .clone()
                .context("--endpoint is required for the s3 backend")?;
            let access_key = cli
                .access_key
                .clone()
                .context("--access-key is required for the s3 backend")?;
            let secret_key = cli
                .secret_key
                .clone()
                .context("--secret-key is required for the s3 backend")?;
            let mut config = S3Config::new(endpoint, access_key, secret_key);
            apply_overrides(cli, &mut config);
            Ok(Some(BackendConfig::S3(config)))
        }
        Some(BackendKind::Fs) => {
            let root = cli
                .root
                .clone()
                .context("--root is required for the fs backend")?;
            Ok(Some(BackendConfig::Fs(FsConfig::new(root))))
        }
        None => Ok(None),
    }
}

fn apply_overrides(cli: &Cli, config: &mut S3Config) {
    if let Some(bucket) = &cli.bucket {
        config.bucket = bucket.clone();
    }
    if let Some(region) = &cli.region {
        config.region = region.clone();
    }
}

fn config_path(cli: &Cli) -> anyhow::Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Ok(BackendConfig::default_path()?),
    }
}

fn output(format: &OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::Text => serde_json::to_string_pretty(value)?,
    };
    println!("{}", rendered);
    Ok(())
}
