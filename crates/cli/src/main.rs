//! Command-line interface for the lineage registry.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use lineage_core::config::{AppConfig, LoggingConfig};
use lineage_core::{EntityDraft, EntityId, EntityKind, ModelDetails, UploadId};
use lineage_metadata::{ConfiguredStore, PgTx, SqliteTx, TxHandle};
use lineage_registry::{Registry, StagedFile};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Versioned dataset and model registry
#[derive(Parser, Debug)]
#[command(name = "lineage")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "LINEAGE_CONFIG", default_value = "lineage.toml")]
    config: PathBuf,

    /// Keep storage and metadata under this directory unless configured otherwise
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stage files as a new upload
    Upload {
        /// Artifact to stage, as NAME=FILE (repeatable)
        #[arg(long = "artifact", value_name = "NAME=FILE", required = true, value_parser = parse_pair::<PathBuf>)]
        artifacts: Vec<(String, PathBuf)>,
    },
    /// Create a dataset or model revision
    Create {
        /// Entity kind: dataset or model
        kind: EntityKind,
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        description: String,
        /// Previous revision of the same kind
        #[arg(long)]
        parent: Option<EntityId>,
        /// Claim an upload, as NAME=UPLOAD_ID (repeatable)
        #[arg(long = "artifact", value_name = "NAME=UPLOAD_ID", value_parser = parse_pair::<UploadId>)]
        artifacts: Vec<(String, UploadId)>,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// List committed revisions of one kind
    List {
        /// Entity kind: datasets or models
        kind: EntityKind,
    },
    /// Write the bytes of an uploaded artifact
    Fetch {
        upload_id: UploadId,
        artifact: String,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check metadata and storage connectivity
    Check,
}

/// Model-only fields.
#[derive(Args, Debug, Default)]
struct ModelArgs {
    /// Dataset revision the model was trained on
    #[arg(long)]
    dataset: Option<EntityId>,
    /// Training configuration (JSON)
    #[arg(long = "config-json", value_name = "JSON", value_parser = parse_json)]
    config: Option<serde_json::Value>,
    /// Free-form metadata (JSON)
    #[arg(long, value_name = "JSON", value_parser = parse_json)]
    metadata: Option<serde_json::Value>,
    /// Runtime environment (JSON)
    #[arg(long, value_name = "JSON", value_parser = parse_json)]
    environment: Option<serde_json::Value>,
    /// Evaluation results (JSON)
    #[arg(long, value_name = "JSON", value_parser = parse_json)]
    evaluation: Option<serde_json::Value>,
}

impl ModelArgs {
    fn is_empty(&self) -> bool {
        self.dataset.is_none()
            && self.config.is_none()
            && self.metadata.is_none()
            && self.environment.is_none()
            && self.evaluation.is_none()
    }

    fn into_details(self) -> ModelDetails {
        ModelDetails {
            dataset: self.dataset,
            config: self.config.unwrap_or_default(),
            metadata: self.metadata.unwrap_or_default(),
            environment: self.environment.unwrap_or_default(),
            evaluation: self.evaluation.unwrap_or_default(),
        }
    }
}

fn parse_pair<T>(s: &str) -> Result<(String, T), String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {s:?}"))?;
    if name.is_empty() {
        return Err(format!("missing name in {s:?}"));
    }
    let value = value.parse::<T>().map_err(|e| e.to_string())?;
    Ok((name.to_string(), value))
}

fn parse_json(s: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(s).map_err(|e| format!("invalid JSON: {e}"))
}

/// Defaults (optionally rooted at `--data-dir`), then the config file, then
/// `LINEAGE_` environment variables.
fn load_config(config_path: &Path, data_dir: Option<&Path>) -> Result<AppConfig> {
    let defaults = match data_dir {
        Some(dir) => AppConfig::rooted_at(dir),
        None => AppConfig::default(),
    };

    let mut figment = Figment::from(Serialized::defaults(defaults));
    if config_path.exists() {
        figment = figment.merge(Toml::file(config_path));
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("LINEAGE_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| logging.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config, cli.data_dir.as_deref())?;
    init_tracing(&config.logging);

    if cli.config.exists() {
        tracing::debug!(config_path = %cli.config.display(), "Loaded configuration file");
    }

    let storage = lineage_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    let store = lineage_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::debug!(
        metadata = store.backend_name(),
        storage = %storage.provider(),
        "Opened registry"
    );

    match store {
        ConfiguredStore::Sqlite(store) => {
            run(Registry::<SqliteTx>::new(store, storage), cli.command).await
        }
        ConfiguredStore::Postgres(store) => {
            run(Registry::<PgTx>::new(store, storage), cli.command).await
        }
    }
}

async fn run<Tx: TxHandle + 'static>(registry: Registry<Tx>, command: Commands) -> Result<()> {
    match command {
        Commands::Upload { artifacts } => {
            let mut files = Vec::with_capacity(artifacts.len());
            for (artifact, path) in artifacts {
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("not a file path: {}", path.display()))?
                    .to_string();
                let data = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                files.push(StagedFile::new(artifact, filename, Bytes::from(data)));
            }

            let upload = registry
                .stage_upload(files)
                .await
                .context("failed to stage upload")?;
            print_json(&upload)
        }
        Commands::Create {
            kind,
            name,
            version,
            description,
            parent,
            artifacts,
            model,
        } => {
            let mut draft = EntityDraft::new(name, version, description);
            draft.parent = parent;
            draft.artifacts = artifacts.into_iter().collect();
            match kind {
                EntityKind::Model => draft.model = Some(model.into_details()),
                EntityKind::Dataset if !model.is_empty() => {
                    anyhow::bail!("model fields cannot be set on a dataset");
                }
                EntityKind::Dataset => {}
            }
            draft.validate()?;

            let entity = registry
                .create(kind, &draft)
                .await
                .with_context(|| format!("failed to create {kind}"))?;
            print_json(&entity)
        }
        Commands::List { kind } => {
            let entities = registry
                .list(kind)
                .await
                .with_context(|| format!("failed to list {}", kind.namespace()))?;
            print_json(&entities)
        }
        Commands::Fetch {
            upload_id,
            artifact,
            output,
        } => {
            let bytes = registry
                .read_artifact(upload_id, &artifact)
                .await
                .with_context(|| format!("failed to read artifact {artifact:?}"))?;
            match output {
                Some(path) => tokio::fs::write(&path, &bytes)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&bytes).await?;
                    stdout.flush().await?;
                }
            }
            Ok(())
        }
        Commands::Check => {
            registry.health_check().await.context("health check failed")?;
            println!("ok");
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
