use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use common::Configuration;
use common::model::SubjectRole;
use engine::LifecycleService;
use engine::blob::ObjectBlobStore;
use engine::catalog::RelationCatalog;
use engine::revoker::StaticIdentityProvider;
use engine::store::{DocumentStore, MemoryStore};

#[derive(Parser, Debug)]
#[command(
    name = "lethe",
    version,
    about = "Personal-data lifecycle engine: subject erasure and export"
)]
struct Cli {
    #[arg(long, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode (minimal output)")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    Scout,
    Leader,
    Guardian,
}

impl From<RoleArg> for SubjectRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Scout => Self::Scout,
            RoleArg::Leader => Self::Leader,
            RoleArg::Guardian => Self::Guardian,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run (or resume) the erasure cascade for a subject
    Erase {
        subject_id: String,
        #[arg(long, value_enum, default_value_t = RoleArg::Scout)]
        role: RoleArg,
    },
    /// Assemble a portable bundle of a subject's data
    Export {
        subject_id: String,
        #[arg(long, value_enum, default_value_t = RoleArg::Scout)]
        role: RoleArg,
        #[arg(long, help = "Write the bundle to a file instead of stdout")]
        output: Option<PathBuf>,
    },
    /// Show the current snapshot of an erasure job
    Status { job_id: Uuid },
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        "warn"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };

    if std::env::var("RUST_LOG").is_err() {
        // SAFETY: Setting RUST_LOG environment variable is safe for logging configuration
        unsafe {
            std::env::set_var("RUST_LOG", level);
        }
    }
    tracing_subscriber::fmt::init();
}

fn build_service(config: &Configuration) -> Result<LifecycleService> {
    let store: Arc<dyn DocumentStore> = if config.store.dsn.starts_with("memory") {
        Arc::new(MemoryStore::new())
    } else {
        bail!(
            "unsupported document store DSN '{}'; a deployment-specific \
             adapter must be wired in behind the DocumentStore trait",
            config.store.dsn
        );
    };

    let object_store = common::storage::create_object_store(&config.blob)
        .context("failed to create blob storage")?;
    let blobs = Arc::new(ObjectBlobStore::new(object_store));
    let identity = Arc::new(StaticIdentityProvider::new());
    let catalog = RelationCatalog::production()?;

    Ok(LifecycleService::new(store, blobs, identity, catalog, config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = Configuration::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Command::Erase { subject_id, role } => {
            let service = build_service(&config)?;
            let job_id = service.request_erasure(&subject_id, role.into()).await?;
            let job = service.get_job_status(job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::Export {
            subject_id,
            role,
            output,
        } => {
            let service = build_service(&config)?;
            let bundle = service.request_export(&subject_id, role.into()).await?;
            let rendered = serde_json::to_string_pretty(&bundle)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("export bundle written to {}", path.display());
                }
                None => println!("{rendered}"),
            }
        }
        Command::Status { job_id } => {
            let service = build_service(&config)?;
            let job = service.get_job_status(job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::Config { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{config:#?}");
            }
        }
        Command::Validate => {
            println!("Configuration is valid");
        }
    }

    Ok(())
}
