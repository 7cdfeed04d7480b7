//! Command line entry point to manage the runtimes deployed on the configured compute backend.
use clap::{Parser, Subcommand};
use runtime_control::backend::BackendRegistry;
use runtime_control::config::RuntimeControlConfig;
use runtime_control::logging::Logging;
use runtime_control::metadata_store::InMemoryMetadataStore;
use runtime_control::orchestrator::LifecycleOrchestrator;
use runtime_control::runtime::descriptor::ALL_RUNTIMES;
use runtime_control::runtime::{RuntimeFilter, RuntimeMetadata};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Manage serverless runtimes
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    operation: Operations,

    /// Configuration file, environment variables prefixed with RUNTIME_CONTROL_ override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level upperbound
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Subcommand)]
enum Operations {
    /// Deploy a runtime and print its metadata
    Create {
        /// Image name, `default` deploys the default runtime
        image: String,
        /// Memory in MB, defaults to `runtime_memory`
        #[arg(short, long)]
        memory: Option<u32>,
    },

    /// Redeploy every deployed runtime of an image
    Update { image: String },

    /// Build an image from a local Dockerfile, publish it and deploy it
    Build {
        image: String,
        #[arg(short = 'f', long)]
        dockerfile: Option<PathBuf>,
    },

    /// Delete every deployed runtime of an image
    Delete { image: String },

    /// Delete every deployed runtime
    Clean,

    /// List deployed runtimes
    List {
        #[arg(default_value = ALL_RUNTIMES)]
        image: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = Logging::try_init(&cli.log_level) {
        eprintln!("Failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Operation failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = RuntimeControlConfig::load(cli.config.as_deref())?;
    debug!("Using the {} compute backend", config.compute_backend);

    let runtime = Arc::new(
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?,
    );
    let backend = BackendRegistry::create(&config, runtime)?;
    let orchestrator =
        LifecycleOrchestrator::new(backend, Arc::new(InMemoryMetadataStore::new()), &config);

    match cli.operation {
        Operations::Create { image, memory } => {
            let memory = memory.unwrap_or(orchestrator.default_memory());
            let metadata =
                orchestrator.create_runtime(&image, memory, orchestrator.default_timeout())?;
            print_metadata(&metadata)?;
        }
        Operations::Update { image } => {
            for descriptor in orchestrator.update_runtime(&image)? {
                info!("Runtime {descriptor} updated");
            }
        }
        Operations::Build { image, dockerfile } => {
            let metadata = orchestrator.build_runtime(&image, dockerfile)?;
            print_metadata(&metadata)?;
        }
        Operations::Delete { image } => {
            for (image, memory) in orchestrator.delete_runtime(&image)? {
                info!("Runtime {image} ({memory}MB) deleted");
            }
        }
        Operations::Clean => orchestrator.delete_all_runtimes()?,
        Operations::List { image } => {
            for (image, memory) in orchestrator.list_runtimes(&RuntimeFilter::from(image.as_str()))? {
                println!("{image}\t{memory}MB");
            }
        }
    }
    Ok(())
}

fn print_metadata(metadata: &RuntimeMetadata) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(metadata)?);
    Ok(())
}
