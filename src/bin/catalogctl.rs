//! Catalog operator CLI
//!
//! Loads a registry document, validates it, and inspects or bootstraps the
//! write core built from it.
//!
//! # Usage
//!
//! ```bash
//! # Validate a registry document
//! catalogctl validate --registry registry.yaml
//!
//! # List the operations the registry synthesizes
//! catalogctl ops --registry registry.yaml
//!
//! # Show the URN template compiled for an entity type
//! catalogctl urn --registry registry.yaml Dataset
//!
//! # Create store constraints and indices for the registry
//! catalogctl bootstrap --registry registry.yaml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use metagraph::{
    Catalog, Neo4jGraphStore, Registry, RetryPolicy, StoreConfig, UrnBuilderSet,
};

#[derive(Parser)]
#[command(name = "catalogctl")]
#[command(version = "0.3.0")]
#[command(about = "Inspect and bootstrap the registry-driven metadata write core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Registry document (YAML, with includes resolved relative to it)
    #[arg(long, short, global = true, default_value = "registry.yaml")]
    registry: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the registry; exit non-zero on any failure
    Validate,

    /// List synthesized operation names with their kinds
    Ops,

    /// Show the compiled URN template and parameters for an entity type
    Urn {
        /// Entity type name as declared in the registry
        entity_type: String,
    },

    /// Connect to the graph store and create constraints and indices
    Bootstrap,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let registry = Registry::load(&cli.registry)
        .with_context(|| format!("loading registry {}", cli.registry.display()))?;

    match cli.command {
        Commands::Validate => {
            println!(
                "registry ok: {} entities, {} aspects, {} relationship rules",
                registry.entity_types().count(),
                registry.aspect_names().count(),
                registry.relationship_rules().len(),
            );
        }
        Commands::Ops => {
            let store = Arc::new(metagraph::MemoryGraphStore::new());
            let catalog = Catalog::bootstrap(
                registry,
                store,
                &StoreConfig::default(),
                RetryPolicy::default(),
            )
            .await?;
            for name in catalog.operations().names() {
                let descriptor = catalog
                    .operations()
                    .descriptor(name)
                    .context("descriptor vanished from the table")?;
                println!("{name}  [{:?}]", descriptor.kind);
            }
        }
        Commands::Urn { entity_type } => {
            let builders = UrnBuilderSet::from_registry(&registry)?;
            let template = builders
                .template(&entity_type)
                .with_context(|| format!("no entity type '{entity_type}' in registry"))?;
            println!("template:   {}", registry.urn_template(&entity_type).unwrap_or(""));
            println!("parameters: {}", template.placeholders().join(", "));
            println!(
                "reversible: {}",
                if template.is_reversible() { "yes" } else { "no" }
            );
        }
        Commands::Bootstrap => {
            let config = StoreConfig::default();
            let store = Arc::new(
                Neo4jGraphStore::connect(&config)
                    .await
                    .context("connecting to graph store")?,
            );
            Catalog::bootstrap(registry, store, &config, RetryPolicy::default()).await?;
            println!("constraints and indices created");
        }
    }
    Ok(())
}
