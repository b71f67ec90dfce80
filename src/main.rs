//! Routing fabric reconciliation CLI
//!
//! ```bash
//! # sheet path: onboard, derive tasks, regenerate document and diagram
//! fabric-reconcile --store ./blobs --tenant acme sheet routes.csv
//!
//! # inventory path, from a fabric snapshot
//! fabric-reconcile --tenant acme inventory --snapshot fabric.json
//!
//! # compare two documents or diagrams
//! fabric-reconcile diff-document old.yaml new.yaml
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use fabric_reconcile::config::{DEFAULT_ENV_TAG, DEFAULT_SYSTEM_TAG, RunConfig};
use fabric_reconcile::core::delta::{diagram_diff, diff_documents, document_logical_ids};
use fabric_reconcile::fabric::{FabricMutator, JsonFabric};
use fabric_reconcile::pipeline::{self, RunReport};
use fabric_reconcile::store::FsBlobStore;

#[derive(Parser)]
#[command(name = "fabric-reconcile")]
#[command(version)]
#[command(about = "Reconcile routing-fabric facts into tasks, an infrastructure document and a reachability diagram")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Root directory of the blob store
    #[arg(long, global = true, env = "FABRIC_STORE_ROOT", default_value = ".")]
    store: PathBuf,

    /// Tenant prefix; every key lives under it
    #[arg(long, global = true, env = "FABRIC_TENANT", default_value = "")]
    tenant: String,

    /// Value of the Env tag on generated route tables
    #[arg(long, global = true, env = "FABRIC_ENV_TAG", default_value = DEFAULT_ENV_TAG)]
    env_tag: String,

    /// Value of the System tag on generated route tables
    #[arg(long, global = true, env = "FABRIC_SYSTEM_TAG", default_value = DEFAULT_SYSTEM_TAG)]
    system_tag: String,

    /// Report format
    #[arg(long, short = 'o', global = true, default_value = "json", value_enum)]
    format: ReportFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Json,
    Toon,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync from a request sheet (CSV) stored under <tenant>/settingsheets/
    Sheet {
        /// Sheet file name
        sheet: String,

        /// Fabric snapshot used for accept/tag calls (offline when absent)
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Sync from the inventory of a deployed fabric
    Inventory {
        /// Fabric snapshot (JSON)
        #[arg(long)]
        snapshot: PathBuf,
    },

    /// Preview the next route-table name for an account
    Allocate {
        account: String,
    },

    /// Logical resource ids added/removed between two documents
    DiffDocument {
        previous: PathBuf,
        current: PathBuf,
    },

    /// Nodes and connections added between two diagrams
    DiffDiagram {
        previous: PathBuf,
        current: PathBuf,
    },

    /// Render the diagram of the persisted task set to stdout
    RenderDiagram,
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_report(report: &RunReport, format: ReportFormat) -> Result<()> {
    let out = match format {
        ReportFormat::Json => report.to_json()?,
        ReportFormat::Toon => report.to_toon()?,
    };
    println!("{out}");
    Ok(())
}

fn run(cli: Cli) -> Result<ExitCode> {
    let run = RunConfig::new(cli.tenant.clone()).with_tags(cli.env_tag.clone(), cli.system_tag.clone());
    let mut store = FsBlobStore::new(&cli.store);

    match cli.command {
        Commands::Sheet { sheet, snapshot } => {
            let mut fabric = snapshot
                .as_deref()
                .map(JsonFabric::from_path)
                .transpose()?;
            let result = pipeline::sync_sheet(
                &mut store,
                fabric.as_mut().map(|f| f as &mut dyn FabricMutator),
                &run,
                &sheet,
            );
            finish(result, &run, cli.format)
        }
        Commands::Inventory { snapshot } => {
            let fabric = JsonFabric::from_path(&snapshot)?;
            let result = pipeline::sync_inventory(&mut store, &fabric, &run);
            finish(result, &run, cli.format)
        }
        Commands::Allocate { account } => {
            println!("{}", pipeline::preview_allocation(&store, &run, &account)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::DiffDocument { previous, current } => {
            let current = document_logical_ids(&read_text(&current)?)?;
            let diff = diff_documents(&read_text(&previous)?, &current)?;
            match diff.render() {
                Some(text) => print!("{text}"),
                None => eprintln!("no resources added or removed"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::DiffDiagram { previous, current } => {
            match diagram_diff(&read_text(&previous)?, &read_text(&current)?) {
                Some(text) => println!("{text}"),
                None => eprintln!("no nodes or connections added"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::RenderDiagram => {
            let diagram = pipeline::render_stored_diagram(&store, &run)?;
            print!("{}", diagram.text);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Failed runs still print a report; the exit code tells them apart.
fn finish(
    result: Result<RunReport, fabric_reconcile::ReconcileError>,
    run: &RunConfig,
    format: ReportFormat,
) -> Result<ExitCode> {
    match result {
        Ok(report) => {
            print_report(&report, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!(error = %err, "run failed, nothing was written");
            print_report(&RunReport::failure(&run.tenant, &err), format)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn main() -> Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fabric_reconcile=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse())
}
