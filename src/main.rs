use anyhow::Result;
use clap::{Args, Parser};
use dyn_loader::{ModuleGraph, ModuleRegistry};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dyn-loader")]
#[command(about = "Scan a project's module definitions and validate their dependency graph")]
struct Cli {
    #[command(flatten)]
    mode: ModeArgs,

    /// Root directory of the project to scan
    project: PathBuf,

    /// Directory for synthesized external-package wrappers
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Additional external package names that dependencies may resolve to
    #[arg(long = "external")]
    externals: Vec<String>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ModeArgs {
    /// Perform a dry run, printing the dependency graph
    #[arg(long, short)]
    dry_run: bool,

    /// Export module graph to DOT file (graph.dot)
    #[arg(long, short)]
    export: bool,

    /// Print the client manifest as JSON
    #[arg(long, short)]
    manifest: bool,

    /// Print the order in which modules would be instantiated
    #[arg(long, short)]
    order: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut builder = ModuleGraph::builder().project(&cli.project);
    if let Some(cache_dir) = &cli.cache_dir {
        builder = builder.cache_dir(cache_dir);
    }
    for external in &cli.externals {
        builder = builder.external(external);
    }
    let registry = ModuleRegistry::new(builder.build()?);

    if cli.mode.dry_run {
        println!("--- Module Dependency Graph (Dry Run) ---");
        println!("{:#?}", registry.graph());
        println!("-----------------------------------------");
    } else if cli.mode.export {
        let filename = "graph.dot";
        registry.graph().write_dot_file(filename)?;
        println!("Graph exported to {filename}");
    } else if cli.mode.manifest {
        println!("{}", serde_json::to_string_pretty(&registry.manifest())?);
    } else if cli.mode.order {
        for definition in registry.modules() {
            let kind = if definition.is_external() {
                " (external)"
            } else {
                ""
            };
            println!("- {}{kind}", definition.name);
        }
    }

    Ok(())
}
