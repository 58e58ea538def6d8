use anyhow::Result;
use clap::Parser;
use dyn_loader::{ModuleGraph, ModuleRegistry};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dyn-http-server")]
#[command(about = "Serve a project's module manifest and sources over HTTP")]
struct Cli {
    /// Root directory of the project to serve
    project: PathBuf,

    /// Port to listen on
    #[arg(long, short, default_value_t = 3000)]
    port: u16,

    /// Interface to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Directory for synthesized external-package wrappers
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut builder = ModuleGraph::builder().project(&cli.project);
    if let Some(cache_dir) = &cli.cache_dir {
        builder = builder.cache_dir(cache_dir);
    }
    let registry = Arc::new(ModuleRegistry::new(builder.build()?));
    println!(
        "Loaded {} modules from {}",
        registry.manifest().len(),
        cli.project.display()
    );

    let listener = TcpListener::bind(SocketAddr::new(cli.host, cli.port)).await?;
    dyn_loader_http_server::serve(registry, listener, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}
