//! Registry server binary

use std::net::SocketAddr;

use artifact_registry::RegistryConfig;
use camino::Utf8PathBuf;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Serve an artifact registry.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "REGISTRY_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Address to listen on, overriding the configuration file.
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = match &args.config {
        Some(path) => RegistryConfig::load(path).await?,
        None => RegistryConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let addr = config.listen;
    let app = config.build().await?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Registry listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
