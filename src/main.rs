use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Method;
use clap::Parser;
use serde_json::Value;
use tokio::net::TcpListener;

use rpc_pipeline::config::{load_config, PipelineConfig};
use rpc_pipeline::lifecycle::{spawn_signal_listener, Shutdown};
use rpc_pipeline::observability::logging::init_logging;
use rpc_pipeline::observability::metrics::init_metrics;
use rpc_pipeline::observability::PrometheusSink;
use rpc_pipeline::rpc::ExecutionContext;
use rpc_pipeline::{HttpService, ServiceError};

#[derive(Parser)]
#[command(name = "rpc-pipeline")]
#[command(about = "RPC server with request observability and envelope encoding", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    init_logging(&config.observability);
    tracing::info!("rpc-pipeline v{} starting", env!("CARGO_PKG_VERSION"));

    let mut builder = HttpService::builder(config.clone());
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                init_metrics(addr);
                builder = builder.metrics(Arc::new(PrometheusSink));
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let service = builder
        .route(Method::POST, "/echo", "/demo.Echo/Echo", echo)
        .route(Method::GET, "/echo", "/demo.Echo/Echo", echo)
        .build()?;

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_listener(shutdown.clone());
    service.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Reply with the request unchanged.
async fn echo(_ctx: ExecutionContext, req: Value) -> Result<Value, ServiceError> {
    Ok(req)
}
