//! sse-proxy binary
//!
//! Wires the proxy together: loads configuration, starts the worker
//! pool, the ingestion listener, the admin channel, and the SSE server,
//! then runs until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sse_proxy::auth::HeaderAuthenticator;
use sse_proxy::{
    AdminChannel, ConnectionRegistry, DeliveryQueue, IngestServer, ServerConfig, SseServer,
    WorkerPool,
};

#[derive(Debug, Parser)]
#[command(name = "sse-proxy", version, about = "SSE fan-out proxy server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "sse-proxy.json")]
    config: PathBuf,

    /// Print the resolved configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match ServerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.print_config {
        println!("{:#?}", config);
        return ExitCode::SUCCESS;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> sse_proxy::Result<()> {
    let registry = Arc::new(ConnectionRegistry::new());
    let queue = Arc::new(DeliveryQueue::new());

    let pool = WorkerPool::spawn_with_timeout(
        config.pool_size(),
        Arc::clone(&queue),
        Arc::clone(&registry),
        config.write_timeout,
    );
    tracing::info!(workers = pool.len(), "Worker pool started");

    let ingest = IngestServer::new(config.ingest_addr, Arc::clone(&queue));
    let admin = AdminChannel::new(config.control_socket.clone(), Arc::clone(&registry));
    let server = SseServer::new(config, HeaderAuthenticator::new(), Arc::clone(&registry));

    // Bind every listener up front; a failed bind is a startup error,
    // not something to lose inside a spawned task.
    let ingest_listener = ingest.bind().await?;
    let admin_listener = admin.bind()?;

    let shutdown = tokio::sync::watch::channel(());
    let (shutdown_tx, shutdown_rx) = shutdown;

    let ingest_task = {
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            ingest
                .serve_on(ingest_listener, async move {
                    let _ = rx.changed().await;
                })
                .await
        })
    };

    let admin_task = {
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            admin
                .serve_on(admin_listener, async move {
                    let _ = rx.changed().await;
                })
                .await
        })
    };

    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Interrupt received, shutting down");
        })
        .await;

    // Stop accepting work, drain the workers, then drop every transport.
    let _ = shutdown_tx.send(());
    queue.shutdown();
    pool.join().await;

    for entry in registry.close_all().await {
        entry.shutdown().await;
    }

    let _ = ingest_task.await;
    let _ = admin_task.await;

    result
}
