//! Relay Daemon
//!
//! Serves the admission gate over HTTP and, unless invocations are sent to an
//! external function endpoint, runs the generation pipeline in-process.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: ~/.config/token-relay/relay.toml, listen on 127.0.0.1:8080
//! relay-daemon
//!
//! # Custom config and listen address
//! relay-daemon --config ./relay.toml --listen 0.0.0.0:9000
//!
//! # With verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `RELAY_CONFIG`: Config file path
//! - `RELAY_LISTEN`: Listen address
//! - `RELAY_STAGE`: Stage name reported to the pipeline
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! Relay settings (`APPSYNC_ENDPOINT`, `AWS_REGION`, `OLLAMA_HOST`, ...) are
//! read by [`RelayConfig::load`].
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Stop accepting requests, finish in-flight ones

mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use relay_core::{
    AdmissionGate, ChannelInvoker, GenerationPipeline, HttpInvoker, InMemoryRegistrationStore,
    Invoker, LlmBackend, OllamaBackend, RelayChannels, RelayConfig, LAMBDA_SERVICE,
};

use crate::server::AppState;

/// Queue depth between the gate and the in-process pipeline
const INVOCATION_QUEUE: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "relay-daemon", version, about = "Token streaming relay daemon")]
struct Args {
    /// Config file (defaults to the user config dir)
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "RELAY_LISTEN", default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Stage name placed in forwarded events
    #[arg(long, env = "RELAY_STAGE", default_value = "prod")]
    stage: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_daemon=info".parse()?)
                .add_directive("relay_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    info!("Starting Relay Daemon");

    let config = Arc::new(
        RelayConfig::load(args.config.as_deref()).context("Failed to load relay configuration")?,
    );
    info!(
        region = %config.region,
        completion = ?config.completion_signal,
        function = %config.invocation.function_name,
        "Configuration loaded"
    );

    let http_client = config
        .http_client()
        .context("Failed to build HTTP client")?;
    let store = Arc::new(InMemoryRegistrationStore::new());

    let invoker: Arc<dyn Invoker> = match config.invocation.url {
        Some(ref url) => {
            info!(url = %url, "Dispatching invocations over HTTP");
            let invoker = HttpInvoker::new(url.clone(), http_client);
            match config.signer(LAMBDA_SERVICE, &config.region) {
                Ok(signer) => Arc::new(invoker.with_signer(signer)),
                Err(e) => {
                    warn!(error = %e, "No signing credentials, invocations go out unsigned");
                    Arc::new(invoker)
                }
            }
        }
        None => {
            let backend = OllamaBackend::from_settings(&config.backend)?;
            if !backend.health_check().await {
                warn!(
                    host = %config.backend.host,
                    port = config.backend.port,
                    "Ollama not reachable yet, runs will fail until it is"
                );
            }

            let (invoker, invocations) = ChannelInvoker::channel(INVOCATION_QUEUE);
            let pipeline = Arc::new(GenerationPipeline::new(
                Arc::clone(&config),
                Arc::new(backend),
                RelayChannels::Http(http_client),
            ));
            tokio::spawn(pipeline.run(invocations));
            Arc::new(invoker)
        }
    };

    let gate = AdmissionGate::new(&config, store, invoker);
    let app = server::create_app(AppState {
        gate: Arc::new(gate),
        stage: args.stage,
    });

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", args.listen))?;
    info!(addr = %args.listen, "Listening for requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay Daemon stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
