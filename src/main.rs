//! Runs the Reactor Fabric server or inspects its configuration.
//!
//! Usage:
//!
//! ```text
//! reactor-fabric [--config <path>] [-v...] serve [--listen <addr>] [--reap-orphans]
//! reactor-fabric [--config <path>] validate
//! reactor-fabric [--config <path>] services
//! ```
//!
//! Logs go to stderr. `RUST_LOG` overrides the level selected by `-v`.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use mockable::DefaultClock;
use reactor_fabric::container::adapters::DockerContainerRuntime;
use reactor_fabric::proxy::adapters::HttpProtocolProxy;
use reactor_fabric::registry::ServiceRegistry;
use reactor_fabric::server::{FabricServer, Orchestrator};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "FABRIC_CONFIG", default_value = "reactor-fabric.yaml")]
    config: Utf8PathBuf,

    /// Increase log verbosity (`-v` debug, `-vv` trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Command to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept clients and route their tool calls.
    Serve {
        /// Address to listen on, overriding the configuration.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Remove labelled containers left by an earlier run before serving.
        #[arg(long)]
        reap_orphans: bool,
    },

    /// Check the configuration and exit.
    Validate,

    /// List the configured services.
    Services,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    let registry = ServiceRegistry::load_from_path(&args.config)?;
    match args.command {
        Command::Serve {
            listen,
            reap_orphans,
        } => serve(registry, listen, reap_orphans).await,
        Command::Validate => {
            writeln!(
                io::stdout().lock(),
                "{}: ok ({} services)",
                args.config,
                registry.len()
            )?;
            Ok(())
        }
        Command::Services => list_services(&registry),
    }
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn serve(
    registry: ServiceRegistry,
    listen: Option<SocketAddr>,
    reap_orphans: bool,
) -> Result<(), BoxError> {
    let address = listen.unwrap_or_else(|| registry.orchestrator().listen_address());
    let runtime = Arc::new(DockerContainerRuntime::connect_local()?);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(registry),
        runtime,
        Arc::new(HttpProtocolProxy::default()),
        Arc::new(DefaultClock),
    ));

    if reap_orphans {
        let removed = orchestrator.supervisor().reap_orphans().await?;
        info!(removed, "removed orphaned containers");
    }

    let listener = TcpListener::bind(address).await?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        %address,
        services = orchestrator.registry().len(),
        "reactor-fabric started"
    );

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                on_signal.cancel();
            }
            Err(err) => error!(error = %err, "failed to listen for interrupts"),
        }
    });

    FabricServer::new(orchestrator)
        .serve(listener, shutdown)
        .await?;
    Ok(())
}

fn list_services(registry: &ServiceRegistry) -> Result<(), BoxError> {
    let mut out = io::stdout().lock();
    for service in registry.services() {
        writeln!(
            out,
            "{}\t{}\t{}\ttools={}",
            service.name(),
            service.image(),
            service.strategy(),
            service.tools().len()
        )?;
    }
    Ok(())
}
