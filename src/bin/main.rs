//! nb-dns binary entry point.

use clap::{Parser, Subcommand};
use nb_dns::api;
use nb_dns::plan::build_plan;
use nb_dns::supervisor::ShutdownSignals;
use nb_dns::{telemetry, Config, DnsServer, RecordStore, Supervisor};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Custom DNS records API and process supervisor.
#[derive(Parser, Debug)]
#[command(name = "nb-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML). Environment variables prefixed
    /// with `NBDNS_` override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Serve the records API and supervise the mesh daemon and DNS engine (default).
    Run,
    /// Run the DNS engine in the foreground.
    ServeDns,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize telemetry
    telemetry::init(&config.telemetry()).map_err(|e| e as Box<dyn std::error::Error>)?;

    config.validate()?;

    let result = match args.command.unwrap_or(Mode::Run) {
        Mode::Run => run(config, args.config).await,
        Mode::ServeDns => serve_dns(config).await,
    };

    if let Err(e) = result {
        error!("nb-dns error: {}", e);
        return Err(e);
    }

    info!("nb-dns shutdown complete");
    Ok(())
}

/// API plus supervised children.
async fn run(
    config: Config,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        domains = ?config.domains,
        api_addr = %config.api_listen_addr(),
        records_file = %config.records_file.display(),
        mesh = config.mesh().is_some(),
        "Starting nb-dns"
    );

    let store = RecordStore::open(&config.records_file)?;
    let supervisor = Supervisor::new(config.shutdown_policy());
    let cancel = supervisor.cancellation_token();

    let listener = TcpListener::bind(config.api_listen_addr()).await?;
    let api_handle = api::spawn(listener, store, cancel);

    let steps = build_plan(&config, config_path.as_deref())?;
    if let Err(e) = supervisor.launch(&steps).await {
        supervisor.stop_all().await?;
        if let Err(api_err) = api::join(api_handle).await {
            error!("Management API error: {}", api_err);
        }
        return Err(e.into());
    }
    info!(running = ?supervisor.running_names(), "all services started");

    // A managed process failure is reported ahead of an API failure.
    let supervised = supervisor.run_until_signal().await;
    let api_result = api::join(api_handle).await;
    supervised?;
    api_result?;
    Ok(())
}

/// DNS engine mode, normally launched by `run`.
async fn serve_dns(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let dns = config.dns()?;
    let store = RecordStore::open(&dns.records_file)?;

    let mut signals = ShutdownSignals::new()?;
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        let signal = signals.recv().await;
        info!(signal, "received shutdown signal");
        signal_cancel.cancel();
    });

    DnsServer::new(dns, store).run(cancel).await?;
    Ok(())
}
