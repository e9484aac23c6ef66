//! adtun: On-Device Ad-Blocking Tunnel
//!
//! Main entry point. Loads the configuration, sets up logging and the
//! diagnostics file, then runs the tunnel until Ctrl+C or until the
//! tunnel goes down on its own.

mod config;
mod diagnostics;

use adtun_filter::PacketFilter;
use adtun_vpn::{
    DisconnectReason, RememberedConsent, StartOutcome, TunnelEvent, TunnelManager,
    platform_provider,
};
use anyhow::{Context, Result};
use clap::Parser;
use config::{AdtunConfig, DiagnosticsConfig};
use diagnostics::DiagnosticsLog;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// How long blocked control tasks (the consent prompt) may linger at exit
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "adtun")]
#[command(author, version, about = "On-device ad-blocking tunnel", long_about = None)]
struct Args {
    /// Configuration file (defaults to ./adtun.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Ask for consent before creating the tunnel
    #[arg(long)]
    confirm: bool,

    /// Check a hostname against the denylist and exit
    #[arg(long, value_name = "HOST")]
    check: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (config, source) = AdtunConfig::discover(args.config.as_deref())
        .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    if let Some(host) = &args.check {
        let filter = PacketFilter::new(config.filter.blocklist()?);
        match filter.check_host(host) {
            Some(pattern) => println!("{}: blocked by '{}'", host, pattern),
            None => println!("{}: allowed", host),
        }
        return Ok(());
    }

    init_logging(&config.diagnostics, args.verbose)?;

    info!("adtun starting...");
    match &source {
        Some(path) => info!("Using configuration {}", path.display()),
        None => info!("Using built-in configuration"),
    }

    let filter = Arc::new(config.filter.build().context("Failed to load denylist")?);
    info!(
        "Denylist '{}' loaded with {} patterns",
        filter.blocklist().name(),
        filter.blocklist().len()
    );

    let provider = platform_provider(&config.pump)?;
    let mut manager = TunnelManager::new(provider, Arc::clone(&filter), config.tunnel.clone())
        .with_pump_config(config.pump.clone());
    if config.control.require_consent || args.confirm {
        manager = manager.with_consent(Box::new(RememberedConsent::new()));
    }
    let manager = Arc::new(manager);

    // The reverse resolver owns its own runtime, so the filter is built and
    // dropped outside this one.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("adtun-control")
        .enable_all()
        .build()
        .context("Failed to start control runtime")?;
    let result = runtime.block_on(supervise(Arc::clone(&manager)));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    let stats = filter.stats().snapshot();
    info!(
        "Filter totals: {} inspected, {} blocked ({} by SNI, {} by reverse lookup)",
        stats.inspected, stats.blocked, stats.sni_hits, stats.reverse_hits
    );
    info!("adtun shutting down");
    result
}

/// stderr output plus the optional diagnostics file
fn init_logging(diagnostics: &DiagnosticsConfig, verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = diagnostics.enabled.then(|| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(DiagnosticsLog::open(&diagnostics.path, diagnostics.max_bytes))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).compact().with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")
}

/// Start the tunnel and keep it up until Ctrl+C or an unrequested disconnect
async fn supervise(manager: Arc<TunnelManager>) -> Result<()> {
    let events = manager.events();

    let starter = Arc::clone(&manager);
    let mut outcome = tokio::task::spawn_blocking(move || starter.start()).await??;

    if let StartOutcome::AwaitingConsent(token) = outcome {
        info!("Waiting for consent ({})", token);
        let granted = tokio::select! {
            answer = tokio::task::spawn_blocking(prompt_consent) => answer.unwrap_or(false),
            _ = tokio::signal::ctrl_c() => false,
        };
        let resolver = Arc::clone(&manager);
        outcome =
            tokio::task::spawn_blocking(move || resolver.resolve_consent(token, granted)).await??;
    }

    if outcome == StartOutcome::Declined {
        warn!("Consent declined; tunnel not started");
        return Ok(());
    }

    info!("adtun running, press Ctrl+C to stop");

    let waiter = tokio::task::spawn_blocking(move || {
        events.iter().find_map(|event| match event {
            TunnelEvent::Disconnected { reason } => Some(reason),
            _ => None,
        })
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Interrupt received");
        }
        reason = waiter => match reason {
            Ok(Some(DisconnectReason::ReadFailure(e))) => warn!("Tunnel lost: {}", e),
            Ok(Some(reason)) => info!("Tunnel disconnected: {:?}", reason),
            _ => {}
        },
    }

    let stopper = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || stopper.stop()).await??;
    Ok(())
}

/// Interactive yes/no on the terminal
fn prompt_consent() -> bool {
    eprint!("Route this device's traffic through adtun? [y/N] ");
    let _ = io::stderr().flush();

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}
