use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use restock_bell::app::App;
use restock_bell::config::AppConfig;
use restock_bell::logging;
use restock_bell::models::Catalog;
use restock_bell::scheduler::SweepScheduler;

#[derive(Debug, Parser)]
#[command(name = "restock-bell", version, about = "Watches product pages and alerts when items come back in stock")]
struct Cli {
    /// Extra configuration file layered over config/ and under RESTOCK__* variables
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run sweeps on the configured interval until Ctrl-C
    Run,
    /// Run one sweep and print the per-leaf report
    Sweep,
    /// Fetch and classify one URL without touching stock state
    Check {
        url: String,
        /// Vendor key whose selectors to use; guessed from the catalog when omitted
        #[arg(long)]
        vendor: Option<String>,
    },
    /// Print catalog and stock-state counts
    Status,
    /// Deliver a synthetic restock alert through the configured notifiers
    TestAlert {
        #[arg(long)]
        vendor: Option<String>,
    },
    /// Load and validate configuration and catalog, then exit
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let _log_guard = logging::init(&config.logging)?;

    info!("Starting Restock Bell...");

    match cli.command {
        Command::Validate => validate(&config).await,
        Command::Run => run(config).await,
        Command::Sweep => {
            let app = Arc::new(App::build(config).await?);
            let ctrl_c = spawn_ctrl_c_handler(Arc::clone(&app));
            let report = app.orchestrator.run_sweep_once().await;
            app.shutdown().await;
            ctrl_c.abort();
            print_json(&report)
        }
        Command::Check { url, vendor } => {
            let app = App::build(config).await?;
            let result = app.orchestrator.check_single_url(&url, vendor.as_deref()).await;
            app.shutdown().await;
            print_json(&result?)
        }
        Command::Status => {
            let app = App::build(config).await?;
            print_json(&app.orchestrator.status().await)
        }
        Command::TestAlert { vendor } => {
            let app = App::build(config).await?;
            let result = app.orchestrator.send_test_alert(vendor.as_deref()).await?;
            print_json(&result)
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let scheduler_config = config.scheduler.clone();
    let app = App::build(config).await?;

    let mut scheduler = SweepScheduler::new(Arc::clone(&app.orchestrator), scheduler_config).await?;
    scheduler.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    // Cancel in-flight work first so the scheduler's wait is short.
    app.shutdown_handle().trigger();
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Scheduler did not shut down cleanly");
    }
    app.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

async fn validate(config: &AppConfig) -> Result<()> {
    let catalog = Catalog::load(&config.storage.catalog_path)
        .await
        .with_context(|| format!("loading catalog {}", config.storage.catalog_path.display()))?;

    info!(
        vendors = catalog.vendors.len(),
        products = catalog.product_count(),
        leaves = catalog.leaf_count(),
        "Configuration and catalog are valid"
    );
    println!(
        "OK: {} vendors, {} products, {} monitored URLs",
        catalog.vendors.len(),
        catalog.product_count(),
        catalog.leaf_count()
    );
    Ok(())
}

fn spawn_ctrl_c_handler(app: Arc<App>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            app.shutdown_handle().trigger();
        }
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
