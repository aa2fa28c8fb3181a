use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use antfarm::{AntFarm, AntInfo, FarmConfig, NodeClient, Result, SyncReport};

/// Antfarm - run a fleet of blockchain daemons as a test network
#[derive(Parser, Debug)]
#[command(name = "antfarm")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    ANTFARM_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG            Override the log filter")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Farm configuration file (TOML, or JSON with a .json extension)
    #[arg(short = 'c', long, default_value = "config.toml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Start a farm and run it until interrupted
    Run {
        /// Farm configuration file (TOML, or JSON with a .json extension)
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },

    /// List the ants of a running farm
    Ants {
        /// Control API address of the farm
        addr: String,
    },

    /// Show the latest consensus groups of a running farm
    Groups {
        /// Control API address of the farm
        addr: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command.clone() {
        Some(Command::Ants { addr }) => {
            let _guard = antfarm::log::init_with_debug(cli.debug, None);
            rt.block_on(print_ants(&addr))
        }
        Some(Command::Groups { addr }) => {
            let _guard = antfarm::log::init_with_debug(cli.debug, None);
            rt.block_on(print_groups(&addr))
        }
        Some(Command::Run { config }) => {
            let path = config.unwrap_or(cli.config);
            rt.block_on(run_farm(&path, cli.debug))
        }
        None => rt.block_on(run_farm(&cli.config, cli.debug)),
    }
}

async fn run_farm(config_path: &std::path::Path, debug: bool) -> Result<()> {
    let config = FarmConfig::load(config_path)?;
    // Alongside the farm data, not inside it: the farm wipes its data dir.
    let log_dir = config
        .data_dir
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let _guard = antfarm::log::init_with_debug(debug, Some(&log_dir));

    let farm = match AntFarm::create(config).await {
        Ok(farm) => farm,
        Err(e) => {
            error!("could not start the farm: {}", e);
            return Err(e);
        }
    };
    if let Some(addr) = farm.api_addr() {
        info!("farm API at http://{}", addr);
    }
    info!("farm running with {} ants, waiting for a shutdown signal", farm.ants().len());

    shutdown_signal().await;
    info!("shutdown signal received, closing the farm");
    farm.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn print_ants(addr: &str) -> Result<()> {
    let ants: Vec<AntInfo> = NodeClient::new(addr)?.get("/ants").await?;
    if ants.is_empty() {
        println!("No ants.");
        return Ok(());
    }
    println!(
        "{:<12} {:<22} {:<22} {:<10} JOBS",
        "NAME", "API", "RPC", "STATUS"
    );
    for ant in ants {
        let status = ant
            .status
            .map(|s| format!("{:?}", s).to_lowercase())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<22} {:<22} {:<10} {}",
            ant.name,
            ant.api_addr,
            ant.rpc_addr,
            status,
            ant.jobs.join(",")
        );
    }
    Ok(())
}

async fn print_groups(addr: &str) -> Result<()> {
    let report: SyncReport = NodeClient::new(addr)?.get("/groups").await?;
    println!("Checked at {}", report.checked_at.to_rfc3339());
    if report.is_synced() {
        println!("All {} ants are synchronized.", report.ant_count());
        return Ok(());
    }
    for (i, group) in report.groups.iter().enumerate() {
        println!("Group {}:", i + 1);
        for member in group {
            let height = member
                .height
                .map(|h| h.to_string())
                .unwrap_or_else(|| "?".to_string());
            let origin = if member.external { " (external)" } else { "" };
            println!("  {} {} height {}{}", member.name, member.api_addr, height, origin);
        }
    }
    Ok(())
}
