//! tunnelvisor CLI
//!
//! Management commands for the `tunnelvisord` service daemon:
//! - Engine lifecycle (start, stop, status, reload)
//! - Proxy groups (proxies, select)
//! - Profiles (profiles list/add/use/remove)
//! - Telemetry (watch)

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunnelvisor::commands;
use tunnelvisor::ipc::{is_unreachable, ServiceClient};
use tunnelvisor::output::{print_error, print_info, print_success, print_warning};
use tv_core::config::{self, ServiceConfig};
use tv_core::{EventKind, KindSet};

#[derive(Parser)]
#[command(name = "tunnelvisor")]
#[command(author, version, about = "Control the tunnelvisor routing engine supervisor")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the daemon configuration file (used to find its IPC port)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Daemon IPC address (overrides config)
    #[arg(short, long, global = true, env = "TUNNELVISOR_ADDRESS")]
    address: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine and load the active profile
    Start,

    /// Stop the engine
    Stop,

    /// Show engine status
    Status,

    /// List proxy groups of the running engine
    Proxies {
        /// Only show groups whose name contains this text
        group: Option<String>,
        /// List every member of each group
        #[arg(short, long)]
        long: bool,
    },

    /// Select the proxy a group routes through
    Select {
        /// Proxy group name
        group: String,
        /// Member proxy name
        proxy: String,
    },

    /// Stream telemetry events
    Watch {
        /// Event kinds to receive (speed, bandwidth, log, process, profile_changed, error)
        #[arg(short, long, value_delimiter = ',')]
        kinds: Vec<EventKind>,
    },

    /// Manage profiles
    Profiles {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Reload the active profile
    Reload,

    /// Switch telemetry between foreground and background interests
    Foreground {
        #[arg(value_enum)]
        mode: Toggle,
    },

    /// Shut the daemon down
    Shutdown,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// List stored profiles
    List,
    /// Import a profile file
    Add {
        /// Display name
        name: String,
        /// Profile file to import
        file: PathBuf,
    },
    /// Make a profile active
    Use { id: u64 },
    /// Delete a profile
    Remove { id: u64 },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let address = match resolve_address(cli.address, cli.config.as_deref()) {
        Ok(address) => address,
        Err(e) => {
            print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    };
    let mut client = ServiceClient::with_address(address);

    // Handle no command - show quick status
    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            show_quick_status(&mut client).await;
            return Ok(());
        }
    };

    if let Err(e) = run(command, &mut client).await {
        if is_unreachable(&e) {
            print_warning(&format!(
                "tunnelvisord is not running at {} (start it with: tunnelvisord)",
                client.address()
            ));
        } else {
            print_error(&format!("{:#}", e));
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Commands, client: &mut ServiceClient) -> Result<()> {
    match command {
        Commands::Start => commands::start_command(client).await,
        Commands::Stop => commands::stop_command(client).await,
        Commands::Status => commands::status_command(client).await,
        Commands::Proxies { group, long } => {
            commands::proxies_command(client, group.as_deref(), long).await
        }
        Commands::Select { group, proxy } => commands::select_command(client, &group, &proxy).await,
        Commands::Watch { kinds } => {
            let kinds = if kinds.is_empty() {
                KindSet::all()
            } else {
                kinds.into_iter().collect()
            };
            commands::watch_command(client, kinds).await
        }
        Commands::Profiles { action } => match action {
            ProfileAction::List => commands::profile_list(client).await,
            ProfileAction::Add { name, file } => commands::profile_add(client, &name, &file).await,
            ProfileAction::Use { id } => commands::profile_use(client, id).await,
            ProfileAction::Remove { id } => commands::profile_remove(client, id).await,
        },
        Commands::Reload => commands::reload_command(client).await,
        Commands::Foreground { mode } => {
            commands::foreground_command(client, matches!(mode, Toggle::On)).await
        }
        Commands::Shutdown => {
            print_info("Shutting down tunnelvisord...");
            match client.shutdown().await {
                Ok(()) => {
                    print_success("tunnelvisord stopped");
                    Ok(())
                }
                Err(e) if is_unreachable(&e) => {
                    print_warning("tunnelvisord is not running");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
    }
}

/// Pick the daemon address: flag, then config file, then the default port
fn resolve_address(address: Option<String>, config_path: Option<&Path>) -> Result<String> {
    if let Some(address) = address {
        return Ok(address);
    }

    let config = match config_path {
        Some(path) => config::load_config::<ServiceConfig>(path)?,
        None => {
            let path = config::default_config_path();
            if path.exists() {
                config::load_config::<ServiceConfig>(&path)?
            } else {
                ServiceConfig::default()
            }
        }
    };

    Ok(config.ipc_address())
}

async fn show_quick_status(client: &mut ServiceClient) {
    println!();
    println!("  \x1b[1;34mtunnelvisor\x1b[0m - routing engine supervisor");
    println!();

    match client.ping().await {
        Ok(true) => {
            println!("  Daemon: \x1b[32m●\x1b[0m Running ({})", client.address());

            match client.process_state().await {
                Ok(state) if state.is_started() => {
                    println!("  Engine: \x1b[32m●\x1b[0m Started");
                }
                Ok(_) => println!("  Engine: \x1b[33m●\x1b[0m Stopped"),
                Err(e) => println!("  Engine: \x1b[31m●\x1b[0m {}", e),
            }
        }
        _ => {
            println!("  Daemon: \x1b[31m●\x1b[0m Not running ({})", client.address());
            println!("          Run: tunnelvisord");
        }
    }

    println!();
    println!("  Commands:");
    println!("    tunnelvisor start            Start the engine");
    println!("    tunnelvisor proxies          List proxy groups");
    println!("    tunnelvisor select <g> <p>   Route group <g> through proxy <p>");
    println!("    tunnelvisor watch            Stream telemetry");
    println!();
}
