//! freqfleet - compose orchestration for trading bot fleets
//!
//! This is the main CLI entry point for freqfleet.

use clap::{Parser, Subcommand};
use freqfleet::compose::{BotRequest, FleetOrchestrator, NetworkSpec};
use freqfleet::container::DockerApiRuntime;
use freqfleet::error::Result;
use freqfleet::network::HostPortChecker;
use freqfleet::template::CustomSettings;
use freqfleet::FleetConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// freqfleet - run a fleet of trading bots from one compose file
#[derive(Parser)]
#[command(name = "freqfleet")]
#[command(version)]
#[command(about = "Compose orchestration for a fleet of trading bot containers", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Compose file to manage
    #[arg(short = 'f', long, global = true)]
    file: Option<PathBuf>,

    /// User data directory mounted into every bot
    #[arg(long, global = true)]
    user_data: Option<PathBuf>,

    /// Docker Engine address (unix:///path/to/docker.sock or tcp://host:port)
    #[arg(long, global = true)]
    docker_host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a new bot
    Deploy {
        /// Bot name
        name: String,
        /// Strategy class name
        #[arg(short, long)]
        strategy: String,
        /// Config template file
        #[arg(short, long, default_value = "config.json")]
        template: String,
        /// Generate the config from a settings JSON file instead of a template
        #[arg(long, conflicts_with = "template")]
        custom: Option<PathBuf>,
        /// Pairlist file in the pairlists directory
        #[arg(short, long)]
        pairlist: Option<String>,
        /// Preferred host port
        #[arg(long)]
        port: Option<u16>,
        /// Override the template's dry-run flag
        #[arg(long)]
        dry_run: Option<bool>,
        /// Create the container without starting it
        #[arg(long)]
        no_start: bool,
    },

    /// Remove a stopped bot and its service
    #[command(name = "rm")]
    Remove {
        /// Bot name
        name: String,
    },

    /// Start a service, creating its container if needed
    Start {
        /// Service name
        service: String,
    },

    /// Stop a service
    Stop {
        /// Service name
        service: String,
    },

    /// Restart a service
    Restart {
        /// Service name
        service: String,
    },

    /// Show the status of a service
    Status {
        /// Service name
        service: String,
    },

    /// Show the last lines of a service's output
    Logs {
        /// Service name
        service: String,
        /// Number of lines
        #[arg(short = 'n', long, default_value_t = 100)]
        tail: usize,
    },

    /// List services and their state
    #[command(name = "ps")]
    Ps,

    /// Start every service
    StartAll,

    /// Stop every service
    StopAll,

    /// Manage networks
    Network {
        #[command(subcommand)]
        command: NetworkCommands,
    },

    /// Inspect or replace the compose file
    Compose {
        #[command(subcommand)]
        command: ComposeCommands,
    },
}

#[derive(Subcommand)]
enum NetworkCommands {
    /// List networks
    #[command(name = "ls")]
    List,
    /// Create a network
    Create {
        /// Network name
        name: String,
        /// Driver
        #[arg(short, long, default_value = "bridge")]
        driver: String,
        /// Restrict external access
        #[arg(long)]
        internal: bool,
        /// Allow standalone containers to attach
        #[arg(long)]
        attachable: bool,
    },
    /// Remove a network
    #[command(name = "rm")]
    Remove {
        /// Network name
        network: String,
    },
}

#[derive(Subcommand)]
enum ComposeCommands {
    /// Print the compose file
    Show,
    /// Check a compose file without saving it
    Validate {
        /// File to check (defaults to the managed file)
        file: Option<PathBuf>,
    },
    /// Replace the compose file with the content of another file
    Apply {
        /// File with the new content
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = FleetConfig::from_env()?;
    if let Some(file) = cli.file {
        config.compose_file = file;
    }
    if let Some(user_data) = cli.user_data {
        config.user_data_dir = user_data;
    }
    if let Some(host) = cli.docker_host {
        config.docker_host = host;
    }

    let runtime = Arc::new(DockerApiRuntime::new(&config.docker_host, config.op_timeout)?);
    let fleet = FleetOrchestrator::open(config, runtime, Arc::new(HostPortChecker::default())).await?;

    match cli.command {
        Commands::Deploy {
            name,
            strategy,
            template,
            custom,
            pairlist,
            port,
            dry_run,
            no_start,
        } => {
            let mut request = BotRequest::new(&name, &strategy, &template);
            if let Some(path) = custom {
                request.custom = Some(CustomSettings::from_json(&std::fs::read_to_string(path)?)?);
            }
            request.pairlist = pairlist;
            request.host_port = port;
            request.dry_run = dry_run;
            request.start = !no_start;

            let deployed = fleet.deploy_bot(&request).await?;
            println!(
                "Deployed {} on port {} ({})",
                deployed.service,
                deployed.host_port,
                deployed.config_path.display()
            );
        }

        Commands::Remove { name } => {
            fleet.remove_bot(&name).await?;
            println!("{}", name);
        }

        Commands::Start { service } => {
            fleet.start_service(&service).await?;
            println!("{}", service);
        }

        Commands::Stop { service } => {
            fleet.stop_service(&service).await?;
            println!("{}", service);
        }

        Commands::Restart { service } => {
            fleet.restart_service(&service).await?;
            println!("{}", service);
        }

        Commands::Status { service } => {
            let report = fleet.status(&service).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Logs { service, tail } => {
            for line in fleet.logs(&service, tail).await? {
                println!("{}", line);
            }
        }

        Commands::Ps => {
            let services = fleet.services().await;
            let statuses = fleet.status_all().await;

            println!(
                "{:<20} {:<35} {:<20} {:<12}",
                "SERVICE", "IMAGE", "PORTS", "STATE"
            );
            for (spec, (_, status)) in services.iter().zip(statuses) {
                let ports: Vec<String> = spec.ports.iter().map(|p| p.to_short_syntax()).collect();
                let state = match status {
                    Ok(report) => report.state().to_string(),
                    Err(e) => format!("unknown ({})", e),
                };
                println!(
                    "{:<20} {:<35} {:<20} {:<12}",
                    spec.name,
                    spec.image,
                    ports.join(","),
                    state
                );
            }
        }

        Commands::StartAll => {
            for (name, result) in fleet.start_all().await {
                match result {
                    Ok(()) => println!("{:<20} started", name),
                    Err(e) => println!("{:<20} failed: {}", name, e),
                }
            }
        }

        Commands::StopAll => {
            for (name, result) in fleet.stop_all().await {
                match result {
                    Ok(()) => println!("{:<20} stopped", name),
                    Err(e) => println!("{:<20} failed: {}", name, e),
                }
            }
        }

        Commands::Network { command } => match command {
            NetworkCommands::List => {
                let networks = fleet.networks().await;
                let usage = fleet.network_usage().await;
                println!("{:<25} {:<10} {:<8}", "NAME", "DRIVER", "SERVICES");
                for (network, (_, count)) in networks.iter().zip(usage) {
                    println!(
                        "{:<25} {:<10} {:<8}",
                        network.name,
                        network.driver_or_default(),
                        count
                    );
                }
            }
            NetworkCommands::Create {
                name,
                driver,
                internal,
                attachable,
            } => {
                let mut spec = NetworkSpec::new(&name, &driver);
                if internal {
                    spec.flags.internal = Some(true);
                }
                if attachable {
                    spec.flags.attachable = Some(true);
                }
                fleet.add_network(spec).await?;
                println!("Created network {}", name);
            }
            NetworkCommands::Remove { network } => {
                fleet.remove_network(&network).await?;
                println!("Removed network {}", network);
            }
        },

        Commands::Compose { command } => match command {
            ComposeCommands::Show => {
                print!("{}", fleet.raw_yaml().await?);
            }
            ComposeCommands::Validate { file } => {
                let content = match file {
                    Some(path) => std::fs::read_to_string(path)?,
                    None => fleet.raw_yaml().await?,
                };
                let warnings = fleet.validate_yaml(&content)?;
                if warnings.is_empty() {
                    println!("Compose file is valid");
                } else {
                    println!("Compose file is valid, with warnings:");
                    for warning in warnings {
                        println!("  - {}", warning);
                    }
                }
            }
            ComposeCommands::Apply { file } => {
                let content = std::fs::read_to_string(&file)?;
                fleet.apply_raw_yaml(&content).await?;
                println!("Applied {}", file.display());
            }
        },
    }

    Ok(())
}
