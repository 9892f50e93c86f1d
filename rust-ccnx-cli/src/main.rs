use anyhow::Result;
use clap::{Parser, Subcommand};
use log::debug;

mod commands;
mod utils;

/// rust-ccnx forwarder control interface
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Sets the level of verbosity
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Forwarder control address
    #[clap(short, long, global = true, default_value = "127.0.0.1:9695")]
    forwarder: String,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a connection, listener, or route
    Add {
        #[clap(subcommand)]
        cmd: AddCommands,
    },

    /// List connections, interfaces, or routes
    List {
        #[clap(subcommand)]
        cmd: ListCommands,
    },

    /// Remove a connection or route
    Remove {
        #[clap(subcommand)]
        cmd: RemoveCommands,
    },

    /// Enable debug logging on the forwarder
    Set {
        #[clap(subcommand)]
        cmd: SetCommands,
    },

    /// Disable debug logging on the forwarder
    Unset {
        #[clap(subcommand)]
        cmd: SetCommands,
    },

    /// Toggle content-store behavior
    Cache {
        #[clap(subcommand)]
        cmd: CacheCommands,
    },

    /// Stop the forwarder
    Quit,

    /// Fetch a named object through the forwarder
    Fetch {
        /// Name to request (ccnx:/ URI format)
        name: String,

        /// Write the payload here instead of stdout
        #[clap(short, long)]
        output: Option<std::path::PathBuf>,

        /// Congestion control: raaqm or vegas
        #[clap(short, long, default_value = "raaqm")]
        protocol: String,

        /// RAAQM configuration file
        #[clap(short, long)]
        config: Option<std::path::PathBuf>,
    },
}

#[derive(Subcommand)]
enum AddCommands {
    /// Connect to a remote forwarder
    Connection {
        /// Symbolic name for the connection
        symbolic: String,
        /// Remote address, host:port
        remote: String,
    },
    /// Listen for inbound connections
    Listener {
        /// Symbolic name for the listener
        symbolic: String,
        /// Local address, host:port
        local: String,
    },
    /// Install a route
    Route {
        /// Prefix in ccnx:/ URI format
        prefix: String,
        /// Next hop: a face id or a symbolic connection name
        nexthop: String,
        /// Route weight
        #[clap(short, long, default_value = "16")]
        weight: u8,
    },
}

#[derive(Subcommand)]
enum ListCommands {
    Connections,
    Interfaces,
    Routes,
}

#[derive(Subcommand)]
enum RemoveCommands {
    /// Remove a connection by symbolic name
    Connection { symbolic: String },
    /// Remove a route
    Route { prefix: String, nexthop: String },
}

#[derive(Subcommand)]
enum SetCommands {
    Debug,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Serve cache hits to peers
    Serve {
        #[clap(value_parser = utils::parse_on_off)]
        state: bool,
    },
    /// Store passing content
    Store {
        #[clap(value_parser = utils::parse_on_off)]
        state: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    debug!("controlling forwarder at {}", cli.forwarder);
    let outcome = run(cli).await;
    match outcome {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    use rust_ccnx_common::mgmt::Request;

    let forwarder = cli.forwarder.as_str();
    match cli.command {
        Commands::Add { cmd } => match cmd {
            AddCommands::Connection { symbolic, remote } => {
                utils::check_symbolic(&symbolic)?;
                commands::control(forwarder, Request::AddConnection { symbolic, remote }).await
            }
            AddCommands::Listener { symbolic, local } => {
                utils::check_symbolic(&symbolic)?;
                commands::control(forwarder, Request::AddListener { symbolic, local }).await
            }
            AddCommands::Route {
                prefix,
                nexthop,
                weight,
            } => {
                commands::control(
                    forwarder,
                    Request::AddRoute {
                        prefix,
                        nexthop,
                        weight,
                    },
                )
                .await
            }
        },
        Commands::List { cmd } => {
            let request = match cmd {
                ListCommands::Connections => Request::ListConnections,
                ListCommands::Interfaces => Request::ListInterfaces,
                ListCommands::Routes => Request::ListRoutes,
            };
            commands::control(forwarder, request).await
        }
        Commands::Remove { cmd } => match cmd {
            RemoveCommands::Connection { symbolic } => {
                utils::check_symbolic(&symbolic)?;
                commands::control(forwarder, Request::RemoveConnection { symbolic }).await
            }
            RemoveCommands::Route { prefix, nexthop } => {
                commands::control(forwarder, Request::RemoveRoute { prefix, nexthop }).await
            }
        },
        Commands::Set { cmd: _ } => commands::control(forwarder, Request::SetDebug).await,
        Commands::Unset { cmd: _ } => commands::control(forwarder, Request::UnsetDebug).await,
        Commands::Cache { cmd } => {
            let request = match cmd {
                CacheCommands::Serve { state } => Request::CacheServe { on: state },
                CacheCommands::Store { state } => Request::CacheStore { on: state },
            };
            commands::control(forwarder, request).await
        }
        Commands::Quit => commands::control(forwarder, Request::Quit).await,
        Commands::Fetch {
            name,
            output,
            protocol,
            config,
        } => commands::fetch(forwarder, &name, output, &protocol, config).await,
    }
}
