//! ContactBridge CLI
//!
//! Manage CardDAV servers and run the contact sync loop.
//!
//! # Commands
//!
//! - `add-server` - Discover a server's address books and save it
//! - `servers` - List saved servers
//! - `server` - List one server's address books
//! - `enable` / `disable` - Switch an address book on or off
//! - `delete-server` - Tear down and remove a server
//! - `sync` - Run the sync loop once (meant for a periodic scheduler)
//! - `log` - Show the last run of each address book of a server

mod commands;

use clap::{Parser, Subcommand};
use contactbridge_sync::{BridgeConfig, ContactBridge};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Keeps local address books in sync with CardDAV servers.
#[derive(Parser)]
#[command(name = "contactbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding ContactBridge state
    #[arg(global = true, short, long)]
    data_dir: Option<PathBuf>,

    /// Engine executable
    #[arg(global = true, long)]
    engine: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover a server's address books and save it
    AddServer {
        /// Server URL; a bare host is pointed at /.well-known/carddav
        url: String,

        /// Login name
        #[arg(short, long)]
        username: String,

        /// Login password
        #[arg(short, long, conflicts_with = "password_stdin")]
        password: Option<String>,

        /// Read the password from the first line of stdin
        #[arg(long)]
        password_stdin: bool,
    },

    /// List saved servers
    Servers {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List one server's address books
    Server {
        /// Server id
        server_id: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Enable an address book; it is provisioned on the next sync
    Enable {
        /// Server id
        server_id: String,

        /// Address book id
        address_book_id: String,
    },

    /// Disable an address book and remove its engine configuration
    Disable {
        /// Server id
        server_id: String,

        /// Address book id
        address_book_id: String,
    },

    /// Remove a server after tearing down all of its address books
    DeleteServer {
        /// Server id
        server_id: String,
    },

    /// Run the sync loop once
    Sync,

    /// Show the last run of each address book of a server
    Log {
        /// Server id
        server_id: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn config(cli: &Cli) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.data_dir {
        Some(dir) => BridgeConfig::new(dir),
        None => BridgeConfig::from_platform()?,
    };
    if let Some(engine) = &cli.engine {
        config = config.with_engine_program(engine.clone());
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let config = config(&cli)?;
    debug!(data_dir = %config.data_dir().display(), engine = %config.engine_program, "configuration");
    let bridge = ContactBridge::open(&config)?;

    let succeeded = match cli.command {
        Commands::AddServer {
            url,
            username,
            password,
            password_stdin,
        } => {
            let password = match password {
                Some(password) => password,
                None if password_stdin => commands::read_password()?,
                None => return Err("a password is required (--password or --password-stdin)".into()),
            };
            commands::report(&bridge.save_server(&url, &username, &password))
        }
        Commands::Servers { format } => {
            commands::servers::list(&bridge, &format)?;
            true
        }
        Commands::Server { server_id, format } => {
            commands::servers::detail(&bridge, &server_id, &format)?;
            true
        }
        Commands::Enable {
            server_id,
            address_book_id,
        } => commands::report(&bridge.set_address_book_enabled(&server_id, &address_book_id, true)),
        Commands::Disable {
            server_id,
            address_book_id,
        } => commands::report(&bridge.set_address_book_enabled(&server_id, &address_book_id, false)),
        Commands::DeleteServer { server_id } => commands::report(&bridge.delete_server(&server_id)),
        Commands::Sync => commands::report(&bridge.sync_servers()),
        Commands::Log { server_id, format } => {
            commands::log::show(&bridge, &server_id, &format)?;
            true
        }
    };
    Ok(succeeded)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
