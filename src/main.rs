//! aesdsocket server binary
//!
//! Appends newline-terminated records from TCP clients to a shared log and
//! replays the log after every record.

use aesdsocket::config::ServerConfig;
use aesdsocket::daemon::{self, Detached};
use aesdsocket::logging;
use aesdsocket::server::{bind_listener, SocketServer};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "aesdsocket")]
#[command(about = "Line-aggregating TCP server that replays its log to every client")]
#[command(version)]
struct Args {
    /// Detach into the background after binding
    #[arg(short = 'd', long = "daemon")]
    daemon: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/aesdsocket.toml")]
    config: PathBuf,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Log file to append records to
    #[arg(short = 'f', long)]
    data_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        match ServerConfig::from_file(&args.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        ServerConfig::default()
    };

    // Override config with CLI arguments
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(data_file) = args.data_file {
        config.storage.data_file = data_file;
    }

    if let Err(e) = logging::init(&config.logging, args.verbose) {
        eprintln!("{}", e);
    }

    info!("Starting aesdsocket v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let listener = match bind_listener(&config.server) {
        Ok(listener) => listener,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.daemon {
        match std::env::current_dir() {
            Ok(cwd) => config.storage.anchor_data_file(&cwd),
            Err(e) => {
                error!("Unable to resolve working directory: {}", e);
                return ExitCode::FAILURE;
            }
        }
        match daemon::detach() {
            Ok(Detached::Parent) => return ExitCode::SUCCESS,
            Ok(Detached::Child) => {}
            Err(e) => {
                error!("Fork error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let server = SocketServer::from_listener(config, listener);
    match runtime.block_on(server.run()) {
        Ok(()) => {
            info!("aesdsocket stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
