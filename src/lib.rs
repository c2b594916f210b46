//! # aesdsocket - Line-Aggregating TCP Server
//!
//! aesdsocket accepts TCP connections on port 9000, appends every
//! newline-terminated record a client sends to a shared append-only log file,
//! and after each record streams the entire log back to that client.
//!
//! ## Features
//!
//! - **Record reassembly**: records split across TCP segments, or several
//!   records in one segment, are handled transparently
//! - **Persistent log**: `/var/tmp/aesdsocketdata`, synced after every append
//! - **Graceful shutdown**: SIGINT/SIGTERM let the current connection finish,
//!   then close the socket and remove the log
//! - **Daemon mode**: `-d` detaches into the background after binding
//! - **Syslog diagnostics**: connection lifecycle reported under LOG_USER
//!
//! ## Quick Start
//!
//! ```no_run
//! use aesdsocket::config::ServerConfig;
//! use aesdsocket::server::SocketServer;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = SocketServer::bind(ServerConfig::default())?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod server;
pub mod threading;

pub use error::{AesdError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ServerConfig;
    pub use crate::server::{LogStore, RecordReassembler, Shutdown, SocketServer};
    pub use crate::{AesdError, Result};
}
