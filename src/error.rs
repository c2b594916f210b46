//! Common error types used throughout aesdsocket

use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// aesdsocket error types
#[derive(Debug, Error)]
pub enum AesdError {
    /// Address resolution, socket creation, bind or listen failed
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),

    /// Accept failed for a reason other than shutdown
    #[error("accept error: {0}")]
    Accept(#[source] io::Error),

    /// The peer reset or dropped the connection
    #[error("connection error with {peer}: {source}")]
    Peer {
        /// Numeric address of the client
        peer: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Read, write, seek or sync on the log file failed
    #[error("storage error on {path}: {source}")]
    Storage {
        /// Path of the log file
        path: String,
        /// Underlying file error
        #[source]
        source: io::Error,
    },

    /// Forwarding the log back to the client failed
    #[error("send error: {0}")]
    Send(#[source] io::Error),

    /// Termination signal handlers could not be installed
    #[error("signal error: {0}")]
    Signal(#[source] io::Error),

    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Detaching into the background failed
    #[error("daemonize error: {0}")]
    Daemonize(String),

    /// A mutex could not be obtained or released
    #[error("lock error: {0}")]
    Lock(String),

    /// The listening socket was shut down by a termination signal
    #[error("shutdown requested")]
    ShutdownRequested,
}

impl AesdError {
    /// Classify an accept failure. EINVAL means the listening socket was shut
    /// down underneath us and is the shutdown path, not a failure.
    pub fn from_accept(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::InvalidInput || err.raw_os_error() == Some(Errno::EINVAL as i32) {
            AesdError::ShutdownRequested
        } else {
            AesdError::Accept(err)
        }
    }

    /// Whether this error is the shutdown path rather than a failure
    pub fn is_shutdown(&self) -> bool {
        matches!(self, AesdError::ShutdownRequested)
    }

    /// Whether this error is fatal for the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AesdError::Bind(_)
                | AesdError::Signal(_)
                | AesdError::Config(_)
                | AesdError::Daemonize(_)
        )
    }

    pub(crate) fn storage(path: &std::path::Path, source: io::Error) -> Self {
        AesdError::Storage {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn peer(peer: &str, source: io::Error) -> Self {
        AesdError::Peer {
            peer: peer.to_string(),
            source,
        }
    }
}

impl From<toml::de::Error> for AesdError {
    fn from(err: toml::de::Error) -> Self {
        AesdError::Config(format!("Failed to parse config: {}", err))
    }
}

impl From<nix::Error> for AesdError {
    fn from(err: nix::Error) -> Self {
        AesdError::Daemonize(err.desc().to_string())
    }
}

/// Result type alias for aesdsocket operations
pub type Result<T> = std::result::Result<T, AesdError>;
