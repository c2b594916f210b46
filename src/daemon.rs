//! Detaching the server from its controlling terminal
//!
//! Detaching must happen after the listening socket is bound, so bind errors
//! still reach the caller with a non-zero exit, and before any tokio runtime
//! exists, since forking a running runtime leaves its worker threads behind.

use crate::{AesdError, Result};
use nix::unistd::{chdir, dup2, fork, setsid, ForkResult};
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use tracing::debug;

/// Which side of the fork the caller is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// The original process; it should exit successfully right away
    Parent,
    /// The background process; it carries on serving
    Child,
}

/// Fork into the background.
///
/// The child starts a new session, moves to `/` and points its standard
/// streams at `/dev/null`.
pub fn detach() -> Result<Detached> {
    // SAFETY: no runtime or other threads exist yet; the child only makes
    // async-signal-safe calls before continuing single-threaded.
    match unsafe { fork() }? {
        ForkResult::Parent { child } => {
            debug!("Starting in daemon mode... (pid {})", child);
            Ok(Detached::Parent)
        }
        ForkResult::Child => {
            setsid()?;
            chdir("/")?;
            redirect_standard_streams()?;
            Ok(Detached::Child)
        }
    }
}

fn redirect_standard_streams() -> Result<()> {
    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|e| AesdError::Daemonize(format!("open /dev/null: {}", e)))?;

    let fd = devnull.as_raw_fd();
    for target in [
        io::stdin().as_raw_fd(),
        io::stdout().as_raw_fd(),
        io::stderr().as_raw_fd(),
    ] {
        dup2(fd, target)?;
    }
    Ok(())
}
