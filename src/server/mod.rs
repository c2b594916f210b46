//! aesdsocket server implementation

pub mod connection;
pub mod listener;
pub mod reassembler;
pub mod shutdown;
pub mod storage;

use crate::config::ServerConfig;
use crate::{AesdError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error};

pub use connection::{peer_label, ConnectionHandler, ConnectionSummary};
pub use listener::{bind_listener, BoundSocket};
pub use reassembler::{RecordCodec, RecordReassembler};
pub use shutdown::{install_signal_handlers, Shutdown};
pub use storage::LogStore;

/// Lifecycle of the accept loop once the socket is listening.
///
/// The earlier Init and Bound phases are covered by [`BoundSocket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for the next connection
    Listening,
    /// Handling an accepted connection
    Accepting,
    /// Shutdown observed, releasing resources
    Draining,
    /// Listening socket closed and log removed
    Terminated,
}

/// Line-aggregating TCP server serving one connection at a time
pub struct SocketServer {
    config: ServerConfig,
    listener: std::net::TcpListener,
    store: Arc<LogStore>,
    shutdown: Shutdown,
    state: watch::Sender<ServerState>,
}

impl SocketServer {
    /// Validate `config`, then bind and listen on the configured endpoint
    pub fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = bind_listener(&config.server)?;
        Ok(Self::from_listener(config, listener))
    }

    /// Build a server around an already listening socket
    pub fn from_listener(config: ServerConfig, listener: std::net::TcpListener) -> Self {
        let store = Arc::new(LogStore::new(&config));
        let (state, _) = watch::channel(ServerState::Listening);

        Self {
            config,
            listener,
            store,
            shutdown: Shutdown::new(),
            state,
        }
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(AesdError::Bind)
    }

    /// Handle for requesting shutdown without a signal
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Watch accept loop state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// The log store shared by all connections
    pub fn store(&self) -> Arc<LogStore> {
        Arc::clone(&self.store)
    }

    /// Arm termination signal handlers, then serve until shutdown
    pub async fn run(self) -> Result<()> {
        let signals = install_signal_handlers(self.shutdown.clone())?;
        let result = self.serve().await;
        signals.abort();
        result
    }

    /// Accept and handle connections one at a time until shutdown is
    /// requested, then close the socket and remove the log file.
    pub async fn serve(self) -> Result<()> {
        let SocketServer {
            config,
            listener,
            store,
            shutdown,
            state,
        } = self;

        listener.set_nonblocking(true).map_err(AesdError::Bind)?;
        let listener = TcpListener::from_std(listener).map_err(AesdError::Bind)?;
        let handler = ConnectionHandler::new(Arc::clone(&store), config.server.chunk_size)
            .with_shutdown(shutdown.clone());

        loop {
            if shutdown.is_requested() {
                break;
            }

            let accepted = tokio::select! {
                biased;
                _ = shutdown.requested() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    state.send_replace(ServerState::Accepting);
                    let peer = peer_label(addr);
                    debug!("Accepted connection from {}", peer);

                    let summary = handler.handle(stream, &peer).await;
                    debug!(
                        "Connection from {} stored {} records in {} bytes",
                        peer, summary.records_stored, summary.bytes_received
                    );
                    state.send_replace(ServerState::Listening);
                }
                Err(e) => {
                    let err = AesdError::from_accept(e);
                    if err.is_shutdown() {
                        break;
                    }
                    error!("{}", err);
                    sleep(Duration::from_millis(50)).await;
                }
            }
        }

        state.send_replace(ServerState::Draining);
        drop(listener);
        debug!("Socket closed");

        if config.storage.remove_on_shutdown {
            if let Err(e) = store.remove().await {
                error!("{}", e);
            }
        }

        state.send_replace(ServerState::Terminated);
        Ok(())
    }
}
