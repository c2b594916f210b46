//! Per-connection record handling

use crate::server::reassembler::RecordReassembler;
use crate::server::shutdown::Shutdown;
use crate::server::storage::LogStore;
use crate::AesdError;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

/// What happened over the lifetime of one connection
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// Bytes received from the client
    pub bytes_received: u64,
    /// Records appended to the log
    pub records_stored: usize,
    /// Full-log replays delivered to the client
    pub replays_sent: usize,
    /// Unterminated bytes dropped when the client closed
    pub bytes_discarded: usize,
}

/// Drives a single accepted connection until the client closes it.
///
/// Every complete record is appended to the log and followed by a replay of
/// the entire log back to the client. Once shutdown is requested the handler
/// stops waiting on a client that has no partial record pending.
pub struct ConnectionHandler {
    store: Arc<LogStore>,
    chunk_size: usize,
    shutdown: Shutdown,
}

impl ConnectionHandler {
    /// Create a handler appending to `store`, receiving and sending in
    /// chunks of `chunk_size` bytes
    pub fn new(store: Arc<LogStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            shutdown: Shutdown::new(),
        }
    }

    /// Observe `shutdown` while waiting for client data
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Handle `stream` from `peer` to completion, then close it
    pub async fn handle<S>(&self, mut stream: S, peer: &str) -> ConnectionSummary
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut summary = ConnectionSummary::default();
        let mut reassembler = RecordReassembler::with_capacity(self.chunk_size);
        let mut buf = vec![0u8; self.chunk_size];

        'receive: loop {
            // Data already waiting wins over the shutdown request.
            let read = tokio::select! {
                biased;
                read = stream.read(&mut buf) => Some(read),
                _ = self.shutdown.requested(), if reassembler.is_empty() => None,
            };
            let Some(read) = read else {
                debug!("Shutdown requested, closing idle connection from {}", peer);
                break;
            };

            let received = match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!("{}, retrying...", e);
                    continue;
                }
                Err(e) => {
                    debug!("{}", AesdError::peer(peer, e));
                    break;
                }
            };
            debug!("Received {} bytes", received);
            summary.bytes_received += received as u64;

            for record in reassembler.feed(&buf[..received]) {
                if let Err(e) = self.store.append(&record).await {
                    error!("Failed to store record from {}: {}", peer, e);
                    continue;
                }
                summary.records_stored += 1;

                match self.store.stream_to(&mut stream, self.chunk_size).await {
                    Ok(_) => summary.replays_sent += 1,
                    Err(AesdError::Send(e)) => {
                        error!("Giving up sending to {}: {}", peer, e);
                        break 'receive;
                    }
                    Err(e) => error!("Failed to replay log to {}: {}", peer, e),
                }
            }
        }

        summary.bytes_discarded = reassembler.finish();
        if summary.bytes_discarded > 0 {
            debug!(
                "Discarded {} unterminated bytes from {}",
                summary.bytes_discarded, peer
            );
        }

        if let Err(e) = stream.shutdown().await {
            debug!("Shutdown of connection from {} failed: {}", peer, e);
        }
        drop(stream);
        debug!("Closed connection from {}", peer);

        summary
    }
}

/// Numeric host form of a client address
pub fn peer_label(addr: SocketAddr) -> String {
    addr.ip().to_string()
}
