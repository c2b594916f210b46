//! Passive TCP endpoint setup

use crate::config::ServerSettings;
use crate::{AesdError, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use tracing::{debug, error, warn};

/// A socket bound to the server address but not yet listening
#[derive(Debug)]
pub struct BoundSocket {
    socket: Socket,
    local_addr: SocketAddr,
}

impl BoundSocket {
    /// Resolve the passive endpoint for `host:port` and bind a stream socket
    /// to the first address the resolver returns. Address reuse is enabled so
    /// a restart after a crash does not wait out TIME_WAIT.
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let addr = resolve(host, port)?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| {
                error!("socket: {}", e);
                AesdError::Bind(e)
            })?;

        if let Err(e) = socket.set_reuse_address(true) {
            warn!("setsockopt(SO_REUSEADDR) failed: {}", e);
        }

        socket.bind(&SockAddr::from(addr)).map_err(|e| {
            error!("bind: {}", e);
            AesdError::Bind(e)
        })?;

        let local_addr = socket
            .local_addr()
            .ok()
            .and_then(|a| a.as_socket())
            .unwrap_or(addr);
        debug!("Bound socket to {}", local_addr);

        Ok(Self { socket, local_addr })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start listening with `backlog` pending connections
    pub fn listen(self, backlog: u32) -> Result<TcpListener> {
        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        self.socket.listen(backlog).map_err(|e| {
            error!("listen: {}", e);
            AesdError::Bind(e)
        })?;
        debug!("Listening for connections on port {}...", self.local_addr.port());
        Ok(self.socket.into())
    }
}

/// Bind and listen according to `settings`
pub fn bind_listener(settings: &ServerSettings) -> Result<TcpListener> {
    BoundSocket::bind(&settings.bind_address, settings.port)?.listen(settings.backlog)
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = (host, port).to_socket_addrs().map_err(|e| {
        error!("getaddrinfo: {}", e);
        AesdError::Bind(e)
    })?;

    addrs.next().ok_or_else(|| {
        error!("getaddrinfo: no addresses for {}:{}", host, port);
        AesdError::Bind(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no addresses for {}:{}", host, port),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    #[test]
    fn test_bind_ephemeral_port() {
        let bound = BoundSocket::bind("127.0.0.1", 0).unwrap();
        assert_ne!(bound.local_addr().port(), 0);

        let listener = bound.listen(100).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(TcpStream::connect(addr).is_ok());
    }

    #[test]
    fn test_port_in_use_is_bind_error() {
        let first = bind_listener(&ServerSettings {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..ServerSettings::default()
        })
        .unwrap();
        let port = first.local_addr().unwrap().port();

        let err = BoundSocket::bind("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, AesdError::Bind(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unresolvable_host_is_bind_error() {
        let err = BoundSocket::bind("host.invalid.", 9000).unwrap_err();
        assert!(matches!(err, AesdError::Bind(_)));
    }

    #[test]
    fn test_rebind_after_close_succeeds() {
        let listener = bind_listener(&ServerSettings {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..ServerSettings::default()
        })
        .unwrap();
        let addr = listener.local_addr().unwrap();

        // Leave a connection behind so the port has TIME_WAIT state.
        let client = TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        drop(accepted);
        drop(client);
        drop(listener);

        assert!(BoundSocket::bind("127.0.0.1", addr.port()).is_ok());
    }
}
