//! TCP listener loop.
//!
//! Owns the listening socket and accepts connections one at a time: each
//! accepted connection is fully echoed and closed before the next accept
//! runs.

use crate::config::Config;
use crate::connection::Connection;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// Server instance owning the bound listener.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind and listen on the configured address.
    ///
    /// The socket is built through `socket2` so the configured backlog is
    /// applied; `TcpListener::bind` offers no way to set it.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| ServerError::Bind(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let socket = Socket::new(
            match addr {
                SocketAddr::V4(_) => Domain::IPV4,
                SocketAddr::V6(_) => Domain::IPV6,
            },
            Type::STREAM,
            Some(Protocol::TCP),
        )
        .map_err(ServerError::Bind)?;

        socket.bind(&addr.into()).map_err(ServerError::Bind)?;
        socket.listen(config.backlog).map_err(ServerError::Bind)?;

        let std_listener: std::net::TcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ServerError::Bind)?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and echo connections until an unrecoverable accept failure.
    ///
    /// Connections are served strictly one at a time: the next accept does
    /// not run until the previous connection has closed. An I/O error on one
    /// connection is logged and the loop keeps accepting; only an accept
    /// failure ends the service.
    pub async fn run(&self) -> Result<(), ServerError> {
        loop {
            let (stream, peer) = self.accept().await?;
            debug!(peer = %peer, "New connection");

            let mut conn = Connection::new(stream, peer);
            match conn.echo().await {
                Ok(n) => debug!(peer = %peer, bytes = n, "Connection served"),
                Err(e) => warn!(peer = %peer, state = ?conn.state(), error = %e, "Connection error"),
            }
        }
    }

    /// Accept one connection, retrying on transient signal interruption.
    async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        loop {
            match self.listener.accept().await {
                Ok(accepted) => return Ok(accepted),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ServerError::Accept(e)),
            }
        }
    }
}

/// Listener-loop errors: both variants are fatal to the service.
#[derive(Debug)]
pub enum ServerError {
    /// Endpoint construction, bind, or listen failure at startup.
    Bind(io::Error),
    /// Unrecoverable accept failure at runtime.
    Accept(io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ServerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}
