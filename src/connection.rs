//! Per-connection echo exchange.
//!
//! Each accepted connection performs exactly one bounded receive, writes the
//! received bytes back, and is closed. The connection tracks its progress
//! through the exchange as an explicit state machine.

use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

/// Capacity of the per-connection transfer buffer. A single receive never
/// reads more than this many bytes.
pub const ECHO_BUFFER_SIZE: usize = 1024;

/// Progress of a connection through the echo exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted, nothing received yet.
    Accepted,
    /// The single receive completed.
    Received,
    /// The echo was written back in full.
    Sent,
    /// The stream was shut down.
    Closed,
}

/// A single accepted client session.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    state: ConnState,
}

impl Connection {
    /// Wrap an accepted stream in the initial state.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            state: ConnState::Accepted,
        }
    }

    /// Current position in the exchange.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Run the echo exchange: one receive of up to [`ECHO_BUFFER_SIZE`]
    /// bytes, one send of exactly the received bytes, then close.
    ///
    /// Returns the number of bytes echoed. A peer that closes without
    /// sending yields a zero-byte receive; the send still runs (as a
    /// zero-length no-op) and the connection closes normally. On any error
    /// the stream is dropped, which closes it.
    pub async fn echo(&mut self) -> io::Result<usize> {
        // Fresh buffer per connection so no bytes leak between sessions.
        let mut buffer = BytesMut::zeroed(ECHO_BUFFER_SIZE);

        let n = self.stream.read(&mut buffer[..]).await?;
        self.state = ConnState::Received;
        trace!(peer = %self.peer, bytes = n, "Received");

        self.stream.write_all(&buffer[..n]).await?;
        self.state = ConnState::Sent;
        trace!(peer = %self.peer, bytes = n, "Echoed");

        self.close().await?;
        Ok(n)
    }

    /// Shut down the stream, retrying on transient signal interruption.
    async fn close(&mut self) -> io::Result<()> {
        loop {
            match self.stream.shutdown().await {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.state = ConnState::Closed;
        trace!(peer = %self.peer, "Closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Accept one loopback connection and return both ends.
    async fn accepted_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        (Connection::new(stream, peer), client)
    }

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let (mut conn, mut client) = accepted_pair().await;
        assert_eq!(conn.state(), ConnState::Accepted);

        client.write_all(b"hello").await.unwrap();

        let n = conn.echo().await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(conn.state(), ConnState::Closed);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"hello");
    }

    #[tokio::test]
    async fn test_zero_byte_peer_close() {
        let (mut conn, mut client) = accepted_pair().await;

        client.shutdown().await.unwrap();

        let n = conn.echo().await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(conn.state(), ConnState::Closed);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_receive_is_bounded() {
        let (mut conn, mut client) = accepted_pair().await;

        let payload = vec![0xab_u8; 2 * ECHO_BUFFER_SIZE];
        client.write_all(&payload).await.unwrap();
        client.shutdown().await.unwrap();

        // Let the whole transmission land before the single receive runs.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let n = conn.echo().await.unwrap();
        assert_eq!(n, ECHO_BUFFER_SIZE);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply.len(), ECHO_BUFFER_SIZE);
        assert!(reply.iter().all(|&b| b == 0xab));
    }
}
