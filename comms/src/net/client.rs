use std::{io, net::SocketAddr, time::Duration};

use tokio::{net::TcpStream, runtime::Handle, sync::mpsc};
use tokio_util::sync::CancellationToken;

use super::{Client, Connection, spawn_link};
use crate::msg::{CommMessage, MessageMeta, Protos};

/// An outbound connection to a peer node.
///
/// Responses and pushes from the peer are delivered to the callback given at connect time.
pub struct TcpClient {
    conn: Connection,
    token: CancellationToken,
}

impl TcpClient {
    /// Connects to `addr` and starts the link on the given runtime.
    ///
    /// # Arguments
    /// * `handle` - The runtime that will drive the link.
    /// * `addr` - The peer's address.
    /// * `timeout` - Upper bound for establishing the connection.
    /// * `on_message` - Invoked for every message the peer sends back.
    ///
    /// # Returns
    /// A connected client or the connection error.
    pub fn connect<F>(
        handle: &Handle,
        addr: SocketAddr,
        timeout: Duration,
        on_message: F,
    ) -> io::Result<Self>
    where
        F: FnMut(CommMessage) + Send + 'static,
    {
        let stream = std::net::TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nonblocking(true)?;

        let _guard = handle.enter();
        let stream = TcpStream::from_std(stream)?;
        let token = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        spawn_link(stream, addr, token.clone(), outbound_rx, on_message);

        Ok(Self {
            conn: Connection::new(addr, outbound_tx),
            token,
        })
    }

    /// Returns the peer's address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    /// Returns whether the link already went away or was closed.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.conn.is_closed()
    }

    /// Queues an already built message for transmission.
    ///
    /// # Returns
    /// A `BrokenPipe` error if the link is closed.
    pub fn send_message(&self, msg: CommMessage) -> io::Result<()> {
        if self.token.is_cancelled() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("connection to {} was closed", self.peer_addr()),
            ));
        }

        self.conn.send_message(msg)
    }

    /// Closes the link, later sends fail.
    pub fn close(&self) {
        self.token.cancel();
    }
}

impl Client for TcpClient {
    fn send(&self, meta: &MessageMeta, protos: Protos, data: &[u8]) -> io::Result<()> {
        let msg = CommMessage::new(meta.clone(), protos, data.to_vec());
        self.send_message(msg)
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
