use std::{io, net::SocketAddr};

use tokio::sync::mpsc::UnboundedSender;

use super::Client;
use crate::msg::{CommMessage, MessageMeta, Protos};

/// The writable side of a link, cheap to clone.
///
/// Handlers receive it to answer requests or push messages back to the peer.
#[derive(Debug, Clone)]
pub struct Connection {
    peer: SocketAddr,
    outbound: UnboundedSender<CommMessage>,
}

impl Connection {
    /// Creates a new `Connection` feeding the writer task of a link.
    pub(crate) fn new(peer: SocketAddr, outbound: UnboundedSender<CommMessage>) -> Self {
        Self { peer, outbound }
    }

    /// Returns the remote address of the link.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Returns whether the link's writer already went away.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Queues an already built message for transmission.
    ///
    /// # Arguments
    /// * `msg` - The message to send.
    ///
    /// # Returns
    /// A `BrokenPipe` error if the link is closed.
    pub fn send_message(&self, msg: CommMessage) -> io::Result<()> {
        self.outbound.send(msg).map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("connection to {} is closed", self.peer),
            )
        })
    }
}

impl Client for Connection {
    fn send(&self, meta: &MessageMeta, protos: Protos, data: &[u8]) -> io::Result<()> {
        let msg = CommMessage::new(meta.clone(), protos, data.to_vec());
        self.send_message(msg)
    }
}
