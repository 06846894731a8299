//! TCP collaborators that move framed `CommMessage`s between nodes.
//!
//! Every established socket becomes a link made of two tasks, a reader that hands each
//! decoded frame to a callback and a writer that drains an unbounded queue. Sending is
//! therefore synchronous and never waits on the network, a dead link is reported as a
//! failed send.

mod client;
mod connection;
mod server;

use std::{io, net::SocketAddr};

use log::{debug, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::mpsc::UnboundedReceiver,
};
use tokio_util::sync::CancellationToken;

use crate::{
    OnoReceiver, OnoSender,
    msg::{CommMessage, MessageMeta, Protos},
};

pub use client::TcpClient;
pub use connection::Connection;
pub use server::{MessageHandler, TcpServer};

/// The sending side of an established connection.
pub trait Client: Send + Sync {
    /// Hands a message to the transport.
    ///
    /// # Arguments
    /// * `meta` - The routing and correlation header.
    /// * `protos` - The encoding of `data`.
    /// * `data` - The raw payload.
    ///
    /// # Returns
    /// An `io::Error` if the message could not be queued for transmission.
    fn send(&self, meta: &MessageMeta, protos: Protos, data: &[u8]) -> io::Result<()>;
}

/// Spawns the reader and writer tasks of a link, must be called within a tokio runtime.
///
/// # Arguments
/// * `stream` - The connected socket.
/// * `peer` - The remote address, used for observability.
/// * `token` - Cancelling it tears down both tasks, either task cancels it when it ends.
/// * `outbound` - The queue the writer drains.
/// * `on_message` - Invoked for every inbound frame.
pub(crate) fn spawn_link<F>(
    stream: TcpStream,
    peer: SocketAddr,
    token: CancellationToken,
    outbound: UnboundedReceiver<CommMessage>,
    on_message: F,
) where
    F: FnMut(CommMessage) + Send + 'static,
{
    if let Err(e) = stream.set_nodelay(true) {
        debug!("failed to set nodelay for {peer}: {e}");
    }

    let (rx, tx) = stream.into_split();
    let (rx, tx) = crate::channel(rx, tx);

    tokio::spawn(read_loop(rx, peer, token.clone(), on_message));
    tokio::spawn(write_loop(tx, peer, token, outbound));
}

async fn read_loop<R, F>(
    mut rx: OnoReceiver<R>,
    peer: SocketAddr,
    token: CancellationToken,
    mut on_message: F,
) where
    R: AsyncRead + Unpin,
    F: FnMut(CommMessage),
{
    let mut buf = Vec::new();

    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => break,
            msg = rx.recv_into::<CommMessage>(&mut buf) => msg,
        };

        match msg {
            Ok(msg) => on_message(msg),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("peer {peer} closed the connection");
                break;
            }
            Err(e) => {
                warn!("failed to read from {peer}: {e}");
                break;
            }
        }
    }

    token.cancel();
}

async fn write_loop<W>(
    mut tx: OnoSender<W>,
    peer: SocketAddr,
    token: CancellationToken,
    mut outbound: UnboundedReceiver<CommMessage>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => break,
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        if let Err(e) = tx.send(&msg).await {
            warn!(request_id = msg.meta.request_id; "failed to write to {peer}: {e}");
            break;
        }
    }

    outbound.close();
    token.cancel();
}
