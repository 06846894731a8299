use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{net::TcpListener, runtime::Handle, sync::mpsc};
use tokio_util::sync::CancellationToken;

use super::{Connection, spawn_link};
use crate::msg::CommMessage;

/// Callback invoked for every framed message a `TcpServer` receives.
pub type MessageHandler = Arc<dyn Fn(&Connection, CommMessage) + Send + Sync>;

/// Accepts connections and delivers their messages to a handler.
pub struct TcpServer {
    local_addr: SocketAddr,
    token: CancellationToken,
}

impl TcpServer {
    /// Binds a listener and starts accepting on the given runtime.
    ///
    /// Binding happens synchronously so the caller learns about address errors immediately.
    ///
    /// # Arguments
    /// * `handle` - The runtime that will drive the accept loop and every connection.
    /// * `addr` - The address to bind, port `0` picks an ephemeral one.
    /// * `handler` - Invoked with the originating connection for every inbound message.
    ///
    /// # Returns
    /// A running server or the bind error.
    pub fn bind(handle: &Handle, addr: SocketAddr, handler: MessageHandler) -> io::Result<Self> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let _guard = handle.enter();
        let listener = TcpListener::from_std(listener)?;
        let token = CancellationToken::new();
        handle.spawn(accept_loop(listener, handler, token.clone()));

        info!("listening at {local_addr}");
        Ok(Self { local_addr, token })
    }

    /// Returns the address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes every accepted connection.
    pub fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn accept_loop(listener: TcpListener, handler: MessageHandler, token: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("failed to accept a connection: {e}");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        debug!("accepted connection from {peer}");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let conn = Connection::new(peer, outbound_tx);
        let handler = handler.clone();

        spawn_link(stream, peer, token.child_token(), outbound_rx, move |msg| {
            handler(&conn, msg)
        });
    }

    debug!("listener closed");
}
