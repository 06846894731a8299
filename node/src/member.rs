use std::{net::SocketAddr, sync::Arc, time::Duration};

use comms::{
    Connection, MessageHandler, TcpClient, TcpServer,
    msg::{Command, CommMessage, Protos},
    specs::{RegisterAck, RegisterSpec},
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};

use crate::{
    config::NodeConfig,
    error::{NodeErr, Result},
    info::{ClusterState, NodeRole, NodeState},
    node::{Node, NodeCore},
};

/// Handles a `Data` message from a peer, the returned bytes are sent back as the response.
pub type DataHandler = Arc<dyn Fn(&CommMessage) -> Vec<u8> + Send + Sync>;

/// The resources a started member holds on to.
struct Transport {
    runtime: Runtime,
    server: TcpServer,
    scheduler: Arc<TcpClient>,
}

impl Transport {
    fn shutdown(self) {
        self.scheduler.close();
        self.server.stop();
        self.runtime.shutdown_background();
    }
}

/// A worker or server node, the member side of the scheduler handshake.
pub struct MemberNode {
    core: Arc<NodeCore>,
    scheduler_addr: SocketAddr,
    transport: Mutex<Option<Transport>>,
    start_lock: Mutex<()>,
    data_handler: Option<DataHandler>,
}

impl MemberNode {
    /// Creates a new `MemberNode`.
    ///
    /// # Arguments
    /// * `role` - Either `NodeRole::Worker` or `NodeRole::Server`.
    /// * `scheduler_addr` - Where the scheduler accepts registrations.
    /// * `config` - The node's settings.
    ///
    /// # Returns
    /// A node in `NodeState::Starting`, nothing is bound until `start`.
    pub fn new(role: NodeRole, scheduler_addr: SocketAddr, config: NodeConfig) -> Self {
        Self {
            core: Arc::new(NodeCore::new(role, config)),
            scheduler_addr,
            transport: Mutex::new(None),
            start_lock: Mutex::new(()),
            data_handler: None,
        }
    }

    /// Installs the handler for `Data` messages sent by peers.
    pub fn with_data_handler(mut self, handler: DataHandler) -> Self {
        self.data_handler = Some(handler);
        self
    }

    /// Opens a link to a peer member.
    ///
    /// Responses on it are routed to this node's request tracker, so the returned client
    /// can be handed to `send_message_sync` and `send_message_async`.
    ///
    /// # Arguments
    /// * `addr` - The peer's bound address.
    ///
    /// # Returns
    /// The connected client, `Terminated` if this node was never started or already stopped.
    pub fn connect(&self, addr: SocketAddr) -> Result<TcpClient> {
        let handle = self
            .transport
            .lock()
            .as_ref()
            .map(|transport| transport.runtime.handle().clone())
            .ok_or(NodeErr::Terminated)?;

        let core = self.core.clone();
        let client = TcpClient::connect(
            &handle,
            addr,
            self.core.config().comm_timeout(),
            move |msg| core.notify_message_arrival(msg),
        )
        .map_err(NodeErr::Transport)?;

        debug!(node_id:% = self.core.node_id(); "connected to peer {addr}");
        Ok(client)
    }

    /// Sends `data` to the scheduler and waits for its response.
    pub fn send_to_scheduler(&self, cmd: Command, protos: Protos, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let scheduler = self.scheduler()?;
        let meta = self.core.meta(cmd);
        let timeout = self.core.config().comm_timeout();
        self.core.send_message_sync(&*scheduler, meta, protos, data, timeout)
    }

    fn scheduler(&self) -> Result<Arc<TcpClient>> {
        self.transport
            .lock()
            .as_ref()
            .map(|transport| transport.scheduler.clone())
            .ok_or(NodeErr::Terminated)
    }

    fn handler(&self) -> MessageHandler {
        let core = self.core.clone();
        let data_handler = self.data_handler.clone();

        Arc::new(move |conn: &Connection, msg: CommMessage| {
            if msg.meta.cmd != Command::Data {
                let reply = handle_inbound(&core, &msg);
                answer(conn, &msg, reply);
                return;
            }

            // Data handlers may block on this node's own sends, so they run off the I/O threads.
            let Some(handler) = data_handler.clone() else {
                answer(conn, &msg, Vec::new());
                return;
            };

            let conn = conn.clone();
            tokio::task::spawn_blocking(move || {
                let reply = handler(&msg);
                answer(&conn, &msg, reply);
            });
        })
    }

    /// Binds, connects and registers, leaving the started transport behind on success.
    fn bring_up(&self, timeout: Duration) -> Result<()> {
        let config = self.core.config();

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.io_threads())
            .thread_name("node-io")
            .enable_all()
            .build()?;

        let bind_addr = SocketAddr::new(config.bind_ip(), config.bind_port());
        let server = TcpServer::bind(runtime.handle(), bind_addr, self.handler()).map_err(|source| {
            NodeErr::Bind {
                addr: bind_addr,
                source,
            }
        })?;

        let local = server.local_addr();
        self.core.set_bound_addr(local.ip(), local.port());

        let core = self.core.clone();
        let scheduler = TcpClient::connect(
            runtime.handle(),
            self.scheduler_addr,
            config.comm_timeout(),
            move |msg| core.notify_message_arrival(msg),
        )
        .map_err(NodeErr::Transport)?;

        let transport = Transport {
            runtime,
            server,
            scheduler: Arc::new(scheduler),
        };
        let scheduler = transport.scheduler.clone();
        *self.transport.lock() = Some(transport);

        let spec = RegisterSpec {
            node_id: self.core.node_id(),
            role: self.core.role(),
            ip: local.ip(),
            port: local.port(),
        };
        let data = serde_json::to_vec(&spec)?;
        let meta = self.core.meta(Command::Register);

        let comm_timeout = config.comm_timeout();
        let payloads = self
            .core
            .send_message_sync(&*scheduler, meta, Protos::Json, &data, comm_timeout)?;

        let ack: RegisterAck = match payloads.first() {
            Some(payload) => serde_json::from_slice(payload)?,
            None => return Err(NodeErr::Registration("empty acknowledgement".into())),
        };

        if !ack.accepted {
            let reason = ack.reason.unwrap_or_else(|| "no reason given".into());
            warn!(node_id:% = spec.node_id; "registration rejected: {reason}");
            return Err(NodeErr::Registration(reason));
        }

        self.core.set_rank_id(ack.rank_id);
        info!(node_id:% = spec.node_id, rank_id = ack.rank_id; "registered as {}", spec.role);

        if !self.core.wait_for_start(timeout) {
            if self.core.lifecycle().is_stopped() {
                return Err(NodeErr::Terminated);
            }

            return Err(NodeErr::Timeout {
                what: "cluster ready",
                after: timeout,
            });
        }

        Ok(())
    }

    /// Moves a brought up node to `NodeState::Running` unless a `stop` got in first.
    fn enter_running(&self) -> Result<()> {
        if !self.core.advance_state(NodeState::Running) || self.core.lifecycle().is_stopped() {
            warn!(node_id:% = self.core.node_id(); "stopped while starting");
            self.tear_down_transport();
            return Err(NodeErr::Terminated);
        }

        Ok(())
    }

    fn wait_finished(&self, timeout: Duration) -> Result<()> {
        if !self.core.wait_for_finish(timeout) {
            return Err(NodeErr::Timeout {
                what: "cluster finished",
                after: timeout,
            });
        }

        Ok(())
    }

    fn tear_down_transport(&self) {
        if let Some(transport) = self.transport.lock().take() {
            transport.shutdown();
        }
    }
}

fn answer(conn: &Connection, msg: &CommMessage, reply: Vec<u8>) {
    if let Err(e) = conn.send_message(msg.reply(Protos::Raw, reply)) {
        debug!(request_id = msg.meta.request_id; "failed to answer {}: {e}", conn.peer_addr());
    }
}

/// Applies an inbound control message to the node, returning the response's payload.
fn handle_inbound(core: &NodeCore, msg: &CommMessage) -> Vec<u8> {
    match msg.meta.cmd {
        Command::ClusterReady => {
            info!(node_id:% = core.node_id(); "cluster is ready");
            core.set_cluster_state(ClusterState::Ready);
            core.notify_ready();
            Vec::new()
        }
        Command::ClusterFinished => {
            info!(node_id:% = core.node_id(); "cluster finished");
            core.set_cluster_state(ClusterState::Finishing);
            core.notify_finished();
            Vec::new()
        }
        cmd => {
            debug!(request_id = msg.meta.request_id; "ignoring unexpected {cmd:?} from {}", msg.meta.role);
            Vec::new()
        }
    }
}

impl Node for MemberNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn start(&self, timeout: Duration) -> Result<()> {
        let _guard = self.start_lock.lock();

        match self.core.node_state() {
            NodeState::Starting => {}
            NodeState::Stopped => return Err(NodeErr::Terminated),
            _ => return Ok(()),
        }

        if self.core.lifecycle().is_stopped() {
            return Err(NodeErr::Terminated);
        }

        if let Err(e) = self.bring_up(timeout) {
            warn!(node_id:% = self.core.node_id(); "failed to start: {e}");
            self.tear_down_transport();
            return Err(e);
        }

        self.enter_running()
    }

    fn stop(&self) -> Result<()> {
        if !self.core.begin_stop() {
            return Ok(());
        }

        self.core.release_waiters();
        self.tear_down_transport();
        self.core.set_cluster_state(ClusterState::Stopped);
        self.core.advance_state(NodeState::Stopped);
        Ok(())
    }

    fn finish(&self, timeout: Duration) -> Result<()> {
        if self.core.lifecycle().is_stopped() || self.core.node_state() == NodeState::Starting {
            return Ok(());
        }

        if !self.core.begin_finish() {
            return self.wait_finished(timeout);
        }

        self.core.advance_state(NodeState::Finishing);

        let res = self
            .send_to_scheduler(Command::Finish, Protos::Raw, &[])
            .and_then(|_| self.wait_finished(timeout));

        if let Err(e) = &res {
            warn!(node_id:% = self.core.node_id(); "failed to finish cleanly: {e}");
        }

        self.stop()?;
        res
    }
}

impl Drop for MemberNode {
    fn drop(&mut self) {
        self.tear_down_transport();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unstarted() -> MemberNode {
        let scheduler = SocketAddr::from(([127, 0, 0, 1], 9));
        MemberNode::new(NodeRole::Worker, scheduler, NodeConfig::default())
    }

    #[test]
    fn test_stop_before_running_fails_the_start() {
        let node = unstarted();
        node.stop().unwrap();

        assert!(matches!(node.enter_running(), Err(NodeErr::Terminated)));
        assert_eq!(node.core().node_state(), NodeState::Stopped);
    }

    #[test]
    fn test_stop_claimed_mid_start_fails_the_start() {
        let node = unstarted();
        assert!(node.core().begin_stop());

        assert!(matches!(node.enter_running(), Err(NodeErr::Terminated)));
    }

    #[test]
    fn test_enter_running_without_stop_succeeds() {
        let node = unstarted();

        node.enter_running().unwrap();
        assert_eq!(node.core().node_state(), NodeState::Running);
    }
}
