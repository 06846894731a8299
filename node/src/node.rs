use std::{net::IpAddr, sync::Arc, time::Duration};

use comms::{
    Client,
    msg::{Command, CommMessage, MessageMeta, Protos},
};
use log::info;
use parking_lot::{Mutex, RwLock};

use crate::{
    config::NodeConfig,
    error::Result,
    info::{ClusterState, NodeInfo, NodeRole, NodeState, generate_node_id},
    lifecycle::LifecycleGate,
    messenger::SyncMessenger,
    tracking::{MessageCallback, MessageTracker},
};

/// The lifecycle contract every role variant implements.
///
/// Variants own a `NodeCore` and add their own bind, connect and handshake choreography.
pub trait Node: Send + Sync {
    /// Returns the shared coordination core of this node.
    fn core(&self) -> &NodeCore;

    /// Brings the node up, waiting at most `timeout` for the cluster to become available.
    ///
    /// On failure the node stays in `NodeState::Starting` and `start` may be retried.
    fn start(&self, timeout: Duration) -> Result<()>;

    /// Tears the node down, the teardown runs at most once however often it's called.
    fn stop(&self) -> Result<()>;

    /// Leaves the cluster, waiting at most `timeout` for it to finish.
    fn finish(&self, timeout: Duration) -> Result<()>;

    /// Starts with the configured `cluster_available_timeout`.
    fn start_default(&self) -> Result<()> {
        self.start(self.core().config().cluster_available_timeout())
    }

    /// Finishes with the configured `finish_timeout`.
    fn finish_default(&self) -> Result<()> {
        self.finish(self.core().config().finish_timeout())
    }

    fn node_id(&self) -> String {
        self.core().node_id()
    }

    fn rank_id(&self) -> u32 {
        self.core().rank_id()
    }

    fn role(&self) -> NodeRole {
        self.core().role()
    }

    fn bound_ip(&self) -> Option<IpAddr> {
        self.core().bound_ip()
    }

    fn bound_port(&self) -> u16 {
        self.core().bound_port()
    }

    /// Blocks until the request `request_id` completes or `timeout` elapses.
    fn wait(&self, request_id: u64, timeout: Duration) -> bool {
        self.core().wait(request_id, timeout)
    }
}

/// The request tracking and lifecycle state shared by every role.
pub struct NodeCore {
    info: RwLock<NodeInfo>,
    config: NodeConfig,
    lifecycle: LifecycleGate,
    messenger: SyncMessenger,
    node_state: Mutex<NodeState>,
    cluster_state: Mutex<ClusterState>,
}

impl NodeCore {
    /// Creates a new `NodeCore` with a freshly generated node id.
    ///
    /// # Arguments
    /// * `role` - The role of the owning node.
    /// * `config` - The node's settings.
    ///
    /// # Returns
    /// A new `NodeCore` in `NodeState::Starting`.
    pub fn new(role: NodeRole, config: NodeConfig) -> Self {
        let tracker = Arc::new(MessageTracker::new(config.track_retention()));

        Self {
            info: RwLock::new(NodeInfo::new(generate_node_id(), role)),
            config,
            lifecycle: LifecycleGate::new(),
            messenger: SyncMessenger::new(tracker),
            node_state: Mutex::new(NodeState::Starting),
            cluster_state: Mutex::new(ClusterState::Starting),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn messenger(&self) -> &SyncMessenger {
        &self.messenger
    }

    pub fn tracker(&self) -> &MessageTracker {
        self.messenger.tracker()
    }

    pub fn lifecycle(&self) -> &LifecycleGate {
        &self.lifecycle
    }

    /// Returns a snapshot of the node's identity.
    pub fn info(&self) -> NodeInfo {
        self.info.read().clone()
    }

    pub fn node_id(&self) -> String {
        self.info.read().node_id.clone()
    }

    pub fn rank_id(&self) -> u32 {
        self.info.read().rank_id
    }

    pub fn role(&self) -> NodeRole {
        self.info.read().role
    }

    pub fn bound_ip(&self) -> Option<IpAddr> {
        self.info.read().ip
    }

    pub fn bound_port(&self) -> u16 {
        self.info.read().port
    }

    /// Publishes the address the node listens on.
    pub fn set_bound_addr(&self, ip: IpAddr, port: u16) {
        let mut info = self.info.write();
        info.ip = Some(ip);
        info.port = port;
    }

    /// Publishes the rank the scheduler assigned.
    pub fn set_rank_id(&self, rank_id: u32) {
        self.info.write().rank_id = rank_id;
    }

    /// Builds the header of a message sent by this node.
    pub fn meta(&self, cmd: Command) -> MessageMeta {
        let info = self.info.read();
        MessageMeta::new(cmd, info.role, info.rank_id)
    }

    pub fn node_state(&self) -> NodeState {
        *self.node_state.lock()
    }

    /// Moves the node to `to` if that's further along the lifecycle.
    ///
    /// # Returns
    /// Whether the state changed.
    pub fn advance_state(&self, to: NodeState) -> bool {
        let mut state = self.node_state.lock();
        if to <= *state {
            return false;
        }

        info!(node_id:% = self.node_id(); "node state {:?} -> {to:?}", *state);
        *state = to;
        true
    }

    pub fn cluster_state(&self) -> ClusterState {
        *self.cluster_state.lock()
    }

    pub fn set_cluster_state(&self, state: ClusterState) {
        *self.cluster_state.lock() = state;
    }

    /// Raises the ready gate, every `wait_for_start` caller returns.
    pub fn notify_ready(&self) {
        self.lifecycle.ready().set_true();
    }

    /// Raises the finish gate, every `wait_for_finish` caller returns.
    pub fn notify_finished(&self) {
        self.lifecycle.finished().set_true();
    }

    /// Blocks until the ready gate is raised or `timeout` elapses.
    pub fn wait_for_start(&self, timeout: Duration) -> bool {
        self.lifecycle.ready().wait_true(timeout)
    }

    /// Blocks until the finish gate is raised or `timeout` elapses.
    pub fn wait_for_finish(&self, timeout: Duration) -> bool {
        self.lifecycle.finished().wait_true(timeout)
    }

    /// Whether the node got the go-ahead and left `NodeState::Starting`.
    pub fn is_ready(&self) -> bool {
        self.lifecycle.ready().is_true() && self.node_state() > NodeState::Starting
    }

    /// Whether the cluster finished and the node was torn down.
    pub fn is_finished(&self) -> bool {
        self.lifecycle.finished().is_true() && self.node_state() == NodeState::Stopped
    }

    /// Claims the stop teardown, `true` only for the first caller.
    pub fn begin_stop(&self) -> bool {
        self.lifecycle.claim_stop()
    }

    /// Claims the finish teardown, `true` only for the first caller.
    pub fn begin_finish(&self) -> bool {
        self.lifecycle.claim_finish()
    }

    /// Releases every blocked waiter, used on shutdown.
    pub fn release_waiters(&self) {
        self.tracker().close();
        self.lifecycle.release_all();
    }

    pub fn add_message_track(&self, expected: u32) -> u64 {
        self.tracker().add_message_track(expected)
    }

    pub fn check_message_track(&self, request_id: u64) -> bool {
        self.tracker().check_message_track(request_id)
    }

    pub fn set_message_callback(&self, request_id: u64, callback: MessageCallback) -> bool {
        self.tracker().set_message_callback(request_id, callback)
    }

    /// Routes an inbound response to the request it answers.
    pub fn notify_message_arrival(&self, msg: CommMessage) {
        self.messenger.on_message_arrival(msg);
    }

    pub fn wait(&self, request_id: u64, timeout: Duration) -> bool {
        self.tracker().wait(request_id, timeout)
    }

    /// Sends through `client` and blocks until the response arrives.
    ///
    /// # Returns
    /// The response payloads or why no response was observed.
    pub fn send_message_sync(
        &self,
        client: &dyn Client,
        meta: MessageMeta,
        protos: Protos,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Vec<Vec<u8>>> {
        self.messenger.send_sync(client, meta, protos, data, timeout)
    }

    /// Sends through `client` without waiting.
    ///
    /// # Returns
    /// The request id to pass to `wait`.
    pub fn send_message_async(
        &self,
        client: &dyn Client,
        meta: MessageMeta,
        protos: Protos,
        data: &[u8],
    ) -> Result<u64> {
        self.messenger.send_async(client, meta, protos, data)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            Arc, Barrier,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
        time::Instant,
    };

    use super::*;
    use crate::error::NodeErr;

    /// A role variant whose lifecycle only counts teardowns.
    struct SpyNode {
        core: NodeCore,
        teardowns: AtomicUsize,
    }

    impl SpyNode {
        fn new() -> Self {
            Self {
                core: NodeCore::new(NodeRole::Worker, NodeConfig::default()),
                teardowns: AtomicUsize::new(0),
            }
        }
    }

    impl Node for SpyNode {
        fn core(&self) -> &NodeCore {
            &self.core
        }

        fn start(&self, timeout: Duration) -> Result<()> {
            self.core.set_bound_addr(IpAddr::from([127, 0, 0, 1]), 4242);
            self.core.set_rank_id(3);
            if !self.core.wait_for_start(timeout) {
                return Err(NodeErr::Timeout {
                    what: "cluster ready",
                    after: timeout,
                });
            }

            self.core.advance_state(NodeState::Running);
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            if !self.core.begin_stop() {
                return Ok(());
            }

            self.teardowns.fetch_add(1, Ordering::SeqCst);
            self.core.release_waiters();
            self.core.advance_state(NodeState::Stopped);
            Ok(())
        }

        fn finish(&self, _timeout: Duration) -> Result<()> {
            if self.core.begin_finish() {
                self.core.advance_state(NodeState::Finishing);
                self.core.notify_finished();
            }

            self.stop()
        }
    }

    struct SilentClient;

    impl Client for SilentClient {
        fn send(&self, _: &MessageMeta, _: Protos, _: &[u8]) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_concurrent_stops_tear_down_once() {
        const THREADS: usize = 8;

        let node = Arc::new(SpyNode::new());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let (node, barrier) = (node.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    node.stop()
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(node.teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(node.core().node_state(), NodeState::Stopped);
    }

    #[test]
    fn test_repeated_finish_tears_down_once() {
        let node = SpyNode::new();

        node.finish(Duration::ZERO).unwrap();
        node.finish(Duration::ZERO).unwrap();
        node.stop().unwrap();

        assert_eq!(node.teardowns.load(Ordering::SeqCst), 1);
        assert!(node.core().is_finished());
    }

    #[test]
    fn test_ready_requires_leaving_starting() {
        let node = SpyNode::new();

        node.core().notify_ready();
        assert!(!node.core().is_ready());

        node.start(Duration::from_secs(1)).unwrap();
        assert!(node.core().is_ready());
        assert_eq!(node.rank_id(), 3);
        assert_eq!(node.bound_port(), 4242);
        assert_eq!(node.role(), NodeRole::Worker);
    }

    #[test]
    fn test_finished_requires_leaving_finishing() {
        let node = SpyNode::new();

        node.core().notify_finished();
        node.core().advance_state(NodeState::Finishing);
        assert!(!node.core().is_finished());

        node.core().advance_state(NodeState::Stopped);
        assert!(node.core().is_finished());
    }

    #[test]
    fn test_start_times_out_and_can_be_retried() {
        let node = SpyNode::new();

        let err = node.start(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(node.core().node_state(), NodeState::Starting);

        node.core().notify_ready();
        node.start(Duration::from_millis(20)).unwrap();
        assert_eq!(node.core().node_state(), NodeState::Running);
    }

    #[test]
    fn test_every_start_waiter_is_released_by_one_ready() {
        let node = Arc::new(SpyNode::new());

        let waiters: Vec<_> = (0..6)
            .map(|_| {
                let node = node.clone();
                thread::spawn(move || node.core().wait_for_start(Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        node.core().notify_ready();

        assert!(waiters.into_iter().all(|w| w.join().unwrap()));
    }

    #[test]
    fn test_state_never_moves_backwards() {
        let node = SpyNode::new();

        assert!(node.core().advance_state(NodeState::Finishing));
        assert!(!node.core().advance_state(NodeState::Running));
        assert!(!node.core().advance_state(NodeState::Finishing));
        assert_eq!(node.core().node_state(), NodeState::Finishing);
    }

    #[test]
    fn test_stop_releases_an_in_flight_sync_send() {
        let node = Arc::new(SpyNode::new());

        let sender = {
            let node = node.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let meta = node.core().meta(Command::Data);
                let res = node.core().send_message_sync(
                    &SilentClient,
                    meta,
                    Protos::Raw,
                    &[],
                    Duration::from_secs(10),
                );
                (res, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(30));
        node.stop().unwrap();

        let (res, elapsed) = sender.join().unwrap();
        assert!(matches!(res, Err(NodeErr::Terminated)));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_async_send_then_wait() {
        let node = SpyNode::new();
        let meta = node.core().meta(Command::Data);

        let id = node
            .core()
            .send_message_async(&SilentClient, meta.clone(), Protos::Raw, &[])
            .unwrap();
        assert!(!node.wait(id, Duration::from_millis(10)));

        let mut response = meta;
        response.request_id = id;
        node.core()
            .notify_message_arrival(CommMessage::new(response, Protos::Raw, Vec::new()));
        assert!(node.wait(id, Duration::from_millis(10)));
    }

    #[test]
    fn test_node_ids_are_distinct() {
        let a = NodeCore::new(NodeRole::Server, NodeConfig::default());
        let b = NodeCore::new(NodeRole::Server, NodeConfig::default());
        assert_ne!(a.node_id(), b.node_id());
        assert_eq!(a.cluster_state(), ClusterState::Starting);
    }
}
