use std::net::IpAddr;

pub use comms::msg::NodeRole;

/// Identity of a node, owned by the node itself.
///
/// `node_id` and `role` are fixed at construction, the rank and the bound address are
/// assigned once during `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: String,
    pub rank_id: u32,
    pub role: NodeRole,
    pub ip: Option<IpAddr>,
    pub port: u16,
}

impl NodeInfo {
    pub fn new(node_id: String, role: NodeRole) -> Self {
        Self {
            node_id,
            rank_id: 0,
            role,
            ip: None,
            port: 0,
        }
    }
}

/// The local view of this node's lifecycle, it only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeState {
    Starting,
    Running,
    Finishing,
    Stopped,
}

/// The last cluster phase the scheduler pushed to this node, advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterState {
    Starting,
    Ready,
    Finishing,
    Stopped,
}

/// Generates a random node id formatted like a UUID.
pub fn generate_node_id() -> String {
    let id = rand::random::<u128>();
    let hex = format!("{id:032x}");
    format!(
        "{}-{}-{}-{}-{}",
        &hex[..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..]
    )
}
