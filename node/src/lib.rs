pub mod config;
pub mod error;
pub mod info;
pub mod lifecycle;
pub mod member;
pub mod messenger;
pub mod node;
pub mod tracking;


pub use config::NodeConfig;
pub use error::{NodeErr, Result};
pub use info::{ClusterState, NodeInfo, NodeRole, NodeState};
pub use member::{DataHandler, MemberNode};
pub use messenger::SyncMessenger;
pub use node::{Node, NodeCore};
pub use tracking::{MessageCallback, MessageTracker};
