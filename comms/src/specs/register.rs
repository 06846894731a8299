use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::msg::NodeRole;

/// Wire-level registration request a member sends to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSpec {
    /// Identifier generated by the node itself.
    pub node_id: String,
    pub role: NodeRole,
    /// Address where the node accepts pushes from the scheduler.
    pub ip: IpAddr,
    pub port: u16,
}

/// The scheduler's answer to a `RegisterSpec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAck {
    pub accepted: bool,
    /// Rank assigned to the node, meaningful only when `accepted`.
    pub rank_id: u32,
    /// Why the registration was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RegisterAck {
    /// Accepts a registration with the given rank.
    pub fn accept(rank_id: u32) -> Self {
        Self {
            accepted: true,
            rank_id,
            reason: None,
        }
    }

    /// Rejects a registration.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            rank_id: 0,
            reason: Some(reason.into()),
        }
    }
}
