use std::{fmt, io};

use crate::{Deserialize, Serialize};

type MetaLen = u32;
const META_LEN_SIZE: usize = size_of::<MetaLen>();
const PROTOS_SIZE: usize = size_of::<u8>();

/// The role a node plays inside the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Worker,
    Server,
    Scheduler,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Worker => "worker",
            NodeRole::Server => "server",
            NodeRole::Scheduler => "scheduler",
        };

        f.write_str(name)
    }
}

/// The command carried by every message's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Node -> scheduler, carries a `RegisterSpec` and is answered with a `RegisterAck`.
    Register,
    /// Scheduler -> node, the cluster is available and the node may proceed.
    ClusterReady,
    /// Node -> scheduler, the node wants to leave the cluster.
    Finish,
    /// Scheduler -> node, every member finished.
    ClusterFinished,
    /// Opaque user payload exchanged between members.
    Data,
}

/// The encoding tag of a message's data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protos {
    Raw = 0,
    Json = 1,
    Protobuf = 2,
    Flatbuffer = 3,
}

impl TryFrom<u8> for Protos {
    type Error = io::Error;

    fn try_from(byte: u8) -> io::Result<Self> {
        match byte {
            0 => Ok(Protos::Raw),
            1 => Ok(Protos::Json),
            2 => Ok(Protos::Protobuf),
            3 => Ok(Protos::Flatbuffer),
            byte => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Received an invalid protos byte {byte}"),
            )),
        }
    }
}

/// The routing and correlation header of a message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MessageMeta {
    pub cmd: Command,
    /// Correlates a response with the request that caused it, responses reuse the request's id.
    pub request_id: u64,
    /// Role of the sender.
    pub role: NodeRole,
    /// Rank of the sender, `0` until the scheduler assigned one.
    pub rank_id: u32,
}

impl MessageMeta {
    /// Creates a new `MessageMeta` with an unassigned request id.
    ///
    /// # Arguments
    /// * `cmd` - The command of the message.
    /// * `role` - The role of the sending node.
    /// * `rank_id` - The rank of the sending node.
    ///
    /// # Returns
    /// A new `MessageMeta` instance.
    pub fn new(cmd: Command, role: NodeRole, rank_id: u32) -> Self {
        Self {
            cmd,
            request_id: 0,
            role,
            rank_id,
        }
    }
}

/// The application layer message for the entire cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommMessage {
    pub meta: MessageMeta,
    pub protos: Protos,
    pub data: Vec<u8>,
}

impl CommMessage {
    /// Creates a new `CommMessage`.
    pub fn new(meta: MessageMeta, protos: Protos, data: Vec<u8>) -> Self {
        Self { meta, protos, data }
    }

    /// Builds the response to this message, it keeps the same metadata so the
    /// requester can correlate it.
    ///
    /// # Arguments
    /// * `protos` - The encoding of `data`.
    /// * `data` - The response payload, may be empty for plain acknowledgements.
    ///
    /// # Returns
    /// The response message.
    pub fn reply(&self, protos: Protos, data: Vec<u8>) -> Self {
        Self::new(self.meta.clone(), protos, data)
    }

    fn buf_is_too_small<T>(size: usize, needed: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {needed} bytes"),
        ))
    }
}

impl<'a> Serialize<'a> for CommMessage {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        let start = buf.len();
        buf.extend_from_slice(&[0; META_LEN_SIZE]);
        serde_json::to_writer(&mut *buf, &self.meta)?;

        let meta_len = (buf.len() - start - META_LEN_SIZE) as MetaLen;
        buf[start..start + META_LEN_SIZE].copy_from_slice(&meta_len.to_be_bytes());
        buf.push(self.protos as u8);

        Ok(Some(&self.data))
    }
}

impl<'a> Deserialize<'a> for CommMessage {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < META_LEN_SIZE {
            return Self::buf_is_too_small(buf.len(), META_LEN_SIZE);
        }

        let (len_buf, rest) = buf.split_at(META_LEN_SIZE);
        let mut meta_len = [0; META_LEN_SIZE];
        meta_len.copy_from_slice(len_buf);
        let meta_len = MetaLen::from_be_bytes(meta_len) as usize;

        let needed = META_LEN_SIZE + meta_len + PROTOS_SIZE;
        if buf.len() < needed {
            return Self::buf_is_too_small(buf.len(), needed);
        }

        let (meta_buf, rest) = rest.split_at(meta_len);
        let meta = serde_json::from_slice(meta_buf)?;
        let protos = Protos::try_from(rest[0])?;
        let data = rest[PROTOS_SIZE..].to_vec();

        Ok(Self { meta, protos, data })
    }
}
