use std::{error::Error, fmt, io, net::SocketAddr, time::Duration};

/// The node module's result type.
pub type Result<T> = std::result::Result<T, NodeErr>;

/// Failures surfaced by the coordination core and its role variants.
#[derive(Debug)]
pub enum NodeErr {
    /// A blocking wait did not observe completion before its deadline.
    Timeout { what: &'static str, after: Duration },
    /// The transport refused to transmit a message.
    Transport(io::Error),
    /// The node could not listen on its configured address.
    Bind { addr: SocketAddr, source: io::Error },
    /// The scheduler rejected or never answered the registration.
    Registration(String),
    /// A control payload could not be encoded or decoded.
    Codec(serde_json::Error),
    /// The node was stopped, the operation can not proceed.
    Terminated,
    Io(io::Error),
}

impl fmt::Display for NodeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeErr::Timeout { what, after } => write!(f, "timed out after {after:?} waiting for {what}"),
            NodeErr::Transport(e) => write!(f, "transport error: {e}"),
            NodeErr::Bind { addr, source } => write!(f, "failed to bind {addr}: {source}"),
            NodeErr::Registration(reason) => write!(f, "registration failed: {reason}"),
            NodeErr::Codec(e) => write!(f, "codec error: {e}"),
            NodeErr::Terminated => f.write_str("node is stopped"),
            NodeErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for NodeErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NodeErr::Transport(e) | NodeErr::Io(e) => Some(e),
            NodeErr::Bind { source, .. } => Some(source),
            NodeErr::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NodeErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for NodeErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<NodeErr> for io::Error {
    fn from(value: NodeErr) -> Self {
        match value {
            NodeErr::Io(e) | NodeErr::Transport(e) => e,
            NodeErr::Bind { source, .. } => source,
            timeout @ NodeErr::Timeout { .. } => io::Error::new(io::ErrorKind::TimedOut, timeout),
            other => io::Error::other(other),
        }
    }
}

impl NodeErr {
    /// Returns whether the error is an expired wait, callers may retry those.
    pub fn is_timeout(&self) -> bool {
        matches!(self, NodeErr::Timeout { .. })
    }
}
