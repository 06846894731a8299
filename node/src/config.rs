use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use serde::{Deserialize, Serialize};

const DEFAULT_CLUSTER_AVAILABLE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_COMM_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_FINISH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TRACK_RETENTION: Duration = Duration::from_secs(60);
const DEFAULT_IO_THREADS: usize = 2;

/// Settings a node reads at construction time.
///
/// Durations are written as (fractional) seconds, every missing field takes its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    #[serde(with = "secs")]
    cluster_available_timeout: Duration,
    #[serde(with = "secs")]
    comm_timeout: Duration,
    #[serde(with = "secs")]
    finish_timeout: Duration,
    #[serde(with = "secs")]
    track_retention: Duration,
    bind_ip: IpAddr,
    bind_port: u16,
    io_threads: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cluster_available_timeout: DEFAULT_CLUSTER_AVAILABLE_TIMEOUT,
            comm_timeout: DEFAULT_COMM_TIMEOUT,
            finish_timeout: DEFAULT_FINISH_TIMEOUT,
            track_retention: DEFAULT_TRACK_RETENTION,
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            bind_port: 0,
            io_threads: DEFAULT_IO_THREADS,
        }
    }
}

impl NodeConfig {
    /// How long `start` waits for the cluster to become available.
    pub fn cluster_available_timeout(&self) -> Duration {
        self.cluster_available_timeout
    }

    /// Default deadline of a synchronous send.
    pub fn comm_timeout(&self) -> Duration {
        self.comm_timeout
    }

    /// How long `finish` waits for the cluster to finish.
    pub fn finish_timeout(&self) -> Duration {
        self.finish_timeout
    }

    /// How long an unwaited request record is kept before being swept.
    pub fn track_retention(&self) -> Duration {
        self.track_retention
    }

    pub fn bind_ip(&self) -> IpAddr {
        self.bind_ip
    }

    /// Listening port, `0` picks an ephemeral one.
    pub fn bind_port(&self) -> u16 {
        self.bind_port
    }

    /// Worker threads of the node's transport runtime.
    pub fn io_threads(&self) -> usize {
        self.io_threads.max(1)
    }

    pub fn with_cluster_available_timeout(mut self, timeout: Duration) -> Self {
        self.cluster_available_timeout = timeout;
        self
    }

    pub fn with_comm_timeout(mut self, timeout: Duration) -> Self {
        self.comm_timeout = timeout;
        self
    }

    pub fn with_finish_timeout(mut self, timeout: Duration) -> Self {
        self.finish_timeout = timeout;
        self
    }

    pub fn with_track_retention(mut self, retention: Duration) -> Self {
        self.track_retention = retention;
        self
    }

    pub fn with_bind_addr(mut self, ip: IpAddr, port: u16) -> Self {
        self.bind_ip = ip;
        self.bind_port = port;
        self
    }

    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads;
        self
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.cluster_available_timeout(), Duration::from_secs(30));
        assert_eq!(config.comm_timeout(), Duration::from_secs(3));
        assert_eq!(config.bind_port(), 0);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: NodeConfig = serde_json::from_str(r#"{ "comm_timeout": 0.25 }"#).unwrap();
        assert_eq!(config.comm_timeout(), Duration::from_millis(250));
        assert_eq!(config.cluster_available_timeout(), Duration::from_secs(30));
        assert_eq!(config.io_threads(), 2);
    }

    #[test]
    fn test_negative_timeout_is_rejected() {
        let res = serde_json::from_str::<NodeConfig>(r#"{ "comm_timeout": -1 }"#);
        assert!(res.is_err());
    }
}
