use std::time::Duration;

use etcdfs_config::Config;

/// Connection settings for the etcd backend.
#[derive(Clone, Debug, Config)]
pub struct EtcdConfig {
    /// Cluster endpoints, `host:port` or full URLs.
    #[config(default = ["127.0.0.1:2379"])]
    pub endpoints: Vec<String>,

    #[config(default = 2000, min = 1)]
    pub dial_timeout_ms: u64,

    /// Deadline applied to every scan/get/put/delete.
    #[config(default = 3000, min = 1)]
    pub command_timeout_ms: u64,

    /// Client certificate (PEM) for mutual TLS.
    #[config(default = "")]
    pub cert_file: String,

    /// Client private key (PEM) for mutual TLS.
    #[config(default = "")]
    pub key_file: String,

    /// CA bundle (PEM) used to verify the servers.
    #[config(default = "")]
    pub trusted_ca_file: String,

    /// Key read once at startup to check that the cluster answers.
    #[config(default = "_ping")]
    pub ping_key: String,

    /// Serve reads from the local member without a quorum round-trip.
    #[config(default = true)]
    pub serializable_reads: bool,

    #[config(default = 60000, min = 1000)]
    pub keepalive_interval_ms: u64,
}

impl EtcdConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Whether any TLS material is configured.
    pub fn tls_enabled(&self) -> bool {
        !(self.cert_file.is_empty() && self.key_file.is_empty() && self.trusted_ca_file.is_empty())
    }
}
