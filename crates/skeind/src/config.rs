//! TOML configuration for the skein daemon.
//!
//! Every section is optional; a missing file yields the defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use skein_engine::{ConsistentStoreConfig, ReplicationConfig};

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Host identity and addresses.
    pub node: NodeSection,
    /// Cluster membership.
    pub cluster: ClusterSection,
    /// Ring shape.
    pub ring: RingSection,
    /// Vnode storage backend.
    pub store: StoreSection,
    /// Replication workers.
    pub replication: ReplicationSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for the node key and vnode databases.
    pub data_dir: PathBuf,
    /// Address for the HTTP front-end.
    pub http_listen_addr: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".skein"))
            .unwrap_or_else(|| PathBuf::from(".skein"));
        Self {
            data_dir,
            http_listen_addr: "0.0.0.0:4920".to_string(),
        }
    }
}

/// `[cluster]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Shared secret; hosts with different secrets cannot connect.
    ///
    /// A random secret is generated at startup when empty.
    pub secret: String,
    /// Other hosts of the ring (`"endpoint-id"` or `"endpoint-id@ip:port"`).
    pub peers: Vec<String>,
}

/// `[ring]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RingSection {
    /// Ring positions owned by each host.
    pub vnodes_per_host: u16,
    /// Length of each key's preference list.
    pub replicas: usize,
}

impl Default for RingSection {
    fn default() -> Self {
        Self {
            vnodes_per_host: 8,
            replicas: 3,
        }
    }
}

/// `[store]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Backend type: `"fjall"` (default) or `"memory"`.
    pub backend: String,
    /// Values up to this size are kept inline in the inode.
    pub inline_threshold: Option<usize>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "fjall".to_string(),
            inline_threshold: None,
        }
    }
}

/// `[replication]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReplicationSection {
    /// Number of replication workers.
    pub workers: Option<usize>,
    /// Bounded queue size per worker.
    pub queue_capacity: Option<usize>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"skein_net=trace"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn is_memory(&self) -> bool {
        self.store.backend == "memory"
    }

    pub fn store_config(&self) -> ConsistentStoreConfig {
        let mut config = ConsistentStoreConfig::default();
        if let Some(threshold) = self.store.inline_threshold {
            config.inline_threshold = threshold;
        }
        config
    }

    pub fn replication_config(&self) -> ReplicationConfig {
        let defaults = ReplicationConfig::default();
        ReplicationConfig {
            workers: self.replication.workers.unwrap_or(defaults.workers),
            queue_capacity: self
                .replication
                .queue_capacity
                .unwrap_or(defaults.queue_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[node]
data_dir = "/tmp/skein-test"
http_listen_addr = "127.0.0.1:5920"

[cluster]
secret = "my-cluster-secret"
peers = ["abc123@192.168.1.10:4920"]

[ring]
vnodes_per_host = 16
replicas = 2

[store]
backend = "memory"
inline_threshold = 4096

[replication]
workers = 2
queue_capacity = 64

[log]
level = "debug"
"#;

        let config: CliConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.node.data_dir, PathBuf::from("/tmp/skein-test"));
        assert_eq!(config.node.http_listen_addr, "127.0.0.1:5920");
        assert_eq!(config.cluster.secret, "my-cluster-secret");
        assert_eq!(config.cluster.peers, vec!["abc123@192.168.1.10:4920"]);
        assert_eq!(config.ring.vnodes_per_host, 16);
        assert_eq!(config.ring.replicas, 2);
        assert!(config.is_memory());
        assert_eq!(config.store_config().inline_threshold, 4096);
        let repl = config.replication_config();
        assert_eq!(repl.workers, 2);
        assert_eq!(repl.queue_capacity, 64);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: CliConfig = toml::from_str("").unwrap();
        assert_eq!(config.node.http_listen_addr, "0.0.0.0:4920");
        assert_eq!(config.store.backend, "fjall");
        assert!(!config.is_memory());
        assert!(config.cluster.secret.is_empty());
        assert_eq!(config.ring.replicas, 3);
        assert_eq!(config.store_config().inline_threshold, 1024);
        assert_eq!(config.replication_config().workers, 4);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: CliConfig = toml::from_str("[ring]\nreplicas = 5\n").unwrap();
        assert_eq!(config.ring.replicas, 5);
        assert_eq!(config.ring.vnodes_per_host, 8);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skein.toml");
        std::fs::write(
            &path,
            "[node]\ndata_dir = \"/tmp/test-skein\"\nhttp_listen_addr = \"127.0.0.1:9999\"\n",
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.node.data_dir, PathBuf::from("/tmp/test-skein"));
        assert_eq!(config.node.http_listen_addr, "127.0.0.1:9999");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CliConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
