//! Cell agent configuration.
//!
//! Flags with environment fallback, validated into hard errors before any
//! component starts. A missing cell identifier is fatal.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use corral_core::auction::RootFsProviders;
use corral_core::error::{Error, Result};
use corral_core::identity::CellId;

/// Command-line and environment configuration for the cell agent.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "corral-cell",
    about = "Corral cell agent: converges local containers with BBS state"
)]
pub struct Config {
    /// Unique identifier of this cell. Required.
    #[arg(long = "cell-id", env = "CORRAL_CELL_ID", default_value = "")]
    pub cell_id: String,

    /// Base URL of the BBS API.
    #[arg(long = "bbs-url", env = "CORRAL_BBS_URL", default_value = "http://127.0.0.1:8889")]
    pub bbs_url: String,

    /// Base URL of the coordination store.
    #[arg(
        long = "coordination-cluster",
        env = "CORRAL_COORDINATION_CLUSTER",
        default_value = "http://127.0.0.1:2379"
    )]
    pub coordination_cluster: String,

    /// Base URL of the local executor.
    #[arg(
        long = "executor-url",
        env = "CORRAL_EXECUTOR_URL",
        default_value = "http://127.0.0.1:1700"
    )]
    pub executor_url: String,

    /// Address the cell's HTTP surface listens on.
    #[arg(long = "listen-addr", env = "CORRAL_LISTEN_ADDR", default_value = "0.0.0.0:1800")]
    pub listen_addr: String,

    /// Host address routed to running LRP instances. Defaults to the host
    /// part of the listen address.
    #[arg(long = "lrp-host", env = "CORRAL_LRP_HOST")]
    pub lrp_host: Option<String>,

    /// Availability zone advertised to the auctioneer.
    #[arg(long = "zone", env = "CORRAL_ZONE", default_value = "z1")]
    pub zone: String,

    /// Seconds between bulker convergence passes.
    #[arg(long = "polling-interval", value_name = "SECONDS", default_value_t = 30)]
    pub polling_interval_secs: u64,

    /// Seconds between bulker passes while evacuating.
    #[arg(
        long = "evacuation-polling-interval",
        value_name = "SECONDS",
        default_value_t = 10
    )]
    pub evacuation_polling_interval_secs: u64,

    /// Seconds an evacuation may take before the process gives up and exits.
    #[arg(long = "evacuation-timeout", value_name = "SECONDS", default_value_t = 600)]
    pub evacuation_timeout_secs: u64,

    /// Request timeout for BBS and executor calls, in seconds.
    #[arg(long = "communication-timeout", value_name = "SECONDS", default_value_t = 10)]
    pub communication_timeout_secs: u64,

    /// TTL of the presence lease, in seconds.
    #[arg(long = "lock-ttl", value_name = "SECONDS", default_value_t = 15)]
    pub lock_ttl_secs: u64,

    /// Seconds between presence acquisition retries.
    #[arg(long = "lock-retry-interval", value_name = "SECONDS", default_value_t = 5)]
    pub lock_retry_interval_secs: u64,

    /// Preloaded root filesystem as `stack:path`. Repeatable.
    #[arg(long = "preloaded-rootfs", value_name = "STACK:PATH")]
    pub preloaded_rootfs: Vec<String>,

    /// Additional root filesystem provider scheme. Repeatable.
    #[arg(long = "rootfs-provider", value_name = "SCHEME")]
    pub rootfs_providers: Vec<String>,

    /// CA certificate for mutual TLS toward the BBS and executor.
    #[arg(long = "ca-cert", env = "CORRAL_CA_CERT")]
    pub ca_cert: Option<PathBuf>,

    /// Client certificate for mutual TLS.
    #[arg(long = "client-cert", env = "CORRAL_CLIENT_CERT")]
    pub client_cert: Option<PathBuf>,

    /// Client key for mutual TLS.
    #[arg(long = "client-key", env = "CORRAL_CLIENT_KEY")]
    pub client_key: Option<PathBuf>,

    /// Pretty logs instead of JSON.
    #[arg(long = "debug", env = "CORRAL_DEBUG")]
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cell_id: String::new(),
            bbs_url: "http://127.0.0.1:8889".to_string(),
            coordination_cluster: "http://127.0.0.1:2379".to_string(),
            executor_url: "http://127.0.0.1:1700".to_string(),
            listen_addr: "0.0.0.0:1800".to_string(),
            lrp_host: None,
            zone: "z1".to_string(),
            polling_interval_secs: 30,
            evacuation_polling_interval_secs: 10,
            evacuation_timeout_secs: 600,
            communication_timeout_secs: 10,
            lock_ttl_secs: 15,
            lock_retry_interval_secs: 5,
            preloaded_rootfs: Vec::new(),
            rootfs_providers: Vec::new(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
            debug: false,
        }
    }
}

impl Config {
    /// Validates the configuration, returning the first hard error.
    pub fn validate(&self) -> Result<()> {
        if self.cell_id.trim().is_empty() {
            return Err(Error::invalid_config("cell-id must be specified"));
        }
        for (name, value) in [
            ("polling-interval", self.polling_interval_secs),
            (
                "evacuation-polling-interval",
                self.evacuation_polling_interval_secs,
            ),
            ("evacuation-timeout", self.evacuation_timeout_secs),
            ("communication-timeout", self.communication_timeout_secs),
            ("lock-ttl", self.lock_ttl_secs),
            ("lock-retry-interval", self.lock_retry_interval_secs),
        ] {
            if value == 0 {
                return Err(Error::invalid_config(format!("{name} must be positive")));
            }
        }
        self.preloaded_stacks()?;
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(Error::invalid_config(
                "client-cert and client-key must be provided together",
            ));
        }
        Ok(())
    }

    /// The cell identifier as a typed ID.
    #[must_use]
    pub fn cell_id(&self) -> CellId {
        CellId::new(self.cell_id.clone())
    }

    /// Parses the repeatable `stack:path` preloaded root filesystem flags.
    pub fn preloaded_stacks(&self) -> Result<BTreeMap<String, String>> {
        let mut stacks = BTreeMap::new();
        for entry in &self.preloaded_rootfs {
            let Some((stack, path)) = entry.split_once(':') else {
                return Err(Error::invalid_config(format!(
                    "preloaded-rootfs must be stack:path, got {entry:?}"
                )));
            };
            if stack.is_empty() || path.is_empty() {
                return Err(Error::invalid_config(format!(
                    "preloaded-rootfs must be stack:path, got {entry:?}"
                )));
            }
            stacks.insert(stack.to_string(), path.to_string());
        }
        Ok(stacks)
    }

    /// The root filesystems this cell advertises.
    pub fn root_fs_providers(&self) -> Result<RootFsProviders> {
        Ok(RootFsProviders {
            preloaded: self.preloaded_stacks()?.into_keys().collect(),
            providers: self.rootfs_providers.iter().cloned().collect(),
        })
    }

    /// Host address written into LRP net info.
    #[must_use]
    pub fn effective_lrp_host(&self) -> String {
        if let Some(host) = &self.lrp_host {
            return host.clone();
        }
        self.listen_addr
            .rsplit_once(':')
            .map_or_else(|| self.listen_addr.clone(), |(host, _)| host.to_string())
    }

    /// Seconds between bulker passes, as a duration.
    #[must_use]
    pub const fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    /// Seconds between bulker passes while evacuating, as a duration.
    #[must_use]
    pub const fn evacuation_polling_interval(&self) -> Duration {
        Duration::from_secs(self.evacuation_polling_interval_secs)
    }

    /// Evacuation deadline, as a duration.
    #[must_use]
    pub const fn evacuation_timeout(&self) -> Duration {
        Duration::from_secs(self.evacuation_timeout_secs)
    }

    /// Client request timeout, as a duration.
    #[must_use]
    pub const fn communication_timeout(&self) -> Duration {
        Duration::from_secs(self.communication_timeout_secs)
    }

    /// Presence lease TTL, as a duration.
    #[must_use]
    pub const fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    /// Presence acquisition retry pause, as a duration.
    #[must_use]
    pub const fn lock_retry_interval(&self) -> Duration {
        Duration::from_secs(self.lock_retry_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            cell_id: "cell-1".to_string(),
            preloaded_rootfs: vec!["base:/var/corral/rootfs/base".to_string()],
            ..Config::default()
        }
    }

    #[test]
    fn missing_cell_id_is_fatal() {
        let config = Config::default();
        let err = config.validate().expect_err("must fail");
        assert!(err.to_string().contains("cell-id"));
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().expect("valid");
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let mut config = valid_config();
        config.polling_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_preloaded_rootfs_is_rejected() {
        let mut config = valid_config();
        config.preloaded_rootfs = vec!["justastack".to_string()];
        assert!(config.validate().is_err());

        config.preloaded_rootfs = vec![":/no/stack".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn client_cert_requires_key() {
        let mut config = valid_config();
        config.client_cert = Some(PathBuf::from("/etc/corral/client.crt"));
        assert!(config.validate().is_err());
        config.client_key = Some(PathBuf::from("/etc/corral/client.key"));
        config.validate().expect("cert and key together");
    }

    #[test]
    fn providers_include_preloaded_stacks_and_schemes() {
        let mut config = valid_config();
        config.rootfs_providers = vec!["docker".to_string()];
        let providers = config.root_fs_providers().expect("providers");
        assert!(providers.supports("preloaded:base"));
        assert!(providers.supports("docker:///nginx"));
        assert!(!providers.supports("preloaded:exotic"));
    }

    #[test]
    fn lrp_host_falls_back_to_listen_host() {
        let mut config = valid_config();
        config.listen_addr = "10.0.0.7:1800".to_string();
        assert_eq!(config.effective_lrp_host(), "10.0.0.7");
        config.lrp_host = Some("lrp.example.internal".to_string());
        assert_eq!(config.effective_lrp_host(), "lrp.example.internal");
    }

    #[test]
    fn flags_parse_with_env_style_defaults() {
        let config = Config::parse_from([
            "corral-cell",
            "--cell-id",
            "cell-9",
            "--preloaded-rootfs",
            "base:/rootfs/base",
            "--rootfs-provider",
            "docker",
            "--polling-interval",
            "5",
        ]);
        assert_eq!(config.cell_id, "cell-9");
        assert_eq!(config.polling_interval(), Duration::from_secs(5));
        assert_eq!(config.evacuation_polling_interval(), Duration::from_secs(10));
    }
}
