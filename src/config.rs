//! Configuration types for nb-dns.
//!
//! One flat [`Config`] is resolved at startup (TOML file overlaid by
//! `NBDNS_*` environment variables) and handed to each component as one of
//! its derived views.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::DnsError;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "NBDNS";

/// Default DNS port used when `forward_to` carries no port.
const DEFAULT_FORWARD_PORT: u16 = 53;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Domains served from the records store.
    #[serde(default)]
    pub domains: Vec<String>,

    /// Upstream resolver (`ip` or `ip:port`); empty disables forwarding.
    #[serde(default = "default_forward_to")]
    pub forward_to: String,

    /// Address the DNS engine and the API bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// DNS engine port (UDP and TCP).
    #[serde(default = "default_dns_port")]
    pub dns_port: u16,

    /// Management API port.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between reloads of the records file in the DNS engine.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Records snapshot path.
    #[serde(default = "default_records_file")]
    pub records_file: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Mesh setup key. Without one the mesh daemon is not started.
    #[serde(default)]
    pub setup_key: Option<String>,

    /// Mesh management URL.
    #[serde(default = "default_management_url")]
    pub management_url: String,

    /// Hostname the mesh peer registers with.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Extra DNS labels for the mesh peer.
    #[serde(default = "default_dns_labels")]
    pub dns_labels: Vec<String>,

    /// Mesh daemon executable.
    #[serde(default = "default_mesh_command")]
    pub mesh_command: String,

    /// DNS engine executable; defaults to the running binary.
    #[serde(default)]
    pub dns_engine_command: Option<PathBuf>,

    /// Seconds the mesh daemon must stay up before the DNS engine starts.
    #[serde(default = "default_mesh_settle_secs")]
    pub mesh_settle_secs: u64,

    /// Cooperative shutdown deadline in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Shutdown polling interval in milliseconds.
    #[serde(default = "default_shutdown_poll_ms")]
    pub shutdown_poll_ms: u64,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

fn default_forward_to() -> String {
    "8.8.8.8".to_string()
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_dns_port() -> u16 {
    5053
}

fn default_api_port() -> u16 {
    8080
}

fn default_refresh_interval() -> u64 {
    15
}

fn default_records_file() -> PathBuf {
    PathBuf::from("/etc/nb-dns/records/records.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_management_url() -> String {
    "https://api.netbird.io".to_string()
}

fn default_hostname() -> String {
    "nb-dns".to_string()
}

fn default_dns_labels() -> Vec<String> {
    vec!["nb-dns".to_string()]
}

fn default_mesh_command() -> String {
    "netbird".to_string()
}

fn default_mesh_settle_secs() -> u64 {
    5
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_shutdown_poll_ms() -> u64 {
    500
}

/// DNS engine configuration.
#[derive(Debug, Clone)]
pub struct DnsConfig {
    /// Address for the DNS engine to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Domains answered from the records store.
    pub domains: Vec<String>,

    /// Upstream resolver for declined queries.
    pub forward_to: Option<SocketAddr>,

    /// Records snapshot path.
    pub records_file: PathBuf,

    /// Interval between store reloads.
    pub refresh_interval: Duration,
}

/// Mesh daemon configuration, present only when a setup key is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshConfig {
    /// Mesh daemon executable.
    pub command: String,
    /// Setup key.
    pub setup_key: String,
    /// Management URL.
    pub management_url: String,
    /// Peer hostname.
    pub hostname: String,
    /// Log level passed to the daemon.
    pub log_level: String,
    /// Extra DNS labels.
    pub dns_labels: Vec<String>,
    /// How long the daemon must stay up before continuing.
    pub settle: Duration,
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "nb_dns=debug,warn").
    pub log_level: String,

    /// Prometheus metrics exporter address.
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

/// Two-phase shutdown timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    /// Deadline for cooperative termination.
    pub grace: Duration,
    /// Interval between liveness checks while waiting.
    pub poll_interval: Duration,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(default_shutdown_grace_ms()),
            poll_interval: Duration::from_millis(default_shutdown_poll_ms()),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, DnsError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("domains")
                    .with_list_parse_key("dns_labels"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DnsError::Config(e.to_string()))?;

        Ok(config.normalized())
    }

    /// Trim list entries and drop blanks; treat an empty setup key as unset.
    fn normalized(mut self) -> Self {
        self.domains = clean_list(self.domains);
        self.dns_labels = clean_list(self.dns_labels);
        self.forward_to = self.forward_to.trim().to_string();
        self.setup_key = self
            .setup_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        self
    }

    /// Check the configuration for values the service cannot run with.
    pub fn validate(&self) -> Result<(), DnsError> {
        if self.domains.is_empty() {
            return Err(DnsError::Config("at least one domain is required".into()));
        }
        if self.refresh_interval == 0 {
            return Err(DnsError::Config("refresh_interval must be positive".into()));
        }
        if self.dns_port == 0 || self.api_port == 0 {
            return Err(DnsError::Config("ports must be non-zero".into()));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(DnsError::Config(format!(
                "unknown log level {:?}, expected one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        if self.shutdown_grace_ms == 0 || self.shutdown_poll_ms == 0 {
            return Err(DnsError::Config(
                "shutdown grace and poll intervals must be positive".into(),
            ));
        }
        parse_forward_to(&self.forward_to)?;
        Ok(())
    }

    /// DNS engine view.
    pub fn dns(&self) -> Result<DnsConfig, DnsError> {
        Ok(DnsConfig {
            listen_addr: SocketAddr::new(self.bind_address, self.dns_port),
            domains: self.domains.clone(),
            forward_to: parse_forward_to(&self.forward_to)?,
            records_file: self.records_file.clone(),
            refresh_interval: Duration::from_secs(self.refresh_interval),
        })
    }

    /// Mesh daemon view, `None` without a setup key.
    pub fn mesh(&self) -> Option<MeshConfig> {
        let setup_key = self.setup_key.clone()?;
        Some(MeshConfig {
            command: self.mesh_command.clone(),
            setup_key,
            management_url: self.management_url.clone(),
            hostname: self.hostname.clone(),
            log_level: self.log_level.clone(),
            dns_labels: self.dns_labels.clone(),
            settle: Duration::from_secs(self.mesh_settle_secs),
        })
    }

    /// Telemetry view.
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level.clone(),
            prometheus_addr: self.prometheus_addr,
        }
    }

    /// Shutdown timing view.
    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        ShutdownPolicy {
            grace: Duration::from_millis(self.shutdown_grace_ms),
            poll_interval: Duration::from_millis(self.shutdown_poll_ms),
        }
    }

    /// Management API listen address.
    pub fn api_listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.api_port)
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Parse `ip` or `ip:port`; an empty string means no forwarder.
fn parse_forward_to(value: &str) -> Result<Option<SocketAddr>, DnsError> {
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(Some(addr));
    }
    value
        .parse::<IpAddr>()
        .map(|ip| Some(SocketAddr::new(ip, DEFAULT_FORWARD_PORT)))
        .map_err(|_| DnsError::InvalidAddress(value.to_string()))
}
