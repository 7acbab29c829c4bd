//! Node Configuration
//!
//! Settings are layered, later layers winning:
//! 1. built-in defaults
//! 2. a YAML file (`--config <path>`, or `./config.yaml` when present)
//! 3. `FLOCK_*` environment variables
//! 4. command-line flags (applied by the binary)

use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use strum::{Display, EnumString};
use thiserror::Error;

/// File picked up from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

const ENV_PREFIX: &str = "FLOCK_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Mode a node is started in by the `run` subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StartMode {
    /// Start the control plane and adopt pending nodes
    Controller,
    /// Advertise as pending and wait to be adopted
    Agent,
}

/// Complete node configuration with defaults
#[derive(Debug, Clone)]
pub struct FlockConfig {
    /// Node identifier; the hostname when unset (env: FLOCK_NODE_ID)
    pub node_id: Option<String>,
    /// Preferred adoption port; the next free port above it is used when taken
    pub default_port: u16,
    pub mode: StartMode,
    /// Skip host prerequisite checks
    pub no_verify: bool,

    // Control plane
    /// k3s binary name or path
    pub k3s_path: String,
    /// Port of the k3s API server on the controller
    pub control_plane_port: u16,
    /// Deadline for the local control plane to become active
    pub control_plane_timeout: Duration,
    /// Validity window of minted join tokens
    pub token_ttl: Duration,
    /// Description attached to minted join tokens
    pub token_purpose: String,

    // Discovery
    /// Interval between re-announcements of an advertised record
    pub announce_interval: Duration,
    /// How long a browser keeps a record without hearing from it
    pub record_ttl: Duration,

    // Adoption
    /// Minimum gap between two adoption attempts for the same node
    pub adoption_cooldown: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Silence after which an inbound adoption connection is closed
    pub connection_idle_timeout: Duration,
    /// Address handed to adopted nodes; resolved from the routing table when unset
    pub advertise_ip: Option<IpAddr>,
    /// Pre-shared secret required on adoption requests
    pub bootstrap_secret: Option<String>,

    // Heartbeats to adopted nodes
    pub heartbeat_interval: Duration,
    /// Failures before heartbeats to a node are backed off
    pub failure_threshold: u32,
    /// Consecutive failures before a node is marked failed
    pub max_failures: u32,
    pub backoff_base: u64,
    pub max_backoff_power: u32,

    // Surfaces
    /// Status/metrics HTTP listener; None disables it
    pub status_addr: Option<SocketAddr>,
    /// "text" or "json"
    pub log_format: String,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            default_port: flock_core::DEFAULT_PORT,
            mode: StartMode::Agent,
            no_verify: false,

            k3s_path: "k3s".to_string(),
            control_plane_port: flock_core::CONTROL_PLANE_PORT,
            control_plane_timeout: Duration::from_secs(30),
            token_ttl: Duration::from_secs(60),
            token_purpose: "compute-flock-node".to_string(),

            announce_interval: Duration::from_secs(5),
            record_ttl: Duration::from_secs(15),

            adoption_cooldown: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            connection_idle_timeout: Duration::from_secs(60),
            advertise_ip: None,
            bootstrap_secret: None,

            heartbeat_interval: Duration::from_secs(30),
            failure_threshold: 3,
            max_failures: 10,
            backoff_base: 2,
            max_backoff_power: 6,

            status_addr: Some(SocketAddr::from(([0, 0, 0, 0], 9180))),
            log_format: "text".to_string(),
        }
    }
}

/// On-disk representation; every field is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    node_id: Option<String>,
    default_port: Option<u16>,
    mode: Option<StartMode>,
    no_verify: Option<bool>,
    k3s_path: Option<String>,
    control_plane_port: Option<u16>,
    control_plane_timeout_secs: Option<u64>,
    token_ttl_secs: Option<u64>,
    token_purpose: Option<String>,
    announce_interval_secs: Option<u64>,
    record_ttl_secs: Option<u64>,
    adoption_cooldown_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    connection_idle_timeout_secs: Option<u64>,
    advertise_ip: Option<IpAddr>,
    bootstrap_secret: Option<String>,
    heartbeat_interval_secs: Option<u64>,
    failure_threshold: Option<u32>,
    max_failures: Option<u32>,
    backoff_base: Option<u64>,
    max_backoff_power: Option<u32>,
    status_addr: Option<String>,
    log_format: Option<String>,
}

impl FlockConfig {
    /// Load defaults, the config file and the process environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                fallback.exists().then_some(fallback)
            }
        };
        if let Some(path) = path {
            config.apply_file(&path)?;
        }

        let env: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        config.apply_env(|key| env.get(key).cloned())?;

        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        self.apply_file_values(file)
    }

    fn apply_file_values(&mut self, file: ConfigFile) -> Result<(), ConfigError> {
        let secs = Duration::from_secs;

        if let Some(v) = file.node_id {
            self.node_id = Some(v);
        }
        if let Some(v) = file.default_port {
            self.default_port = v;
        }
        if let Some(v) = file.mode {
            self.mode = v;
        }
        if let Some(v) = file.no_verify {
            self.no_verify = v;
        }
        if let Some(v) = file.k3s_path {
            self.k3s_path = v;
        }
        if let Some(v) = file.control_plane_port {
            self.control_plane_port = v;
        }
        if let Some(v) = file.control_plane_timeout_secs {
            self.control_plane_timeout = secs(v);
        }
        if let Some(v) = file.token_ttl_secs {
            self.token_ttl = secs(v);
        }
        if let Some(v) = file.token_purpose {
            self.token_purpose = v;
        }
        if let Some(v) = file.announce_interval_secs {
            self.announce_interval = secs(v);
        }
        if let Some(v) = file.record_ttl_secs {
            self.record_ttl = secs(v);
        }
        if let Some(v) = file.adoption_cooldown_secs {
            self.adoption_cooldown = secs(v);
        }
        if let Some(v) = file.connect_timeout_secs {
            self.connect_timeout = secs(v);
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout = secs(v);
        }
        if let Some(v) = file.connection_idle_timeout_secs {
            self.connection_idle_timeout = secs(v);
        }
        if let Some(v) = file.advertise_ip {
            self.advertise_ip = Some(v);
        }
        if let Some(v) = file.bootstrap_secret {
            self.bootstrap_secret = Some(v);
        }
        if let Some(v) = file.heartbeat_interval_secs {
            self.heartbeat_interval = secs(v);
        }
        if let Some(v) = file.failure_threshold {
            self.failure_threshold = v;
        }
        if let Some(v) = file.max_failures {
            self.max_failures = v;
        }
        if let Some(v) = file.backoff_base {
            self.backoff_base = v;
        }
        if let Some(v) = file.max_backoff_power {
            self.max_backoff_power = v;
        }
        if let Some(v) = file.status_addr {
            self.status_addr = parse_status_addr("status_addr", &v)?;
        }
        if let Some(v) = file.log_format {
            self.log_format = v;
        }
        Ok(())
    }

    /// Apply `FLOCK_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, v)) = get("NODE_ID") {
            self.node_id = Some(v);
        }
        if let Some(v) = parse_env(get("DEFAULT_PORT"))? {
            self.default_port = v;
        }
        if let Some(v) = parse_env(get("MODE"))? {
            self.mode = v;
        }
        if let Some(v) = parse_env(get("NO_VERIFY"))? {
            self.no_verify = v;
        }
        if let Some((_, v)) = get("K3S_PATH") {
            self.k3s_path = v;
        }
        if let Some(v) = parse_env(get("CONTROL_PLANE_PORT"))? {
            self.control_plane_port = v;
        }
        if let Some(v) = parse_env_secs(get("CONTROL_PLANE_TIMEOUT_SECS"))? {
            self.control_plane_timeout = v;
        }
        if let Some(v) = parse_env_secs(get("TOKEN_TTL_SECS"))? {
            self.token_ttl = v;
        }
        if let Some(v) = parse_env_secs(get("ANNOUNCE_INTERVAL_SECS"))? {
            self.announce_interval = v;
        }
        if let Some(v) = parse_env_secs(get("RECORD_TTL_SECS"))? {
            self.record_ttl = v;
        }
        if let Some(v) = parse_env_secs(get("ADOPTION_COOLDOWN_SECS"))? {
            self.adoption_cooldown = v;
        }
        if let Some(v) = parse_env_secs(get("CONNECT_TIMEOUT_SECS"))? {
            self.connect_timeout = v;
        }
        if let Some(v) = parse_env_secs(get("REQUEST_TIMEOUT_SECS"))? {
            self.request_timeout = v;
        }
        if let Some(v) = parse_env_secs(get("CONNECTION_IDLE_TIMEOUT_SECS"))? {
            self.connection_idle_timeout = v;
        }
        if let Some(v) = parse_env(get("ADVERTISE_IP"))? {
            self.advertise_ip = Some(v);
        }
        if let Some((_, v)) = get("BOOTSTRAP_SECRET") {
            self.bootstrap_secret = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = parse_env_secs(get("HEARTBEAT_INTERVAL_SECS"))? {
            self.heartbeat_interval = v;
        }
        if let Some(v) = parse_env(get("FAILURE_THRESHOLD"))? {
            self.failure_threshold = v;
        }
        if let Some(v) = parse_env(get("MAX_FAILURES"))? {
            self.max_failures = v;
        }
        if let Some(v) = parse_env(get("BACKOFF_BASE"))? {
            self.backoff_base = v;
        }
        if let Some(v) = parse_env(get("MAX_BACKOFF_POWER"))? {
            self.max_backoff_power = v;
        }
        if let Some((key, v)) = get("STATUS_ADDR") {
            self.status_addr = parse_status_addr(&key, &v)?;
        }
        if let Some((_, v)) = get("LOG_FORMAT") {
            self.log_format = v;
        }
        Ok(())
    }

    /// Reject settings the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_port == 0 {
            return Err(ConfigError::Invalid("default_port must be non-zero".into()));
        }
        if self.default_port > flock_core::MAX_PORT {
            return Err(ConfigError::Invalid(format!(
                "default_port must be at most {}",
                flock_core::MAX_PORT
            )));
        }
        let intervals = [
            ("announce_interval", self.announce_interval),
            ("record_ttl", self.record_ttl),
            ("token_ttl", self.token_ttl),
            ("connect_timeout", self.connect_timeout),
            ("request_timeout", self.request_timeout),
            ("connection_idle_timeout", self.connection_idle_timeout),
            ("control_plane_timeout", self.control_plane_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        if self.record_ttl <= self.announce_interval {
            return Err(ConfigError::Invalid(
                "record_ttl must be longer than announce_interval".into(),
            ));
        }
        if self.max_failures == 0 {
            return Err(ConfigError::Invalid("max_failures must be non-zero".into()));
        }
        if self.backoff_base == 0 {
            return Err(ConfigError::Invalid("backoff_base must be at least 1".into()));
        }
        if !matches!(self.log_format.to_ascii_lowercase().as_str(), "text" | "json") {
            return Err(ConfigError::Invalid(format!(
                "log_format must be text or json, got {:?}",
                self.log_format
            )));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(entry: Option<(String, String)>) -> Result<Option<T>, ConfigError> {
    match entry {
        None => Ok(None),
        Some((key, value)) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
    }
}

fn parse_env_secs(entry: Option<(String, String)>) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_env::<u64>(entry)?.map(Duration::from_secs))
}

fn parse_status_addr(key: &str, value: &str) -> Result<Option<SocketAddr>, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
        })
}
