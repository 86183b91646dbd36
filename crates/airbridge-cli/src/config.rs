//! Bridge configuration – `~/.airbridge/config.toml` plus `AIR_*` overrides.
//!
//! Values are read in this order, later sources winning:
//!
//! 1. built-in defaults
//! 2. the TOML file (optional)
//! 3. environment variables
//!
//! | Variable | Config field |
//! |---|---|
//! | `AIR_ROBOT_ID` | `robot_id` |
//! | `AIR_TENANT_UUID` | `tenant_uuid` |
//! | `AIR_TOKEN` | `token` |
//! | `AIR_ENABLE_CONTAINERS` | `enable_containers` |
//! | `AIR_ENABLE_VITALS` | `enable_vitals` |
//! | `AIR_CLOUD_URL` | `cloud.url` |
//! | `AIR_CLOUD_KEEP_ALIVE` | `cloud.keep_alive_secs` |
//! | `AIR_SCHEMA_PATH` | `middleware.schema_dirs` (`:`-separated) |
//! | `AIR_INVOCATION_TIMEOUT` | `middleware.invocation_timeout_secs` |
//! | `AIR_VITALS_PERIOD_MS` | `vitals.period_ms` |
//! | `AIR_CONTAINER_REGISTRY_URL` | `container_registry.url` |
//! | `AIR_CONTAINER_REGISTRY_USERNAME` | `container_registry.username` |
//! | `AIR_CONTAINER_REGISTRY_PASSWORD` | `container_registry.password` |

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{var} has an invalid value {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("ROBOT_ID, TENANT_UUID and TOKEN must be set (missing: {0})")]
    MissingCredentials(String),

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSection {
    /// Broker WebSocket endpoint.
    pub url: String,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for CloudSection {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9001".to_string(),
            keep_alive_secs: 60,
            reconnect_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareSection {
    /// Roots laid out as `<dir>/<pkg>/{msg,srv,action}/*`.
    pub schema_dirs: Vec<PathBuf>,
    pub invocation_timeout_secs: u64,
}

impl Default for MiddlewareSection {
    fn default() -> Self {
        Self {
            schema_dirs: Vec::new(),
            invocation_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalsSection {
    pub period_ms: u64,
}

impl Default for VitalsSection {
    fn default() -> Self {
        Self { period_ms: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainersSection {
    pub compose_path: PathBuf,
}

impl Default for ContainersSection {
    fn default() -> Self {
        Self {
            compose_path: airbridge_dir(&home_dir()).join("docker-compose.json"),
        }
    }
}

/// A credential wiped from memory when dropped and never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_empty() { "<not set>" } else { "<redacted>" })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub url: String,
    pub username: String,
    pub password: Secret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub robot_id: String,
    pub tenant_uuid: String,
    pub token: Secret,
    pub enable_containers: bool,
    pub enable_vitals: bool,
    pub cloud: CloudSection,
    pub middleware: MiddlewareSection,
    pub vitals: VitalsSection,
    pub containers: ContainersSection,
    pub container_registry: RegistrySection,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            robot_id: String::new(),
            tenant_uuid: String::new(),
            token: Secret::default(),
            enable_containers: true,
            enable_vitals: true,
            cloud: CloudSection::default(),
            middleware: MiddlewareSection::default(),
            vitals: VitalsSection::default(),
            containers: ContainersSection::default(),
            container_registry: RegistrySection::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Paths
// ─────────────────────────────────────────────────────────────────────────────

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn airbridge_dir(home: &str) -> PathBuf {
    PathBuf::from(home).join(".airbridge")
}

/// `~/.airbridge/config.toml`.
pub fn config_path() -> PathBuf {
    airbridge_dir(&home_dir()).join("config.toml")
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load the configuration from `path` (or the default location), apply the
/// process environment and check the credentials.
pub fn load(path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let mut cfg = load_file(&path)?;
    apply_env_overrides(&mut cfg, |var| std::env::var(var).ok())?;
    ensure_credentials(&cfg)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Read the TOML file; a missing file yields the defaults.
pub(crate) fn load_file(path: &Path) -> Result<BridgeConfig, ConfigError> {
    if !path.exists() {
        warn!(path = %path.display(), "no config file found, using defaults");
        return Ok(BridgeConfig::default());
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "parsed config file");
    Ok(cfg)
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.as_str() {
        "true" | "True" | "1" => Ok(true),
        "false" | "False" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { var, value }),
    }
}

fn parse_u64(var: &'static str, value: String) -> Result<u64, ConfigError> {
    match value.trim().parse() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidEnv { var, value }),
    }
}

/// Apply `AIR_*` overrides read through `lookup`.
pub(crate) fn apply_env_overrides<F>(cfg: &mut BridgeConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let string_vars: [(&str, &mut String); 5] = [
        ("AIR_ROBOT_ID", &mut cfg.robot_id),
        ("AIR_TENANT_UUID", &mut cfg.tenant_uuid),
        ("AIR_CLOUD_URL", &mut cfg.cloud.url),
        ("AIR_CONTAINER_REGISTRY_URL", &mut cfg.container_registry.url),
        ("AIR_CONTAINER_REGISTRY_USERNAME", &mut cfg.container_registry.username),
    ];
    for (var, field) in string_vars {
        if let Some(v) = lookup(var) {
            *field = v;
        }
    }
    if let Some(v) = lookup("AIR_TOKEN") {
        cfg.token = Secret::from(v);
    }
    if let Some(v) = lookup("AIR_CONTAINER_REGISTRY_PASSWORD") {
        cfg.container_registry.password = Secret::from(v);
    }

    if let Some(v) = lookup("AIR_ENABLE_CONTAINERS") {
        cfg.enable_containers = parse_bool("AIR_ENABLE_CONTAINERS", v)?;
    }
    if let Some(v) = lookup("AIR_ENABLE_VITALS") {
        cfg.enable_vitals = parse_bool("AIR_ENABLE_VITALS", v)?;
    }
    if let Some(v) = lookup("AIR_CLOUD_KEEP_ALIVE") {
        cfg.cloud.keep_alive_secs = parse_u64("AIR_CLOUD_KEEP_ALIVE", v)?;
    }
    if let Some(v) = lookup("AIR_INVOCATION_TIMEOUT") {
        cfg.middleware.invocation_timeout_secs = parse_u64("AIR_INVOCATION_TIMEOUT", v)?;
    }
    if let Some(v) = lookup("AIR_VITALS_PERIOD_MS") {
        cfg.vitals.period_ms = parse_u64("AIR_VITALS_PERIOD_MS", v)?;
    }
    if let Some(v) = lookup("AIR_SCHEMA_PATH") {
        cfg.middleware.schema_dirs = v
            .split(':')
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();
    }
    Ok(())
}

pub(crate) fn ensure_credentials(cfg: &BridgeConfig) -> Result<(), ConfigError> {
    let missing: Vec<&str> = [
        ("robot_id", cfg.robot_id.as_str()),
        ("tenant_uuid", cfg.tenant_uuid.as_str()),
        ("token", cfg.token.expose()),
    ]
    .into_iter()
    .filter(|(_, v)| v.is_empty())
    .map(|(k, _)| k)
    .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::MissingCredentials(missing.join(", ")))
    }
}

/// Reject durations of zero, whichever source they came from.
pub(crate) fn validate(cfg: &BridgeConfig) -> Result<(), ConfigError> {
    let durations = [
        ("cloud.keep_alive_secs", cfg.cloud.keep_alive_secs),
        ("cloud.reconnect_delay_secs", cfg.cloud.reconnect_delay_secs),
        ("middleware.invocation_timeout_secs", cfg.middleware.invocation_timeout_secs),
        ("vitals.period_ms", cfg.vitals.period_ms),
    ];
    match durations.into_iter().find(|(_, v)| *v == 0) {
        Some((field, _)) => Err(ConfigError::ZeroValue { field }),
        None => Ok(()),
    }
}
