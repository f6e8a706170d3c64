//! Configuration Vault – reads/writes `~/.mocap-bridge/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use mocap_runtime::DriverConfig;
use mocap_runtime::driver::{
    DEFAULT_OUTPUT_CHANNEL, DEFAULT_PASSWORD, DEFAULT_SERVER_ADDRESS, DEFAULT_TARGET_BODY,
};
use mocap_types::BridgeError;
use tracing::warn;

/// Where pose samples go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublisherKind {
    /// In-process bus; samples are only logged.
    Bus,
    /// ROS topic through a `rosbridge_server` WebSocket.
    #[default]
    Rosbridge,
    /// JSON datagrams to a fixed UDP peer.
    Udp,
}

impl std::fmt::Display for PublisherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublisherKind::Bus => write!(f, "bus"),
            PublisherKind::Rosbridge => write!(f, "rosbridge"),
            PublisherKind::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for PublisherKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bus" => Ok(PublisherKind::Bus),
            "rosbridge" => Ok(PublisherKind::Rosbridge),
            "udp" => Ok(PublisherKind::Udp),
            other => Err(BridgeError::Config(format!(
                "unknown publisher '{other}' (expected bus, rosbridge or udp)"
            ))),
        }
    }
}

/// Persisted bridge configuration stored in `~/.mocap-bridge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// QTM real-time server, `host` or `host:port`.
    #[serde(default = "default_server_address")]
    pub server_address: String,

    /// Rigid body whose pose is bridged.
    #[serde(default = "default_target_body_name")]
    pub target_body_name: String,

    /// Topic / channel the pose is published on.
    #[serde(default = "default_output_channel")]
    pub output_channel: String,

    /// QTM control password (stored as plain text – the file is written
    /// owner-only).
    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default)]
    pub publisher: PublisherKind,

    /// `rosbridge_server` WebSocket URL.
    #[serde(default = "default_rosbridge_url")]
    pub rosbridge_url: String,

    /// `header.frame_id` of published ROS messages.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub frame_id: String,

    #[serde(default = "default_udp_host")]
    pub udp_host: String,

    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    /// Measurement file QTM replays in real time instead of streaming live
    /// data, e.g. `Demo.qtm`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_file: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server_address", &self.server_address)
            .field("target_body_name", &self.target_body_name)
            .field("output_channel", &self.output_channel)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("publisher", &self.publisher)
            .field("rosbridge_url", &self.rosbridge_url)
            .field("frame_id", &self.frame_id)
            .field("udp_host", &self.udp_host)
            .field("udp_port", &self.udp_port)
            .field("playback_file", &self.playback_file)
            .finish()
    }
}

fn default_server_address() -> String {
    DEFAULT_SERVER_ADDRESS.to_string()
}
fn default_target_body_name() -> String {
    DEFAULT_TARGET_BODY.to_string()
}
fn default_output_channel() -> String {
    DEFAULT_OUTPUT_CHANNEL.to_string()
}
fn default_password() -> String {
    DEFAULT_PASSWORD.to_string()
}
fn default_rosbridge_url() -> String {
    "ws://localhost:9090".to_string()
}
fn default_udp_host() -> String {
    "127.0.0.1".to_string()
}
fn default_udp_port() -> u16 {
    9870
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            target_body_name: default_target_body_name(),
            output_channel: default_output_channel(),
            password: default_password(),
            publisher: PublisherKind::default(),
            rosbridge_url: default_rosbridge_url(),
            frame_id: String::new(),
            udp_host: default_udp_host(),
            udp_port: default_udp_port(),
            playback_file: None,
        }
    }
}

impl Config {
    /// Session parameters for the streaming driver.
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            server_address: self.server_address.clone(),
            target_body_name: self.target_body_name.clone(),
            output_channel: self.output_channel.clone(),
            password: self.password.clone(),
            playback_file: self.playback_file.clone(),
        }
    }
}

/// Return the path to `~/.mocap-bridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mocap-bridge").join("config.toml")
}

/// Load the config at `path`, falling back to defaults when the file does
/// not exist, then apply `MOCAP_*` environment overrides.
pub fn load_or_default(path: &Path) -> Result<Config, BridgeError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse config: {e}")))?;
    Ok(Some(cfg))
}

/// Apply `MOCAP_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MOCAP_SERVER_ADDRESS` | `server_address` |
/// | `MOCAP_TARGET_BODY` | `target_body_name` |
/// | `MOCAP_OUTPUT_CHANNEL` | `output_channel` |
/// | `MOCAP_PASSWORD` | `password` |
/// | `MOCAP_PUBLISHER` | `publisher` |
/// | `MOCAP_ROSBRIDGE_URL` | `rosbridge_url` |
/// | `MOCAP_UDP_HOST` | `udp_host` |
/// | `MOCAP_UDP_PORT` | `udp_port` |
/// | `MOCAP_PLAYBACK_FILE` | `playback_file` (empty clears it) |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |name| std::env::var(name).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("MOCAP_SERVER_ADDRESS") {
        cfg.server_address = v;
    }
    if let Some(v) = lookup("MOCAP_TARGET_BODY") {
        cfg.target_body_name = v;
    }
    if let Some(v) = lookup("MOCAP_OUTPUT_CHANNEL") {
        cfg.output_channel = v;
    }
    if let Some(v) = lookup("MOCAP_PASSWORD") {
        cfg.password = v;
    }
    if let Some(v) = lookup("MOCAP_PUBLISHER") {
        match v.parse() {
            Ok(kind) => cfg.publisher = kind,
            Err(e) => warn!(error = %e, "ignoring MOCAP_PUBLISHER"),
        }
    }
    if let Some(v) = lookup("MOCAP_ROSBRIDGE_URL") {
        cfg.rosbridge_url = v;
    }
    if let Some(v) = lookup("MOCAP_UDP_HOST") {
        cfg.udp_host = v;
    }
    if let Some(v) = lookup("MOCAP_UDP_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.udp_port = port;
    }
    if let Some(v) = lookup("MOCAP_PLAYBACK_FILE") {
        cfg.playback_file = Some(v).filter(|file| !file.is_empty());
    }
}

/// Save the config to `path`, creating its directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            BridgeError::Config(format!("failed to create config directory: {e}"))
        })?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                BridgeError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| BridgeError::Config(format!("failed to serialize config: {e}")))?;
    let write_err = |e: std::io::Error| {
        BridgeError::Config(format!("failed to write config at {}: {e}", path.display()))
    };
    // Owner read/write only (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
