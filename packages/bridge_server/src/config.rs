use std::path::{Path, PathBuf};
use std::time::Duration;

use host_bridge::{MAX_RETRY_DELAY, RetryPolicy};
use serde::{Deserialize, Serialize};

// =============================================================================
// File config (figment-deserialized from defaults / bridge.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   bridge.toml:     [calls]
//                    timeout_secs = 10
//
//   env var:         BRIDGE_CALLS__TIMEOUT_SECS=10   (double underscore = nesting)
//
//   (single underscore stays within field names: BRIDGE_SERVER__HEARTBEAT_INTERVAL_SECS)

pub const CONFIG_FILE_NAME: &str = "bridge.toml";
pub const DEFAULT_PORT: u16 = 30000;
pub const MAX_CALL_TIMEOUT_SECS: u64 = 3600;
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// Named configuration presets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// host=127.0.0.1 (host application on the same machine)
    Local,
    /// host=0.0.0.0 (host application elsewhere on the network)
    Lan,
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub calls: CallsFileConfig,
}

/// Listener and channel knobs (lives under `[server]` in bridge.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Seconds between one-way pings to every client (0 = disabled).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

/// Correlated call knobs (lives under `[calls]` in bridge.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallsFileConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
}

impl Default for CallsFileConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
        }
    }
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_send_queue_capacity() -> usize {
    100
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_retry_initial_delay_ms() -> u64 {
    500
}
fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

/// Default location of bridge.toml: `<config dir>/host-bridge`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("host-bridge")
}

/// Build a figment that layers: defaults → profile defaults → bridge.toml → BRIDGE_* env vars.
///
/// The CLI profile takes priority over the config file profile.
pub fn load_config(config_dir: &Path, cli_profile: Option<&Profile>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    // Pass 1: peek at profile from bridge.toml/env (CLI overrides file)
    let base = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join(CONFIG_FILE_NAME)))
        .merge(Env::prefixed("BRIDGE_").split("__"));

    let profile: Option<Profile> = cli_profile
        .cloned()
        .or_else(|| base.extract_inner("profile").ok());

    // Pass 2: rebuild with profile defaults between struct defaults and bridge.toml
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Serialized::defaults(profile_to_file_config(profile.as_ref())))
        .merge(Toml::file(config_dir.join(CONFIG_FILE_NAME)))
        .merge(Env::prefixed("BRIDGE_").split("__"))
}

fn profile_to_file_config(profile: Option<&Profile>) -> FileConfig {
    let host = match profile {
        Some(Profile::Local) => "127.0.0.1",
        Some(Profile::Lan) => "0.0.0.0",
        None => return FileConfig::default(),
    };
    FileConfig {
        profile: profile.cloned(),
        server: ServerFileConfig {
            host: Some(host.to_string()),
            ..Default::default()
        },
        calls: Default::default(),
    }
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `None` disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
    pub send_queue_capacity: usize,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            host: fc.host.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
            port: fc.port.unwrap_or(DEFAULT_PORT),
            heartbeat_interval: match fc.heartbeat_interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            send_queue_capacity: fc.send_queue_capacity.max(1),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CallConfig {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl CallConfig {
    /// Out-of-range values are clamped: the timeout to [1s, 1h], attempts to at
    /// least one, and the multiplier to [1.0, 10.0] (non-finite means 2.0).
    pub fn from_file(fc: &CallsFileConfig) -> Self {
        let multiplier = if fc.retry_backoff_multiplier.is_finite() {
            fc.retry_backoff_multiplier.clamp(1.0, MAX_BACKOFF_MULTIPLIER)
        } else {
            default_retry_backoff_multiplier()
        };
        Self {
            timeout: Duration::from_secs(fc.timeout_secs.clamp(1, MAX_CALL_TIMEOUT_SECS)),
            retry: RetryPolicy::new(
                fc.retry_max_attempts.max(1),
                Duration::from_millis(fc.retry_initial_delay_ms).min(MAX_RETRY_DELAY),
                multiplier,
            ),
        }
    }
}
