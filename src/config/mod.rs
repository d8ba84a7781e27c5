//! Service configuration.
//!
//! All knobs have serde defaults so a bare `Config::default()` is runnable;
//! [`Config::from_env`] applies the documented environment variables on top.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default upstream user agent, matching what IPTV providers expect from a
/// desktop player.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128 Safari/537.36";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// M3U playlist source: an HTTP(S) URL or a local file path.
    #[serde(default)]
    pub source: Option<String>,

    /// Channels whose display name equals this are dropped on parse, so the
    /// service never offers its own output as an input.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncoderConfig {
    /// `auto`, `cpu`, or a profile name from the static table.
    #[serde(default = "default_preference")]
    pub preference: String,

    /// ffmpeg binary to invoke.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Seconds with zero viewers before the watchdog tears the encoder down.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Cumulative output bytes per child before the watchdog recycles it.
    #[serde(default = "default_max_stream_size")]
    pub max_stream_size: u64,

    /// Hard deadline for a cold start to deliver its first chunk.
    #[serde(default = "default_startup_deadline")]
    pub startup_deadline_secs: u64,

    /// User agent presented to upstream stream sources.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Extra request headers for upstream sources, `\n`-separated.
    #[serde(default)]
    pub source_headers: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_service_name() -> String {
    "Multiview".to_string()
}
fn default_preference() -> String {
    "auto".to_string()
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_idle_timeout() -> u64 {
    60
}
fn default_max_stream_size() -> u64 {
    500 * 1024 * 1024
}
fn default_startup_deadline() -> u64 {
    30
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            source: None,
            service_name: default_service_name(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            preference: default_preference(),
            ffmpeg: default_ffmpeg(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            max_stream_size: default_max_stream_size(),
            startup_deadline_secs: default_startup_deadline(),
            user_agent: default_user_agent(),
            source_headers: None,
        }
    }
}

impl Config {
    /// Build a config from defaults plus the process environment.
    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Apply recognized variables from `vars` over the defaults.
    ///
    /// Unparseable numeric values are ignored with a warning rather than
    /// aborting startup.
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let mut config = Config::default();

        if let Some(v) = non_empty(vars, "HOST") {
            config.server.host = v;
        }
        if let Some(v) = non_empty(vars, "PORT") {
            match v.parse() {
                Ok(port) => config.server.port = port,
                Err(_) => tracing::warn!(value = %v, "Ignoring unparseable PORT"),
            }
        }
        if let Some(v) = non_empty(vars, "M3U_SOURCE") {
            config.catalog.source = Some(v);
        }
        if let Some(v) = non_empty(vars, "ENCODER_PREFERENCE") {
            config.encoder.preference = v;
        }
        if let Some(v) = non_empty(vars, "IDLE_TIMEOUT") {
            match v.parse() {
                Ok(secs) => config.stream.idle_timeout_secs = secs,
                Err(_) => tracing::warn!(value = %v, "Ignoring unparseable IDLE_TIMEOUT"),
            }
        }
        if let Some(v) = non_empty(vars, "MAX_STREAM_SIZE") {
            match v.parse() {
                Ok(bytes) => config.stream.max_stream_size = bytes,
                Err(_) => tracing::warn!(value = %v, "Ignoring unparseable MAX_STREAM_SIZE"),
            }
        }
        if let Some(v) = non_empty(vars, "DEFAULT_UA") {
            config.stream.user_agent = v;
        }
        if let Some(v) = non_empty(vars, "SOURCE_HEADERS") {
            config.stream.source_headers = Some(v);
        }

        config
    }
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
