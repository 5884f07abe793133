use crate::core::services::listener_registry::ListenerOptions;
use crate::utils::error::{RelayError, RelayResult};
use config::{Config as RawConfig, Environment, File, FileFormat};
use dotenv::dotenv;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder substituted with the broadcaster key in `source.endpoint`.
pub const BROADCASTER_PLACEHOLDER: &str = "{broadcaster}";

fn default_port() -> u16 {
    3000
}

fn default_host() -> Ipv4Addr {
    Ipv4Addr::new(127, 0, 0, 1)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_retry_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_unhealthy_after_failures() -> usize {
    3
}

fn default_recent_capacity() -> usize {
    20
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_endpoint() -> String {
    format!("ws://127.0.0.1:8080/live/{BROADCASTER_PLACEHOLDER}")
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_channel_capacity() -> usize {
    1024
}

fn human_readable_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let duration_str: String = Deserialize::deserialize(deserializer)?;
    humantime::parse_duration(&duration_str).map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: Ipv4Addr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Reconnect policy for listeners.
#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    #[serde(
        default = "default_retry_delay",
        deserialize_with = "human_readable_duration"
    )]
    pub retry_delay: Duration,
    #[serde(
        default = "default_max_retry_delay",
        deserialize_with = "human_readable_duration"
    )]
    pub max_retry_delay: Duration,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    /// Consecutive failed connection attempts before `/health` reports the listener.
    #[serde(default = "default_unhealthy_after_failures")]
    pub unhealthy_after_failures: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            retry_delay: default_retry_delay(),
            max_retry_delay: default_max_retry_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            unhealthy_after_failures: default_unhealthy_after_failures(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            recent_capacity: default_recent_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FanoutConfig {
    #[serde(
        default = "default_heartbeat_interval",
        deserialize_with = "human_readable_duration"
    )]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_true")]
    pub replay_on_connect: bool,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            replay_on_connect: true,
        }
    }
}

/// Where live events come from.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// WebSocket URL template; must contain `{broadcaster}`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(
        default = "default_connect_timeout",
        deserialize_with = "human_readable_duration"
    )]
    pub connect_timeout: Duration,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout: default_connect_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Loads the configuration from an optional TOML file, then `APP__*` environment variables.
    pub fn new(config_path: Option<PathBuf>) -> RelayResult<Self> {
        dotenv().ok();

        let mut builder = RawConfig::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder
            .build()
            .map_err(|e| RelayError::Config(e.to_string()))?;
        let cfg: Config = raw
            .try_deserialize()
            .map_err(|e| RelayError::Config(e.to_string()))?;

        Ok(cfg)
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.aggregation.recent_capacity == 0 {
            return Err(RelayError::Config(
                "aggregation.recent_capacity must be greater than 0".to_string(),
            ));
        }
        if self.fanout.heartbeat_interval.is_zero() {
            return Err(RelayError::Config(
                "fanout.heartbeat_interval must be greater than 0".to_string(),
            ));
        }
        if self.listener.retry_delay.is_zero() {
            return Err(RelayError::Config(
                "listener.retry_delay must be greater than 0".to_string(),
            ));
        }
        if self.listener.max_retry_delay < self.listener.retry_delay {
            return Err(RelayError::Config(
                "listener.max_retry_delay must not be shorter than listener.retry_delay"
                    .to_string(),
            ));
        }
        if self.listener.backoff_multiplier < 1.0 {
            return Err(RelayError::Config(
                "listener.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.listener.unhealthy_after_failures == 0 {
            return Err(RelayError::Config(
                "listener.unhealthy_after_failures must be greater than 0".to_string(),
            ));
        }
        if !self.source.endpoint.contains(BROADCASTER_PLACEHOLDER) {
            return Err(RelayError::Config(format!(
                "source.endpoint must contain {BROADCASTER_PLACEHOLDER}"
            )));
        }
        if self.source.channel_capacity == 0 || self.persistence.channel_capacity == 0 {
            return Err(RelayError::Config(
                "channel capacities must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The per-listener settings the registry applies to every broadcaster.
    pub fn listener_options(&self) -> ListenerOptions {
        ListenerOptions {
            recent_capacity: self.aggregation.recent_capacity,
            heartbeat_interval: self.fanout.heartbeat_interval,
            replay_on_connect: self.fanout.replay_on_connect,
            retry_delay: self.listener.retry_delay,
            max_retry_delay: self.listener.max_retry_delay,
            backoff_multiplier: self.listener.backoff_multiplier,
            jitter: self.listener.jitter,
            unhealthy_after_failures: self.listener.unhealthy_after_failures,
        }
    }
}
