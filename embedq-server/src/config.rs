use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};
use embedq_protocol::DEFAULT_MAX_PAYLOAD;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "0.0.0.0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot resolve listen address {host}:{port}")]
    UnresolvableHost { host: String, port: u16 },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("ready_poll_interval ({interval:?}) must be shorter than ready_timeout ({timeout:?})")]
    PollIntervalTooLong { interval: Duration, timeout: Duration },

    #[error("{0} is not supported by the embedded broker")]
    Unsupported(&'static str),
}

/// Everything the embedded broker and its lifecycle need, fixed at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Interface to listen on. Unspecified addresses listen everywhere.
    pub host: String,

    /// Client port. `0` lets the OS pick a free one.
    pub port: u16,

    /// Name advertised in the INFO handshake.
    pub server_name: String,

    /// Largest PUB payload a client may send.
    pub max_payload: usize,

    /// Upper bound on waiting for the broker to accept connections.
    #[serde(with = "duration_format")]
    pub ready_timeout: Duration,

    /// Gap between readiness checks while starting.
    #[serde(with = "duration_format")]
    pub ready_poll_interval: Duration,

    /// How long `stop` waits for the run loop before abandoning it.
    #[serde(with = "duration_format")]
    pub shutdown_timeout: Duration,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterConfig>,
}

/// Reserved; rejected by [`BrokerConfig::validate`] until the engine
/// learns to authenticate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

/// Reserved; rejected by [`BrokerConfig::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub name: Option<String>,
    pub port: u16,
    pub routes: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            server_name: "embedq".to_string(),
            max_payload: DEFAULT_MAX_PAYLOAD,
            ready_timeout: Duration::from_secs(10),
            ready_poll_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
            auth: None,
            cluster: None,
        }
    }
}

impl BrokerConfig {

    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => Self::read_from_file(p), // propagate errors unchanged
            None => Ok(Self::default()),
        }
    }

    fn read_from_file<P: AsRef<Path>>(path: P)->Result<Self>{
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading {:?}", path.as_ref()))?;
        let cfg: BrokerConfig = toml::from_str(&raw)
            .with_context(|| "parsing broker config TOML")?;
        Ok(cfg)
    }

    /// Resolves `host:port` to the socket address the broker binds.
    pub async fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConfigError::UnresolvableHost {
                host: self.host.clone(),
                port: self.port,
            })
    }

    /// Checks that need no I/O. The host is only resolved when the broker
    /// binds, see [`BrokerConfig::listen_addr`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::UnresolvableHost {
                host: self.host.clone(),
                port: self.port,
            });
        }
        if self.max_payload == 0 {
            return Err(ConfigError::Zero { field: "max_payload" });
        }
        if self.ready_poll_interval.is_zero() {
            return Err(ConfigError::Zero { field: "ready_poll_interval" });
        }
        if self.ready_poll_interval >= self.ready_timeout {
            return Err(ConfigError::PollIntervalTooLong {
                interval: self.ready_poll_interval,
                timeout: self.ready_timeout,
            });
        }
        if self.auth.is_some() {
            return Err(ConfigError::Unsupported("authentication"));
        }
        if self.cluster.is_some() {
            return Err(ConfigError::Unsupported("clustering"));
        }
        Ok(())
    }
}

/// Durations are written as humantime strings: `"10s"`, `"250ms"`.
mod duration_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
