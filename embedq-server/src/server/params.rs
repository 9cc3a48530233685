use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use crate::config::BrokerConfig;

#[derive(Parser, Debug)]
#[command(name = "embedq-server", version, about = "Host process for the embedded embedq broker")]
pub struct Params {
    /// TOML file with broker settings; flags below override it.
    #[arg(long, env = "EMBEDQ_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "EMBEDQ_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "EMBEDQ_PORT")]
    pub port: Option<u16>,

    /// e.g. `10s`, `500ms`
    #[arg(long, env = "EMBEDQ_READY_TIMEOUT", value_parser = humantime::parse_duration)]
    pub ready_timeout: Option<Duration>,

    #[arg(long, env = "EMBEDQ_LOG_LEVEL", default_value_t = tracing::Level::INFO)]
    pub log_level: tracing::Level,
}

impl Params {
    pub fn broker_config(&self) -> Result<BrokerConfig> {
        let mut cfg = BrokerConfig::load_or_default(self.config.as_ref())?;
        if let Some(host) = &self.host {
            cfg.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(timeout) = self.ready_timeout {
            cfg.ready_timeout = timeout;
        }
        Ok(cfg)
    }
}
