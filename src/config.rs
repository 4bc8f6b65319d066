use crate::{MemqError, Result};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7000;
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Broker startup parameters.
///
/// The replay cache capacity is a process-wide setting applied per topic:
/// every topic retains at most `cache_capacity` messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub cache_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl BrokerConfig {
    /// Load configuration from `MEMQ_`-prefixed environment variables,
    /// falling back to the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let settings = Config::builder()
            .set_default("host", defaults.host)
            .and_then(|builder| builder.set_default("port", defaults.port as i64))
            .and_then(|builder| {
                builder.set_default("cache_capacity", defaults.cache_capacity as i64)
            })
            .map(|builder| builder.add_source(Environment::with_prefix("MEMQ")))
            .and_then(|builder| builder.build())
            .map_err(|e| MemqError::Config(e.to_string()))?;

        settings
            .try_deserialize::<Self>()
            .map_err(|e| MemqError::Config(e.to_string()))
    }

    /// The `host:port` string the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
