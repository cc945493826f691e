//! Engine-wide configuration (§2a, §3 "EngineConfig"), following the
//! validated-config pattern of the teacher's `ServerConfig`.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Process-wide tunables for the engine. Per-query behavior (timeout,
/// traversal safety caps) reads from this struct; it carries no graph data
/// itself.
#[derive(Clone, Debug, Validate, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Safety cap on variable-length traversal hops (§4.7); queries
    /// requesting a higher `*min..max` than this are rejected rather than
    /// silently truncated.
    #[validate(range(min = 1, max = 10_000, message = "max_hops must be between 1 and 10000"))]
    pub max_hops: u32,

    /// Per-query deadline (§5). Partial results are discarded on timeout.
    #[serde(with = "duration_secs")]
    pub query_timeout: Duration,

    /// Optional cap on materialized result rows; `None` means unlimited.
    pub max_rows: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_hops: 64,
            query_timeout: Duration::from_secs(30),
            max_rows: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            max_hops: parse_env_var("FLOWQUERY_MAX_HOPS", "64")?,
            query_timeout: Duration::from_secs(parse_env_var(
                "FLOWQUERY_QUERY_TIMEOUT_SECS",
                "30",
            )?),
            max_rows: match env::var("FLOWQUERY_MAX_ROWS") {
                Ok(v) => Some(v.parse().map_err(|e| ConfigError::Parse {
                    field: "FLOWQUERY_MAX_ROWS".to_string(),
                    value: v,
                    source: Box::new(e),
                })?),
                Err(_) => None,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_env_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_max_hops_is_invalid() {
        let mut cfg = EngineConfig::default();
        cfg.max_hops = 0;
        assert!(cfg.validate().is_err());
    }
}
