use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid duration for `{field}`: {source}")]
    Duration {
        field: &'static str,
        source: humantime::DurationError,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Service configuration, layered from `config/steward.*` and
/// `STEWARD__`-prefixed environment variables.
#[derive(Debug, Clone)]
pub struct StewardConfig {
    pub supervisor: SupervisorConfig,
    pub state_path: String,
    pub secrets_dir: String,
    pub management: ManagementConfig,
    pub audit_interval: Duration,
    pub defer_backoff: DeferBackoff,
    pub operator: OperatorConfig,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    pub base_url: String,
    #[serde(default)]
    pub request_timeout: Option<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4000".to_string(),
            request_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagementConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8088,
        }
    }
}

/// Pacing for retrying a deferred reconciliation pass.
#[derive(Debug, Clone, Copy)]
pub struct DeferBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for DeferBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(30),
        }
    }
}

/// Operator-facing options controlling environment compilation.
#[derive(Debug, Clone, Default)]
pub struct OperatorConfig {
    pub encryption_keys_secret_id: Option<String>,
    pub oidc_secret_id: Option<String>,
    pub kafka_topic_prefix: Option<String>,
    pub opensearch_index_prefix: Option<String>,
    pub external_fe_hostname: Option<String>,
    pub use_play_cache_session_store: bool,
}

/// Egress proxy settings propagated into workload environments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub https_proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(default)]
    supervisor: SupervisorConfig,
    #[serde(default = "default_state_path")]
    state_path: String,
    #[serde(default = "default_secrets_dir")]
    secrets_dir: String,
    #[serde(default)]
    management: ManagementConfig,
    #[serde(default)]
    audit_interval: Option<String>,
    #[serde(default)]
    defer_backoff_base: Option<String>,
    #[serde(default)]
    defer_backoff_max: Option<String>,
    #[serde(default)]
    operator: RawOperatorConfig,
    #[serde(default)]
    proxy: ProxyConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawOperatorConfig {
    #[serde(default)]
    encryption_keys_secret_id: Option<String>,
    #[serde(default)]
    oidc_secret_id: Option<String>,
    #[serde(default)]
    kafka_topic_prefix: Option<String>,
    #[serde(default)]
    opensearch_index_prefix: Option<String>,
    #[serde(default)]
    external_fe_hostname: Option<String>,
    #[serde(default)]
    use_play_cache_session_store: bool,
}

fn default_state_path() -> String {
    "state/steward.json".to_string()
}

fn default_secrets_dir() -> String {
    "secrets".to_string()
}

const DEFAULT_AUDIT_INTERVAL: Duration = Duration::from_secs(30);

impl StewardConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    pub fn load_from(path: Option<&str>) -> Result<Self, ConfigError> {
        let builder = match path {
            Some(path) => Config::builder().add_source(File::with_name(path)),
            None => Config::builder().add_source(File::with_name("config/steward").required(false)),
        };
        let raw: RawConfig = builder
            .add_source(Environment::with_prefix("STEWARD").separator("__"))
            .build()?
            .try_deserialize()?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let audit_interval = parse_duration_opt(raw.audit_interval, "audit_interval")?
            .unwrap_or(DEFAULT_AUDIT_INTERVAL);

        let defaults = DeferBackoff::default();
        let defer_backoff = DeferBackoff {
            base: parse_duration_opt(raw.defer_backoff_base, "defer_backoff_base")?
                .unwrap_or(defaults.base),
            max: parse_duration_opt(raw.defer_backoff_max, "defer_backoff_max")?
                .unwrap_or(defaults.max),
        };

        if audit_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "audit_interval must be greater than zero".to_string(),
            ));
        }

        let operator = OperatorConfig {
            encryption_keys_secret_id: blank_to_none(raw.operator.encryption_keys_secret_id),
            oidc_secret_id: blank_to_none(raw.operator.oidc_secret_id),
            kafka_topic_prefix: blank_to_none(raw.operator.kafka_topic_prefix),
            opensearch_index_prefix: blank_to_none(raw.operator.opensearch_index_prefix),
            external_fe_hostname: blank_to_none(raw.operator.external_fe_hostname),
            use_play_cache_session_store: raw.operator.use_play_cache_session_store,
        };

        let proxy = ProxyConfig {
            http_proxy: blank_to_none(raw.proxy.http_proxy),
            https_proxy: blank_to_none(raw.proxy.https_proxy),
            no_proxy: blank_to_none(raw.proxy.no_proxy),
        };

        Ok(Self {
            supervisor: raw.supervisor,
            state_path: raw.state_path,
            secrets_dir: raw.secrets_dir,
            management: raw.management,
            audit_interval,
            defer_backoff,
            operator,
            proxy,
        })
    }

    pub fn supervisor_request_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        parse_duration_opt(self.supervisor.request_timeout.clone(), "request_timeout")
    }
}

/// Empty strings from the environment read as unset.
fn blank_to_none(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_duration_opt(
    value: Option<String>,
    field: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match blank_to_none(value) {
        Some(raw) => humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|source| ConfigError::Duration { field, source }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawConfig {
        RawConfig {
            supervisor: SupervisorConfig::default(),
            state_path: default_state_path(),
            secrets_dir: default_secrets_dir(),
            management: ManagementConfig::default(),
            audit_interval: None,
            defer_backoff_base: None,
            defer_backoff_max: None,
            operator: RawOperatorConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }

    #[test]
    fn blank_optional_strings_normalise_to_none() {
        let mut input = raw();
        input.operator.encryption_keys_secret_id = Some("  ".to_string());
        input.operator.kafka_topic_prefix = Some("".to_string());
        input.operator.oidc_secret_id = Some("oidc-main".to_string());

        let config = StewardConfig::from_raw(input).unwrap();
        assert!(config.operator.encryption_keys_secret_id.is_none());
        assert!(config.operator.kafka_topic_prefix.is_none());
        assert_eq!(config.operator.oidc_secret_id.as_deref(), Some("oidc-main"));
    }

    #[test]
    fn audit_interval_parses_humantime() {
        let mut input = raw();
        input.audit_interval = Some("90s".to_string());
        let config = StewardConfig::from_raw(input).unwrap();
        assert_eq!(config.audit_interval, Duration::from_secs(90));
    }

    #[test]
    fn zero_audit_interval_is_rejected() {
        let mut input = raw();
        input.audit_interval = Some("0s".to_string());
        assert!(StewardConfig::from_raw(input).is_err());
    }

    #[test]
    fn malformed_duration_is_a_typed_error() {
        let mut input = raw();
        input.defer_backoff_base = Some("soon".to_string());
        match StewardConfig::from_raw(input) {
            Err(ConfigError::Duration { field, .. }) => {
                assert_eq!(field, "defer_backoff_base");
            }
            other => panic!("expected duration error, got {other:?}"),
        }
    }
}
