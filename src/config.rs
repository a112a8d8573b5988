//! Environment configuration
//!
//! Every setting is optional. `try_from_env` reports malformed values,
//! `from_env` logs them and keeps the default.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::alerts::{Severity, DEFAULT_RETENTION_MS};
use crate::correlation::{RuleDefinition, RuleError, DEFAULT_COOLDOWN_MS};
use crate::escalation::EscalationPolicies;
use crate::notify::ChannelKind;

/// Settings for one notification channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub enabled: bool,
    /// Deliveries are logged when no webhook is configured
    pub webhook_url: Option<String>,
    /// Extra request headers for the webhook, e.g. an auth token
    pub webhook_headers: Vec<(String, String)>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
            webhook_headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelsConfig {
    pub chat: ChannelSettings,
    pub email: ChannelSettings,
    pub paging: ChannelSettings,
}

impl ChannelsConfig {
    pub fn get(&self, kind: ChannelKind) -> &ChannelSettings {
        match kind {
            ChannelKind::Chat => &self.chat,
            ChannelKind::Email => &self.email,
            ChannelKind::Paging => &self.paging,
        }
    }

    pub fn get_mut(&mut self, kind: ChannelKind) -> &mut ChannelSettings {
        match kind {
            ChannelKind::Chat => &mut self.chat,
            ChannelKind::Email => &mut self.email,
            ChannelKind::Paging => &mut self.paging,
        }
    }
}

/// Alert engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub correlation_cooldown_ms: i64,
    pub history_retention_ms: i64,
    /// Cap on archived resolved instances; unbounded when `None`
    pub archive_capacity: Option<usize>,
    /// Raw producer alerts open escalation campaigns, not only correlations
    pub escalate_raw_alerts: bool,
    pub policies: EscalationPolicies,
    pub channels: ChannelsConfig,
    pub rules_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            correlation_cooldown_ms: DEFAULT_COOLDOWN_MS,
            history_retention_ms: DEFAULT_RETENTION_MS,
            archive_capacity: None,
            escalate_raw_alerts: true,
            policies: EscalationPolicies::default(),
            channels: ChannelsConfig::default(),
            rules_file: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_else(|e| {
            tracing::error!(error = %e, "Invalid engine configuration, using defaults");
            Self::default()
        })
    }

    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = Env(&lookup);

        if let Some(ms) = env.parse::<i64>("KLAXON_CORRELATION_COOLDOWN_MS")? {
            config.correlation_cooldown_ms = env.positive("KLAXON_CORRELATION_COOLDOWN_MS", ms)?;
        }
        if let Some(ms) = env.parse::<i64>("KLAXON_HISTORY_RETENTION_MS")? {
            config.history_retention_ms = env.positive("KLAXON_HISTORY_RETENTION_MS", ms)?;
        }
        config.archive_capacity = env.parse::<usize>("KLAXON_ARCHIVE_CAPACITY")?;
        if let Some(flag) = env.flag("KLAXON_ESCALATE_RAW_ALERTS")? {
            config.escalate_raw_alerts = flag;
        }

        for severity in Severity::ALL {
            let key = format!("KLAXON_TIMEOUT_{}_MS", severity.as_str().to_uppercase());
            if let Some(ms) = env.parse::<u64>(&key)? {
                if ms == 0 {
                    return Err(ConfigError::invalid(&key, "0", "timeout must be positive"));
                }
                config.policies.get_mut(severity).timeout = Duration::from_millis(ms);
            }
        }

        for kind in ChannelKind::ALL {
            let prefix = format!("KLAXON_{}", kind.as_str().to_uppercase());
            let settings = config.channels.get_mut(kind);
            if let Some(enabled) = env.flag(&format!("{}_ENABLED", prefix))? {
                settings.enabled = enabled;
            }
            settings.webhook_url = env
                .get(&format!("{}_WEBHOOK_URL", prefix))
                .filter(|url| !url.trim().is_empty());
            if let Some(headers) = env.headers(&format!("{}_WEBHOOK_HEADERS", prefix))? {
                settings.webhook_headers = headers;
            }
        }

        config.rules_file = env
            .get("KLAXON_RULES_FILE")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(config)
    }
}

/// HTTP server and background worker configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub retention_check_interval_secs: u64,
    /// Resolved instances older than this are archived
    pub archive_after_ms: i64,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            retention_check_interval_secs: 60,
            archive_after_ms: 24 * 60 * 60 * 1000,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_else(|e| {
            tracing::error!(error = %e, "Invalid server configuration, using defaults");
            Self::default()
        })
    }

    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            engine: EngineConfig::from_lookup(&lookup)?,
            ..Self::default()
        };
        let env = Env(&lookup);

        if let Some(host) = env.get("KLAXON_HOST") {
            config.host = host;
        }
        if let Some(port) = env.parse::<u16>("KLAXON_PORT")? {
            config.port = port;
        }
        if let Some(secs) = env.parse::<u64>("KLAXON_RETENTION_CHECK_INTERVAL_SECS")? {
            config.retention_check_interval_secs = secs.max(1);
        }
        if let Some(ms) = env.parse::<i64>("KLAXON_ARCHIVE_AFTER_MS")? {
            config.archive_after_ms = env.positive("KLAXON_ARCHIVE_AFTER_MS", ms)?;
        }

        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::invalid(key, &raw, &e.to_string())),
        }
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::invalid(key, &raw, "expected a boolean")),
            },
        }
    }

    /// `Name: value` pairs separated by `;`
    fn headers(&self, key: &str) -> Result<Option<Vec<(String, String)>>, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        raw.split(';')
            .filter(|pair| !pair.trim().is_empty())
            .map(|pair| match pair.split_once(':') {
                Some((name, value)) if !name.trim().is_empty() => {
                    Ok((name.trim().to_string(), value.trim().to_string()))
                }
                _ => Err(ConfigError::invalid(key, &raw, "expected 'Name: value' pairs")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn positive(&self, key: &str, value: i64) -> Result<i64, ConfigError> {
        if value <= 0 {
            return Err(ConfigError::invalid(key, &value.to_string(), "must be positive"));
        }
        Ok(value)
    }
}

/// Read declarative rules from a JSON array file
pub fn load_rule_definitions(path: &Path) -> Result<Vec<RuleDefinition>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::RulesFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::RulesParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read rules file {path:?}: {source}")]
    RulesFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse rules file {path:?}: {source}")]
    RulesParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid rule in {path:?}: {source}")]
    InvalidRule {
        path: PathBuf,
        source: RuleError,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: &str) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
