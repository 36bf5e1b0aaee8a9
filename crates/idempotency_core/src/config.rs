use std::time::Duration;

use thiserror::Error;

use crate::encoding::resolve_truthy_env_var_choice;

pub const ENV_DISABLED: &str = "IDEMPOTENCY_DISABLED";
pub const ENV_LOCK_TTL_SECONDS: &str = "IDEMPOTENCY_LOCK_TTL_SECONDS";
pub const ENV_RESULT_TTL_SECONDS: &str = "IDEMPOTENCY_RESULT_TTL_SECONDS";

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
#[error("invalid value for {name}: {message}")]
pub struct ConfigError {
    pub name: &'static str,
    pub message: String,
}

/// Behavior toggles for the idempotency layer, populated once at startup and
/// passed by reference into the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    pub enabled: bool,
    /// How long a claimed lock stays authoritative before another caller may
    /// treat it as abandoned.
    pub lock_ttl: Duration,
    /// How long a completed result stays servable before the key is eligible
    /// for a new generation.
    pub result_ttl: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_ttl: DEFAULT_LOCK_TTL,
            result_ttl: DEFAULT_RESULT_TTL,
        }
    }
}

impl IdempotencyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(None, None, None)
    }

    /// Resolve configuration from the process environment. Explicit choices
    /// take precedence over environment values.
    pub fn resolve(
        enabled: Option<bool>,
        lock_ttl: Option<Duration>,
        result_ttl: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        Self::resolve_with(enabled, lock_ttl, result_ttl, |name| {
            std::env::var(name).ok()
        })
    }

    fn resolve_with(
        enabled: Option<bool>,
        lock_ttl: Option<Duration>,
        result_ttl: Option<Duration>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let disabled_choice = enabled.map(|enabled| !enabled);
        let disabled = match env(ENV_DISABLED) {
            Some(value) => resolve_truthy_env_var_choice(&value, disabled_choice).map_err(
                |error| ConfigError {
                    name: ENV_DISABLED,
                    message: error.to_string(),
                },
            )?,
            None => disabled_choice.unwrap_or(false),
        };

        let lock_ttl = match lock_ttl {
            Some(value) => value,
            None => parse_ttl(ENV_LOCK_TTL_SECONDS, env(ENV_LOCK_TTL_SECONDS), DEFAULT_LOCK_TTL)?,
        };
        let result_ttl = match result_ttl {
            Some(value) => value,
            None => parse_ttl(
                ENV_RESULT_TTL_SECONDS,
                env(ENV_RESULT_TTL_SECONDS),
                DEFAULT_RESULT_TTL,
            )?,
        };

        Ok(Self {
            enabled: !disabled,
            lock_ttl,
            result_ttl,
        })
    }
}

fn parse_ttl(
    name: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };

    let seconds: u64 = value.trim().parse().map_err(|_| ConfigError {
        name,
        message: format!("expected a positive integer number of seconds, got {value:?}"),
    })?;
    if seconds == 0 {
        return Err(ConfigError {
            name,
            message: "must be greater than zero".to_string(),
        });
    }

    Ok(Duration::from_secs(seconds))
}
