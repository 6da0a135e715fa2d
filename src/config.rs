use std::time::Duration;

use once_cell::sync::Lazy;
use url::Url;

use crate::error::ConfigError;
use crate::metering::{MeterSettings, DEFAULT_API_BASE};
use crate::models::{Credential, DEFAULT_DAILY_LIMIT};
use crate::orchestrator::AggregatorSettings;

/// Comma-separated metering credentials. Each entry is an API token or an
/// `email:global_key` pair, optionally followed by `#account_id` to skip
/// account discovery for that credential.
pub static USAGE_API_TOKENS: Lazy<String> =
    Lazy::new(|| std::env::var("USAGE_API_TOKENS").unwrap_or_default());

/// Base URL of the metering API. Defaults to the public Cloudflare v4 endpoint.
pub static USAGE_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("USAGE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string())
});

/// Daily request quota used to compute the remaining free allowance.
pub static USAGE_DAILY_LIMIT: Lazy<u64> =
    Lazy::new(|| parse_env("USAGE_DAILY_LIMIT").unwrap_or(DEFAULT_DAILY_LIMIT));

/// Credentials queried at the same time. Defaults to `3`.
pub static USAGE_CREDENTIAL_CONCURRENCY: Lazy<usize> = Lazy::new(|| {
    parse_env("USAGE_CREDENTIAL_CONCURRENCY")
        .filter(|value| *value > 0)
        .unwrap_or(3)
});

/// Accounts queried at the same time under one credential. Defaults to `5`.
pub static USAGE_ACCOUNT_CONCURRENCY: Lazy<usize> = Lazy::new(|| {
    parse_env("USAGE_ACCOUNT_CONCURRENCY")
        .filter(|value| *value > 0)
        .unwrap_or(5)
});

/// Per-request timeout for metering API calls.
pub static USAGE_HTTP_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    parse_env("USAGE_HTTP_TIMEOUT_SECS")
        .filter(|value| *value > 0)
        .unwrap_or(15)
});

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| parse_env("BIND_PORT").unwrap_or(3000));

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    read_optional_env(key).and_then(|value| value.parse::<T>().ok())
}

/// Parses the credential list syntax described on [`USAGE_API_TOKENS`].
///
/// Blank entries are skipped. An empty result is not an error here; the
/// aggregator reports it.
pub fn parse_credentials(raw: &str) -> Result<Vec<Credential>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(index, entry)| parse_credential(index, entry))
        .collect()
}

fn parse_credential(index: usize, entry: &str) -> Result<Credential, ConfigError> {
    let invalid = |reason: &'static str| ConfigError::InvalidCredential { index, reason };

    let (secret, account_id) = match entry.rsplit_once('#') {
        Some((secret, account_id)) => {
            let account_id = account_id.trim();
            if account_id.is_empty() {
                return Err(invalid("empty account id after `#`"));
            }
            (secret.trim(), Some(account_id))
        }
        None => (entry, None),
    };
    if secret.is_empty() {
        return Err(invalid("missing secret"));
    }

    let credential = match secret.split_once(':') {
        Some((email, key)) => {
            let (email, key) = (email.trim(), key.trim());
            if email.is_empty() || key.is_empty() {
                return Err(invalid("global key entries need both email and key"));
            }
            Credential::global_key(email, key)
        }
        None => Credential::api_token(secret),
    };

    Ok(match account_id {
        Some(account_id) => credential.with_account_id(account_id),
        None => credential,
    })
}

pub fn validate_base_url(value: &str) -> Result<String, ConfigError> {
    let parsed = Url::parse(value).map_err(|err| ConfigError::InvalidBaseUrl {
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            value: value.to_string(),
            reason: format!("unsupported scheme `{}`", parsed.scheme()),
        });
    }
    Ok(value.trim_end_matches('/').to_string())
}

pub fn meter_settings_from_env() -> Result<MeterSettings, ConfigError> {
    Ok(MeterSettings {
        base_url: validate_base_url(USAGE_API_BASE.as_str())?,
        timeout: Duration::from_secs(*USAGE_HTTP_TIMEOUT_SECS),
    })
}

pub fn aggregator_settings_from_env() -> AggregatorSettings {
    AggregatorSettings {
        daily_limit: *USAGE_DAILY_LIMIT,
        credential_concurrency: *USAGE_CREDENTIAL_CONCURRENCY,
        account_concurrency: *USAGE_ACCOUNT_CONCURRENCY,
    }
}
