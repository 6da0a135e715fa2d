use std::fmt;

use chrono::{DateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Free-plan daily request quota shared by Workers and Pages Functions.
pub const DEFAULT_DAILY_LIMIT: u64 = 100_000;

/// Display name used when the metering API returns an account without one.
pub const UNKNOWN_ACCOUNT_NAME: &str = "unknown account";

#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    ApiToken(String),
    GlobalKey { email: String, key: String },
}

/// Authentication material for the metering API plus an optional account override.
///
/// The secret never shows up in `Debug` output, logs or reports; use
/// [`Credential::fingerprint`] to tell credentials apart.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: Secret,
    account_id: Option<String>,
}

impl Credential {
    pub fn api_token(token: impl Into<String>) -> Self {
        Self {
            secret: Secret::ApiToken(token.into()),
            account_id: None,
        }
    }

    pub fn global_key(email: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            secret: Secret::GlobalKey {
                email: email.into(),
                key: key.into(),
            },
            account_id: None,
        }
    }

    /// Pins the credential to one account, skipping account discovery.
    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        let account_id = account_id.into();
        self.account_id = Some(account_id).filter(|id| !id.trim().is_empty());
        self
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    /// Short, stable identifier derived from the secret material and the
    /// account override, so entries sharing a secret stay distinguishable.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match &self.secret {
            Secret::ApiToken(token) => hasher.update(token.as_bytes()),
            Secret::GlobalKey { email, key } => {
                hasher.update(email.as_bytes());
                hasher.update(b":");
                hasher.update(key.as_bytes());
            }
        }
        if let Some(account_id) = &self.account_id {
            hasher.update(b"#");
            hasher.update(account_id.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        digest[..12].to_string()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.secret {
            Secret::ApiToken(_) => "api_token",
            Secret::GlobalKey { .. } => "global_key",
        };
        f.debug_struct("Credential")
            .field("kind", &kind)
            .field("fingerprint", &self.fingerprint())
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub name: String,
}

impl Account {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        let name = name
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| UNKNOWN_ACCOUNT_NAME.to_string());
        Self {
            id: id.into(),
            name,
        }
    }
}

/// Interval from UTC midnight of the current day up to `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UsageWindow {
    pub fn today_until(end: DateTime<Utc>) -> Self {
        let midnight = end.date_naive().and_time(NaiveTime::default());
        Self {
            start: Utc.from_utc_datetime(&midnight),
            end,
        }
    }

    pub fn start_rfc3339(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn end_rfc3339(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounters {
    pub pages: u64,
    pub workers: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub account_id: String,
    pub account_name: String,
    pub pages: u64,
    pub workers: u64,
    pub total: u64,
    pub free_quota_remaining: u64,
}

impl UsageRecord {
    pub fn new(account: &Account, counters: UsageCounters, daily_limit: u64) -> Self {
        let total = counters.pages.saturating_add(counters.workers);
        Self {
            account_id: account.id.clone(),
            account_name: account.name.clone(),
            pages: counters.pages,
            workers: counters.workers,
            total,
            free_quota_remaining: daily_limit.saturating_sub(total),
        }
    }
}

/// A unit of work that could not be completed.
///
/// `account_id` is `None` when the whole credential failed during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageFailure {
    pub credential: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountOutcome {
    Ok(UsageRecord),
    Failed(UsageFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub success: bool,
    pub generated_at: DateTime<Utc>,
    pub accounts: Vec<UsageRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<UsageFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AggregateReport {
    pub fn from_outcomes(
        outcomes: impl IntoIterator<Item = AccountOutcome>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut accounts = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                AccountOutcome::Ok(record) => accounts.push(record),
                AccountOutcome::Failed(failure) => failures.push(failure),
            }
        }
        Self {
            success: true,
            generated_at,
            accounts,
            failures,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, generated_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            generated_at,
            accounts: Vec::new(),
            failures: Vec::new(),
            error: Some(error.into()),
        }
    }
}
