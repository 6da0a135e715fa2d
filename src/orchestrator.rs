use std::convert::Infallible;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::ConfigError;
use crate::metering::UsageMeter;
use crate::models::{
    Account, AccountOutcome, AggregateReport, Credential, UsageFailure, UsageRecord, UsageWindow,
    DEFAULT_DAILY_LIMIT,
};
use crate::pool::WorkerPool;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Discovery position of an account: credential index, then account index.
type Slot = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    pub daily_limit: u64,
    pub credential_concurrency: usize,
    pub account_concurrency: usize,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            daily_limit: DEFAULT_DAILY_LIMIT,
            credential_concurrency: 3,
            account_concurrency: 5,
        }
    }
}

/// Fans usage queries out across credentials and their accounts and merges the
/// answers into one [`AggregateReport`].
///
/// Failures are isolated per credential (discovery) and per account (usage
/// query); they are reported next to the successful records instead of
/// aborting the batch.
#[derive(Clone)]
pub struct UsageAggregator {
    meter: Arc<dyn UsageMeter>,
    settings: AggregatorSettings,
    clock: Clock,
}

impl UsageAggregator {
    pub fn new(meter: Arc<dyn UsageMeter>, settings: AggregatorSettings) -> Self {
        Self {
            meter,
            settings,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn collect(&self, credentials: &[Credential]) -> AggregateReport {
        if credentials.is_empty() {
            tracing::warn!("usage report requested without configured credentials");
            return AggregateReport::failed(ConfigError::NoCredentials.to_string(), self.now());
        }

        let tasks = credentials
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, credential)| {
                let this = self.clone();
                move || async move { this.collect_credential(index, credential).await }
            });

        let mut outcomes = match WorkerPool::new(self.settings.credential_concurrency)
            .run(tasks)
            .await
        {
            Ok(outcomes) => outcomes,
            Err(never) => match never {},
        };
        // The pool yields completion order; restore discovery order.
        outcomes.sort_by_key(|(slot, _)| *slot);

        let outcomes = outcomes.into_iter().map(|(_, outcome)| outcome);
        let report = AggregateReport::from_outcomes(outcomes, self.now());
        tracing::info!(
            credentials = credentials.len(),
            accounts = report.accounts.len(),
            failures = report.failures.len(),
            "usage report aggregated"
        );
        report
    }

    async fn collect_credential(
        &self,
        index: usize,
        credential: Credential,
    ) -> Result<Vec<(Slot, AccountOutcome)>, Infallible> {
        let accounts = match credential.account_id() {
            Some(account_id) => vec![Account::new(account_id, Some(account_id.to_string()))],
            None => match self.meter.list_accounts(&credential).await {
                Ok(accounts) => accounts,
                Err(err) => {
                    tracing::warn!(
                        credential = %credential,
                        error = %err,
                        "account discovery failed"
                    );
                    let failure = UsageFailure {
                        credential: credential.fingerprint(),
                        account_id: None,
                        account_name: None,
                        reason: err.to_string(),
                    };
                    return Ok(vec![((index, 0), AccountOutcome::Failed(failure))]);
                }
            },
        };

        if accounts.is_empty() {
            tracing::debug!(credential = %credential, "credential has no accounts");
            return Ok(Vec::new());
        }

        let tasks = accounts
            .into_iter()
            .enumerate()
            .map(|(position, account)| {
                let this = self.clone();
                let credential = credential.clone();
                move || async move {
                    let outcome = this.query_account(&credential, &account).await;
                    Ok::<_, Infallible>(Some(((index, position), outcome)))
                }
            });

        WorkerPool::new(self.settings.account_concurrency)
            .run(tasks)
            .await
    }

    async fn query_account(&self, credential: &Credential, account: &Account) -> AccountOutcome {
        // "now" is read per query so later queries see a wider window.
        let window = UsageWindow::today_until(self.now());
        match self
            .meter
            .query_usage(credential, &account.id, &window)
            .await
        {
            Ok(counters) => {
                AccountOutcome::Ok(UsageRecord::new(account, counters, self.settings.daily_limit))
            }
            Err(err) => {
                tracing::warn!(
                    credential = %credential,
                    account_id = %account.id,
                    error = %err,
                    "usage query failed"
                );
                AccountOutcome::Failed(UsageFailure {
                    credential: credential.fingerprint(),
                    account_id: Some(account.id.clone()),
                    account_name: Some(account.name.clone()),
                    reason: err.to_string(),
                })
            }
        }
    }
}
