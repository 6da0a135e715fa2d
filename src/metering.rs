use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::MeteringError;
use crate::models::{Account, Credential, Secret, UsageCounters, UsageWindow};

pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

const ACCOUNTS_PER_PAGE: u32 = 50;

const BILLING_METRICS_QUERY: &str = r#"query getBillingMetrics($AccountID: String!, $filter: AccountWorkersInvocationsAdaptiveFilter_InputObject) {
  viewer {
    accounts(filter: { accountTag: $AccountID }) {
      pagesFunctionsInvocationsAdaptiveGroups(limit: 1000, filter: $filter) { sum { requests } }
      workersInvocationsAdaptive(limit: 10000, filter: $filter) { sum { requests } }
    }
  }
}"#;

/// Remote service that knows which accounts a credential can see and how many
/// requests each account served.
#[async_trait]
pub trait UsageMeter: Send + Sync {
    async fn list_accounts(&self, credential: &Credential) -> Result<Vec<Account>, MeteringError>;

    async fn query_usage(
        &self,
        credential: &Credential,
        account_id: &str,
        window: &UsageWindow,
    ) -> Result<UsageCounters, MeteringError>;
}

#[derive(Debug, Clone)]
pub struct MeterSettings {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// `UsageMeter` backed by the Cloudflare REST and GraphQL analytics APIs.
pub struct CloudflareMeter {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountsEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    result: Option<Vec<AccountEntry>>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
    #[serde(default)]
    errors: Option<Vec<ApiMessage>>,
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    total_pages: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<GraphqlData>,
    #[serde(default)]
    errors: Option<Vec<ApiMessage>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlData {
    #[serde(default)]
    viewer: Option<Viewer>,
}

#[derive(Debug, Deserialize)]
struct Viewer {
    #[serde(default)]
    accounts: Option<Vec<AccountUsage>>,
}

#[derive(Debug, Deserialize)]
struct AccountUsage {
    #[serde(default, rename = "pagesFunctionsInvocationsAdaptiveGroups")]
    pages: Option<Vec<InvocationGroup>>,
    #[serde(default, rename = "workersInvocationsAdaptive")]
    workers: Option<Vec<InvocationGroup>>,
}

#[derive(Debug, Deserialize)]
struct InvocationGroup {
    #[serde(default)]
    sum: Option<GroupSum>,
}

#[derive(Debug, Deserialize)]
struct GroupSum {
    #[serde(default)]
    requests: Option<u64>,
}

fn sum_requests(groups: Option<&[InvocationGroup]>) -> u64 {
    groups
        .unwrap_or_default()
        .iter()
        .filter_map(|group| group.sum.as_ref().and_then(|sum| sum.requests))
        .fold(0u64, u64::saturating_add)
}

impl GraphqlResponse {
    fn counters(&self) -> UsageCounters {
        let usage = self
            .data
            .as_ref()
            .and_then(|data| data.viewer.as_ref())
            .and_then(|viewer| viewer.accounts.as_ref())
            .and_then(|accounts| accounts.first());
        match usage {
            Some(usage) => UsageCounters {
                pages: sum_requests(usage.pages.as_deref()),
                workers: sum_requests(usage.workers.as_deref()),
            },
            None => UsageCounters::default(),
        }
    }
}

fn first_message(errors: Option<&[ApiMessage]>) -> Option<String> {
    let first = errors?.first()?;
    Some(
        first
            .message
            .clone()
            .unwrap_or_else(|| "unspecified error".to_string()),
    )
}

impl CloudflareMeter {
    pub fn new(settings: MeterSettings) -> Result<Self, MeteringError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn auth(
        &self,
        request: reqwest::RequestBuilder,
        credential: &Credential,
    ) -> reqwest::RequestBuilder {
        match credential.secret() {
            Secret::ApiToken(token) => request.bearer_auth(token),
            Secret::GlobalKey { email, key } => request
                .header("X-Auth-Email", email)
                .header("X-Auth-Key", key),
        }
    }

    async fn accounts_page(
        &self,
        credential: &Credential,
        page: u32,
    ) -> Result<AccountsEnvelope, MeteringError> {
        let response = self
            .auth(self.client.get(self.endpoint("accounts")), credential)
            .query(&[("page", page), ("per_page", ACCOUNTS_PER_PAGE)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MeteringError::Status {
                endpoint: "accounts",
                status: status.as_u16(),
            });
        }
        let envelope: AccountsEnvelope = response.json().await?;
        if envelope.success == Some(false) {
            let message = first_message(envelope.errors.as_deref())
                .unwrap_or_else(|| "account listing rejected".to_string());
            return Err(MeteringError::Api(message));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl UsageMeter for CloudflareMeter {
    async fn list_accounts(&self, credential: &Credential) -> Result<Vec<Account>, MeteringError> {
        let mut accounts = Vec::new();
        let mut page = 1;
        loop {
            let envelope = self.accounts_page(credential, page).await?;
            let entries = envelope.result.unwrap_or_default();
            if entries.is_empty() {
                break;
            }
            accounts.extend(entries.into_iter().filter_map(|entry| match entry.id {
                Some(id) if !id.trim().is_empty() => Some(Account::new(id, entry.name)),
                _ => {
                    tracing::debug!(credential = %credential, "skipping account without id");
                    None
                }
            }));
            let Some(info) = envelope.result_info else {
                break;
            };
            let current = info.page.unwrap_or(page).max(page);
            if current >= info.total_pages.unwrap_or(current) {
                break;
            }
            page = current + 1;
        }
        tracing::debug!(
            credential = %credential,
            count = accounts.len(),
            "listed metering accounts"
        );
        Ok(accounts)
    }

    async fn query_usage(
        &self,
        credential: &Credential,
        account_id: &str,
        window: &UsageWindow,
    ) -> Result<UsageCounters, MeteringError> {
        let payload = json!({
            "query": BILLING_METRICS_QUERY,
            "variables": {
                "AccountID": account_id,
                "filter": {
                    "datetime_geq": window.start_rfc3339(),
                    "datetime_leq": window.end_rfc3339(),
                }
            }
        });

        let response = self
            .auth(self.client.post(self.endpoint("graphql")), credential)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MeteringError::Status {
                endpoint: "graphql",
                status: status.as_u16(),
            });
        }

        let parsed: GraphqlResponse = response.json().await?;
        if let Some(message) = first_message(parsed.errors.as_deref()) {
            return Err(MeteringError::Api(message));
        }
        Ok(parsed.counters())
    }
}
