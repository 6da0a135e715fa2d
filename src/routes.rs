use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::models::{AggregateReport, Credential};
use crate::orchestrator::UsageAggregator;

/// Shared state for the usage endpoints.
#[derive(Clone)]
pub struct UsageState {
    pub aggregator: UsageAggregator,
    pub credentials: Arc<[Credential]>,
}

impl UsageState {
    pub fn new(aggregator: UsageAggregator, credentials: Vec<Credential>) -> Self {
        Self {
            aggregator,
            credentials: credentials.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountOverride {
    #[serde(default)]
    pub account_id: Option<String>,
}

pub async fn root() -> &'static str {
    "Usage Aggregator API"
}

pub async fn usage_report(Extension(state): Extension<UsageState>) -> Json<AggregateReport> {
    Json(state.aggregator.collect(&state.credentials).await)
}

/// Report for a single configured credential, addressed by fingerprint.
pub async fn credential_report(
    Extension(state): Extension<UsageState>,
    Path(fingerprint): Path<String>,
    Query(params): Query<AccountOverride>,
) -> AppResult<Json<AggregateReport>> {
    let credential = state
        .credentials
        .iter()
        .find(|credential| credential.fingerprint() == fingerprint)
        .cloned()
        .ok_or(AppError::NotFound)?;

    let credential = match params.account_id {
        Some(account_id) if account_id.trim().is_empty() => {
            return Err(AppError::BadRequest("account_id must not be empty".into()));
        }
        Some(account_id) => credential.with_account_id(account_id.trim()),
        None => credential,
    };

    Ok(Json(state.aggregator.collect(&[credential]).await))
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/usage", get(usage_report))
        .route("/api/usage/:fingerprint", get(credential_report))
}
