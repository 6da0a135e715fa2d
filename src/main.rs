use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use tracing_subscriber::{fmt, EnvFilter};
use usage_aggregator::config;
use usage_aggregator::routes::{api_routes, UsageState};
use usage_aggregator::{CloudflareMeter, UsageAggregator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();

    let credentials = config::parse_credentials(config::USAGE_API_TOKENS.as_str())?;
    if credentials.is_empty() {
        // Not fatal: /api/usage reports the missing configuration to callers.
        tracing::warn!("USAGE_API_TOKENS is empty; usage reports will fail");
    }

    let meter = CloudflareMeter::new(config::meter_settings_from_env()?)
        .context("failed to build metering client")?;
    let settings = config::aggregator_settings_from_env();
    tracing::info!(
        credentials = credentials.len(),
        credential_concurrency = settings.credential_concurrency,
        account_concurrency = settings.account_concurrency,
        daily_limit = settings.daily_limit,
        "usage aggregator configured"
    );
    let aggregator = UsageAggregator::new(Arc::new(meter), settings);

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(UsageState::new(aggregator, credentials)));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .context("invalid bind address")?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
