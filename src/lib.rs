pub mod config;
pub mod error;
pub mod metering;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod routes;

pub use metering::{CloudflareMeter, MeterSettings, UsageMeter};
pub use models::{AggregateReport, Credential, UsageFailure, UsageRecord};
pub use orchestrator::{AggregatorSettings, UsageAggregator};
pub use pool::WorkerPool;
