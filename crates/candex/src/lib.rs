pub mod capability;
pub mod config;
pub mod cost;
pub mod db;
pub mod dedupe;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod sanitize;
pub mod storage;
pub mod sync;

pub use config::{load_config, Config, IsolationPolicy};
pub use cost::{CostConfig, CostDecision, CostGuard};
pub use error::{CandexError, ConfigError, Result};
pub use identity::PackGrouper;
pub use pipeline::{BatchOrchestrator, BatchReport, Capabilities, PipelineConfig, Stores};
pub use retry::{RetryConfig, RetryPolicy};
