use crate::config::schema::{
    Config, FilterConfig, GroupingConfig, IsolationPolicy, LimitsConfig, SyncConfig,
    TimeoutConfig,
};
use crate::cost::CostConfig;
use crate::retry::RetryConfig;

/// Flattened runtime configuration for one orchestrator instance.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub grouping: GroupingConfig,
    pub filters: FilterConfig,
    pub retry: RetryConfig,
    pub cost: CostConfig,
    pub limits: LimitsConfig,
    pub timeouts: TimeoutConfig,
    pub isolation: IsolationPolicy,
    pub sync: SyncConfig,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            grouping: config.grouping.clone(),
            filters: config.filters.clone(),
            retry: config.retry.clone(),
            cost: config.cost.clone(),
            limits: config.limits.clone(),
            timeouts: config.timeouts.clone(),
            isolation: config.isolation,
            sync: config.sync.clone(),
        }
    }
}
