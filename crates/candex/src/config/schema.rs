use serde::{Deserialize, Serialize};

use crate::cost::CostConfig;
use crate::retry::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub isolation: IsolationPolicy,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Whether a name-only orphan may open a pack of its own.
    #[serde(default = "default_true")]
    pub allow_singleton_packs: bool,
    /// Packs larger than this are truncated to the first N files by
    /// document-type precedence (lossy; excess files are dropped).
    #[serde(default = "default_max_files_per_pack")]
    pub max_files_per_pack: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_files_per_pack() -> usize {
    8
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            allow_singleton_packs: true,
            max_files_per_pack: default_max_files_per_pack(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Route packs whose merged identity flags a student to the hold
    /// queue.
    #[serde(default)]
    pub exclude_students: bool,
    /// Non-empty: a pack whose merged skills intersect none of these is
    /// routed to the hold queue with the missing list recorded.
    #[serde(default)]
    pub required_skills: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    /// Minimum extracted characters for a file to be usable.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    /// Raw-text preview length stored on hold-queue entries.
    #[serde(default = "default_hold_preview_chars")]
    pub hold_preview_chars: usize,
}

fn default_max_file_size_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_min_text_chars() -> usize {
    40
}

fn default_hold_preview_chars() -> usize {
    400
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size_bytes(),
            min_text_chars: default_min_text_chars(),
            hold_preview_chars: default_hold_preview_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Per-file share of the stuck-batch allowance.
    #[serde(default = "default_per_file_allowance_secs")]
    pub per_file_allowance_secs: u64,
    #[serde(default = "default_fixed_buffer_secs")]
    pub fixed_buffer_secs: u64,
    /// Hard cap on the allowance regardless of batch size.
    #[serde(default = "default_absolute_ceiling_secs")]
    pub absolute_ceiling_secs: u64,
}

fn default_per_file_allowance_secs() -> u64 {
    60
}

fn default_fixed_buffer_secs() -> u64 {
    120
}

fn default_absolute_ceiling_secs() -> u64 {
    1_800
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            per_file_allowance_secs: default_per_file_allowance_secs(),
            fixed_buffer_secs: default_fixed_buffer_secs(),
            absolute_ceiling_secs: default_absolute_ceiling_secs(),
        }
    }
}

impl TimeoutConfig {
    /// `min(file_count × per_file_allowance + fixed_buffer, ceiling)`.
    pub fn allowance_secs(&self, file_count: u32) -> u64 {
        let scaled = u64::from(file_count)
            .saturating_mul(self.per_file_allowance_secs)
            .saturating_add(self.fixed_buffer_secs);
        scaled.min(self.absolute_ceiling_secs)
    }
}

/// How far a single failure is allowed to spread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationPolicy {
    /// One file's or pack's failure never aborts the batch.
    #[default]
    ContinueOnError,
    /// First processing failure fails the whole batch.
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// TTL of the CRM field-map cache.
    #[serde(default = "default_field_map_ttl_secs")]
    pub field_map_ttl_secs: u64,
}

fn default_field_map_ttl_secs() -> u64 {
    300
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            field_map_ttl_secs: default_field_map_ttl_secs(),
        }
    }
}
