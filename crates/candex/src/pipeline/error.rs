use thiserror::Error;

use crate::gateway::GatewayError;

/// Control-plane failures that abort a run outright. Per-file and
/// per-pack problems are not errors at this level — they become terminal
/// statuses on the affected rows instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("batch '{0}' not found")]
    BatchNotFound(String),

    #[error("gateway failure: {0}")]
    Gateway(#[from] GatewayError),
}
