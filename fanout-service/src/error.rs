// Service Errors
// Error taxonomy shared by the graph, stores, factories and scheduler

use crate::execution::graph::GraphError;
use crate::runs::models::BlockRunStatus;

use std::io;
use thiserror::Error;

/// Result alias used across the service
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced by the fan-out scheduling engine
///
/// "No data yet" is never an error: counters report `0` and factories
/// return an empty list. Only malformed configuration and store failures
/// end up here.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Graph(#[from] GraphError),

    #[error("Unknown block: {0}")]
    UnknownBlock(String),

    #[error("Block '{0}' is marked as a dynamic child but has no dynamic ancestor")]
    MissingDynamicAncestor(String),

    #[error("Pipeline run not found: {0}")]
    PipelineRunNotFound(u64),

    #[error("Block run not found: {0}")]
    BlockRunNotFound(u64),

    #[error("Invalid status transition for block run '{block_uuid}': {from} -> {to}")]
    InvalidTransition {
        block_uuid: String,
        from: BlockRunStatus,
        to: BlockRunStatus,
    },

    #[error("Output error for '{block_uuid}': {message}")]
    Output { block_uuid: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse pipeline: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Pipeline run {pipeline_run_id} stalled: {reason}")]
    Stalled { pipeline_run_id: u64, reason: String },
}

impl ServiceError {
    pub fn output(block_uuid: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Output {
            block_uuid: block_uuid.into(),
            message: message.into(),
        }
    }

    /// Whether the error points at pipeline configuration rather than runtime state
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ServiceError::Graph(_)
                | ServiceError::UnknownBlock(_)
                | ServiceError::MissingDynamicAncestor(_)
                | ServiceError::Parse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors() {
        assert!(ServiceError::MissingDynamicAncestor("child".into()).is_configuration_error());
        assert!(ServiceError::UnknownBlock("nope".into()).is_configuration_error());
        assert!(!ServiceError::BlockRunNotFound(3).is_configuration_error());
    }

    #[test]
    fn test_transition_message() {
        let err = ServiceError::InvalidTransition {
            block_uuid: "dynamic1:0".to_string(),
            from: BlockRunStatus::Completed,
            to: BlockRunStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition for block run 'dynamic1:0': COMPLETED -> RUNNING"
        );
    }
}
