use thiserror::Error;

use trinity_coordinator::error::CoordinatorError;
use trinity_relayer::error::RelayerError;
use trinity_storage::error::StorageError;

/// Errors that can occur in the node.
#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum NodeError {
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    #[error("storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("coordinator error: {0}")]
    CoordinatorError(#[from] CoordinatorError),

    #[error("relayer error: {0}")]
    RelayerError(#[from] RelayerError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = NodeError::ConfigError {
            reason: "unknown network 'moon'".to_string(),
        };
        assert_eq!(err.to_string(), "config error: unknown network 'moon'");
    }

    #[test]
    fn test_coordinator_error_from() {
        let err: NodeError = CoordinatorError::NothingDeferred.into();
        assert!(matches!(err, NodeError::CoordinatorError(_)));
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let node_err: NodeError = io_err.into();
        assert!(matches!(node_err, NodeError::IoError(_)));
    }
}
