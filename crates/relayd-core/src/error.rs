use crate::hardware::HardwareError;
use crate::registry::RelayId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid relay id: {0}")]
    InvalidRelay(RelayId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("hardware fault on relay {relay}: {source}")]
    HardwareFault {
        relay: RelayId,
        source: HardwareError,
    },

    #[error("hardware I/O on relay {relay} exceeded its time budget")]
    HardwareTimeout { relay: RelayId },

    #[error("hardware not initialized")]
    NotInitialized,

    #[error("sequence run not found: {0}")]
    SequenceNotFound(uuid::Uuid),

    #[error("coordinator is shutting down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, RelayError>;
