use can_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = MotorError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MotorError {
    #[error("unknown motor model index: {0}")]
    UnknownModel(u8),
    #[error("unknown motor type: {0}")]
    UnknownType(String),
    #[error("motor id {0} does not fit a CAN identifier")]
    InvalidId(u16),
    #[error("motor {id}: {source}")]
    Transport {
        id: u16,
        #[source]
        source: TransportError,
    },
    #[error("metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}
