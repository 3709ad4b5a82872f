use crate::config::ConfigError;
use crate::decouple::DecoupleError;
use crate::dispatch::DispatchError;
use can_transport::TransportError;
use motor_driver::{MotorError, MotorFault};
use thiserror::Error;

pub type Result<T, E = RobotError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RobotError {
    #[error("motors are not initialized")]
    NotInitialized,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("action has {found} entries, robot has {expected} joints")]
    ActionLength { expected: usize, found: usize },
    #[error("actuators offline: {motors:?}")]
    ActuatorOffline { motors: Vec<u16> },
    #[error("motor {id} reports {fault}")]
    DeviceFault { id: u16, fault: MotorFault },
    #[error("zeroing did not settle on motors {motors:?}")]
    ZeroFailed { motors: Vec<u16> },
    #[error(transparent)]
    Kinematics(#[from] DecoupleError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Motor(#[from] MotorError),
    #[error("{} operations failed: {}", .0.len(), join(.0))]
    Multiple(Vec<RobotError>),
}

fn join(errors: &[RobotError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RobotError {
    /// Fold a list of failures into one error; `None` when the list is empty.
    pub(crate) fn collect(mut errors: Vec<RobotError>) -> Option<RobotError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(RobotError::Multiple(errors)),
        }
    }
}
