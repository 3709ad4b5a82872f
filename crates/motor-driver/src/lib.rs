//! motor-driver: EVO actuator protocol and drivers
//!
//! Table-driven command/status codec for the EVO actuator family, the
//! [`Motor`] capability trait with its EVO implementation, register access,
//! a bus-level simulation for running without hardware, and Prometheus metrics.

mod types;
pub use types::*;

mod error;
pub use error::{MotorError, Result};

pub mod layout;

mod encode;
pub use encode::{
    decode_command, encode_command, map_to_uint, read_param_frame, read_register_frame,
    register_id, save_register_frame, unmap_from_uint, write_register_frame, AdminCommand,
    EncodedCommand, REGISTER_ID_BASE,
};

mod decode;
pub use decode::{decode_status, encode_status};

mod drivers;
pub use drivers::{create_motor, DriverKind, Motor, MotorSpec, MotorTiming};

mod evo;
pub use evo::EvoMotor;

#[cfg(feature = "sim")]
mod sim;
#[cfg(feature = "sim")]
pub use sim::SimulatedBus;

mod metrics;
pub use metrics::{MetricsHub, MotorMetrics};
