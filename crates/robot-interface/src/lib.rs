//! robot-interface: joint-level control surface over EVO actuators
//!
//! [`RobotInterface`] owns every actuator described by a [`RobotConfig`],
//! fans operations out over the bus interfaces with a [`DispatchPool`], and
//! converts closed-chain ankle pairs between actuator and joint space with
//! the [`Decoupler`].

pub mod config;
pub use config::{
    ChainIndices, ClosedChain, ConfigError, JointsConfig, MotorsConfig, RobotConfig, TimingConfig,
};

mod decouple;
pub use decouple::{DecoupleError, Decoupler, LinkageGeometry, PairState, Side};

mod dispatch;
pub use dispatch::{DispatchError, DispatchPool};

mod error;
pub use error::{Result, RobotError};

mod robot;
pub use robot::RobotInterface;
