use crate::evo::EvoMotor;
use crate::{
    ControlMode, FlashParam, MitCommand, MotorError, MotorFault, MotorMetrics, MotorModel,
    MotorState, Result,
};
use can_transport::CanTransport;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Driver families the factory can build.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DriverKind {
    Evo,
}

impl FromStr for DriverKind {
    type Err = MotorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "evo" => Ok(DriverKind::Evo),
            _ => Err(MotorError::UnknownType(s.to_string())),
        }
    }
}

/// Settle delays of the administrative sequences.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorTiming {
    /// Between the steps of bring-up and after unlock.
    pub settle: Duration,
    /// Between a set-zero request and checking the new position.
    pub zero_settle: Duration,
    /// |pos| below this after zeroing counts as success (rad).
    pub zero_tolerance: f32,
}

impl Default for MotorTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(10),
            zero_settle: Duration::from_millis(100),
            zero_tolerance: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MotorSpec {
    pub id: u16,
    pub model: MotorModel,
    /// Status replies arrive on `id + master_id_offset`.
    pub master_id_offset: u16,
}

/// Capability surface of one actuator.
///
/// Every method that puts a frame on the bus counts towards the liveness
/// counter; any decoded status reply resets it.
pub trait Motor: Send + Sync {
    fn id(&self) -> u16;
    fn model(&self) -> MotorModel;

    /// Enter control mode.
    fn lock(&self) -> Result<()>;
    /// Leave control mode.
    fn unlock(&self) -> Result<()>;
    /// Bring-up sequence; returns the fault the device reports afterwards, if any.
    fn init(&self) -> Result<Option<MotorFault>>;
    fn deinit(&self) -> Result<()>;
    /// Zero the encoder at the current pose; `false` if the position did not settle near 0.
    fn set_zero(&self) -> Result<bool>;
    fn clear_error(&self) -> Result<()>;
    /// Ask the device for a fresh status frame.
    fn refresh_status(&self) -> Result<()>;

    fn mit_command(&self, cmd: MitCommand) -> Result<()>;

    fn position_command(&self, pos: f32) -> Result<()> {
        self.mit_command(MitCommand::new(pos, 0.0, 100.0, 5.0, 0.0))
    }

    fn velocity_command(&self, vel: f32) -> Result<()> {
        self.mit_command(MitCommand::new(0.0, vel, 0.0, 5.0, 0.0))
    }

    fn read_param(&self, param: FlashParam) -> Result<()>;
    fn write_register(&self, index: u16, subindex: u8, value: i32) -> Result<()>;
    fn save_register(&self, rid: u8) -> Result<()>;

    fn control_mode(&self) -> ControlMode;
    fn set_control_mode(&self, mode: ControlMode);

    fn state(&self) -> MotorState;
    /// Frames sent since the last decoded reply.
    fn liveness(&self) -> u32;
}

/// Build a driver and attach it to `transport`.
pub fn create_motor(
    kind: DriverKind,
    spec: MotorSpec,
    transport: Arc<CanTransport>,
    timing: MotorTiming,
    metrics: Option<MotorMetrics>,
) -> Result<Arc<dyn Motor>> {
    match kind {
        DriverKind::Evo => Ok(Arc::new(EvoMotor::new(spec, transport, timing, metrics)?)),
    }
}
