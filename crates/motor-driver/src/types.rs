use crate::layout::{FrameLayout, ENCOS_8108_LAYOUT, REVO_4310_LAYOUT};
use crate::MotorError;
use core::fmt;

/// Upper bound of the outer-loop proportional gain, shared by every EVO model.
pub const KP_MAX: f32 = 500.0;

/// EVO hardware variants, numbered as in the configuration file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MotorModel {
    Revo4310 = 0,
    Encos8108 = 1,
}

impl TryFrom<u8> for MotorModel {
    type Error = MotorError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MotorModel::Revo4310),
            1 => Ok(MotorModel::Encos8108),
            other => Err(MotorError::UnknownModel(other)),
        }
    }
}

impl MotorModel {
    pub fn limits(self) -> MotorLimits {
        match self {
            MotorModel::Revo4310 => MotorLimits {
                pos_max: 12.5,
                vel_max: 10.0,
                tau_max: 50.0,
                kp_max: 250.0,
                kd_max: 50.0,
                cur_max: 100.0,
            },
            MotorModel::Encos8108 => MotorLimits {
                pos_max: 12.5,
                vel_max: 18.0,
                tau_max: 150.0,
                kp_max: 500.0,
                kd_max: 5.0,
                cur_max: 150.0,
            },
        }
    }

    pub fn layout(self) -> &'static FrameLayout {
        match self {
            MotorModel::Revo4310 => &REVO_4310_LAYOUT,
            MotorModel::Encos8108 => &ENCOS_8108_LAYOUT,
        }
    }
}

impl fmt::Display for MotorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotorModel::Revo4310 => f.write_str("REVO-4310"),
            MotorModel::Encos8108 => f.write_str("ENCOS-8108"),
        }
    }
}

/// Symmetric physical ranges of one model. Position in rad, velocity in
/// rad/s, torque in N·m, current in A.
///
/// `kp_max` is the value the device firmware reports; the command path maps
/// Kp over `0..KP_MAX` for every model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotorLimits {
    pub pos_max: f32,
    pub vel_max: f32,
    pub tau_max: f32,
    pub kp_max: f32,
    pub kd_max: f32,
    pub cur_max: f32,
}

/// Device-reported error codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MotorFault {
    OverVoltage,
    UnderVoltage,
    OverCurrent,
    MosOverTemperature,
    CoilOverTemperature,
    CommunicationLost,
    Overload,
    EncoderError,
    Unknown(u8),
}

impl MotorFault {
    /// `None` for code 0 (healthy).
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => return None,
            0x01 => MotorFault::OverVoltage,
            0x02 => MotorFault::UnderVoltage,
            0x03 => MotorFault::OverCurrent,
            0x04 => MotorFault::MosOverTemperature,
            0x05 => MotorFault::CoilOverTemperature,
            0x06 => MotorFault::CommunicationLost,
            0x07 => MotorFault::Overload,
            0x08 => MotorFault::EncoderError,
            other => MotorFault::Unknown(other),
        })
    }

    pub fn code(self) -> u8 {
        match self {
            MotorFault::OverVoltage => 0x01,
            MotorFault::UnderVoltage => 0x02,
            MotorFault::OverCurrent => 0x03,
            MotorFault::MosOverTemperature => 0x04,
            MotorFault::CoilOverTemperature => 0x05,
            MotorFault::CommunicationLost => 0x06,
            MotorFault::Overload => 0x07,
            MotorFault::EncoderError => 0x08,
            MotorFault::Unknown(code) => code,
        }
    }
}

impl fmt::Display for MotorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MotorFault::OverVoltage => "over-voltage",
            MotorFault::UnderVoltage => "under-voltage",
            MotorFault::OverCurrent => "over-current",
            MotorFault::MosOverTemperature => "MOS over-temperature",
            MotorFault::CoilOverTemperature => "coil over-temperature",
            MotorFault::CommunicationLost => "communication lost",
            MotorFault::Overload => "overload",
            MotorFault::EncoderError => "encoder error",
            MotorFault::Unknown(code) => return write!(f, "unknown fault 0x{code:02X}"),
        };
        f.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ControlMode {
    #[default]
    Disabled,
    Mit,
}

/// Hybrid position/velocity/torque set-point.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MitCommand {
    pub pos: f32,
    pub vel: f32,
    pub kp: f32,
    pub kd: f32,
    pub torque: f32,
}

impl MitCommand {
    pub fn new(pos: f32, vel: f32, kp: f32, kd: f32, torque: f32) -> Self {
        Self {
            pos,
            vel,
            kp,
            kd,
            torque,
        }
    }

    pub fn torque(torque: f32) -> Self {
        Self {
            torque,
            ..Self::default()
        }
    }
}

/// Decoded telemetry of one status frame.
///
/// `effort` is torque for REVO and phase current for ENCOS.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StatusFrame {
    pub pos: f32,
    pub vel: f32,
    pub effort: f32,
    pub error_code: u8,
    pub mos_temp: u8,
    pub coil_temp: Option<u8>,
}

/// Snapshot of everything a driver knows about its actuator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotorState {
    pub id: u16,
    pub model: MotorModel,
    pub pos: f32,
    pub vel: f32,
    pub effort: f32,
    pub error_code: u8,
    pub mos_temp: u8,
    pub coil_temp: Option<u8>,
    pub liveness: u32,
    pub mode: ControlMode,
}

impl MotorState {
    pub fn fault(&self) -> Option<MotorFault> {
        MotorFault::from_code(self.error_code)
    }
}

/// Flash parameters readable through the register channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FlashParam {
    QMax = 0x00,
    QMin = 0x01,
    DqMax = 0x02,
    DqMin = 0x03,
    TauMax = 0x04,
    TauMin = 0x05,
    OkpMax = 0x06,
    OkpMin = 0x07,
    OkdMax = 0x08,
    OkdMin = 0x09,
    IkpMax = 0x0A,
    IkpMin = 0x0B,
    IkiMax = 0x0C,
    IkiMin = 0x0D,
    CurMax = 0x0E,
    CurMin = 0x0F,
}

impl FlashParam {
    /// Object-dictionary index the parameter lives at.
    pub fn index(self) -> u16 {
        0x7000 + self as u16
    }
}
