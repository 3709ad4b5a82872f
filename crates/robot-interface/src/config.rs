//! YAML robot description: actuators per interface, joint gains and linkages.

use crate::decouple::Side;
use can_transport::{Backend, SlcanBitrate};
use motor_driver::{DriverKind, MotorModel, MotorTiming};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("missing `{0}` section")]
    MissingSection(&'static str),
    #[error("`{field}` has {found} entries, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("motor_num adds up to {declared} actuators but motor_id lists {listed}")]
    MotorCount { declared: usize, listed: usize },
    #[error("no motor interfaces configured")]
    NoInterfaces,
    #[error("unknown motor type `{0}`")]
    UnknownMotorType(String),
    #[error("unknown motor model {0}")]
    UnknownModel(u8),
    #[error("unknown motor interface type `{0}`")]
    UnknownInterfaceType(String),
    #[error("motor_sign[{index}] is {value}, must be 1 or -1")]
    InvalidSign { index: usize, value: i8 },
    #[error("closed chain needs exactly 2 motors, got {0}")]
    ChainSize(usize),
    #[error("closed chain references unknown motor id {0}")]
    UnknownChainMotor(u16),
    #[error("motor id {0} listed twice")]
    DuplicateMotorId(u16),
    #[error("motor id {0} belongs to more than one closed chain")]
    MotorInTwoChains(u16),
    #[error("two closed chains on the {0:?} side")]
    DuplicateSide(Side),
}

pub type Result<T, E = ConfigError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    motors: Option<MotorsConfig>,
    robot: Option<JointsConfig>,
    imu: Option<serde_yaml::Value>,
}

/// A validated robot description.
#[derive(Debug, Clone)]
pub struct RobotConfig {
    pub motors: MotorsConfig,
    pub robot: JointsConfig,
    /// Orientation sensor section, passed through untouched.
    pub imu: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotorsConfig {
    /// Status replies arrive on `motor_id + master_id_offset`.
    #[serde(default = "default_master_id_offset")]
    pub master_id_offset: u16,
    pub motor_type: String,
    pub motor_interface_type: String,
    /// Interface names, in the order their actuators appear in `motor_id`.
    pub motor_interface: Vec<String>,
    /// Actuators per interface.
    pub motor_num: Vec<usize>,
    pub motor_id: Vec<u16>,
    pub motor_model: Vec<u8>,
    #[serde(default = "default_offline_threshold")]
    pub offline_threshold: u32,
    #[serde(default)]
    pub timing: TimingConfig,
}

fn default_master_id_offset() -> u16 {
    0x10
}

fn default_offline_threshold() -> u32 {
    10
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub settle_ms: u64,
    pub zero_settle_ms: u64,
    /// Between the half-gain and the full-gain wave of a reset.
    pub reset_settle_ms: u64,
    /// Between the refresh request and reading the replies.
    pub refresh_settle_ms: u64,
    pub zero_tolerance: f32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: 10,
            zero_settle_ms: 100,
            reset_settle_ms: 1000,
            refresh_settle_ms: 5,
            zero_tolerance: 0.1,
        }
    }
}

impl TimingConfig {
    pub fn motor_timing(&self) -> MotorTiming {
        MotorTiming {
            settle: Duration::from_millis(self.settle_ms),
            zero_settle: Duration::from_millis(self.zero_settle_ms),
            zero_tolerance: self.zero_tolerance,
        }
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    pub fn refresh_settle(&self) -> Duration {
        Duration::from_millis(self.refresh_settle_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JointsConfig {
    pub kp: Vec<f32>,
    pub kd: Vec<f32>,
    pub motor_sign: Vec<i8>,
    #[serde(default)]
    pub closed_chains: Vec<ClosedChain>,
    #[serde(default)]
    pub default_angles: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClosedChain {
    /// Motor ids; the first drives joint slot 0 (roll), the second slot 1 (pitch).
    pub motors: Vec<u16>,
    pub side: Side,
}

/// A closed chain resolved to actuator indices.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ChainIndices {
    pub side: Side,
    pub idx: [usize; 2],
}

impl MotorsConfig {
    pub fn motor_count(&self) -> usize {
        self.motor_id.len()
    }

    pub fn driver_kind(&self) -> Result<DriverKind> {
        self.motor_type
            .parse()
            .map_err(|_| ConfigError::UnknownMotorType(self.motor_type.clone()))
    }

    /// Bus backend for `motor_interface_type`.
    pub fn backend(&self) -> Result<Backend> {
        match self.motor_interface_type.to_ascii_lowercase().as_str() {
            "can" => Ok(Backend::SocketCan),
            "serial" => Ok(Backend::Slcan {
                bitrate: SlcanBitrate::B1M,
            }),
            "mock" => Ok(Backend::Mock),
            _ => Err(ConfigError::UnknownInterfaceType(
                self.motor_interface_type.clone(),
            )),
        }
    }

    pub fn models(&self) -> Result<Vec<MotorModel>> {
        self.motor_model
            .iter()
            .map(|&m| MotorModel::try_from(m).map_err(|_| ConfigError::UnknownModel(m)))
            .collect()
    }

    /// Contiguous actuator index range owned by each interface.
    pub fn groups(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.motor_num
            .iter()
            .map(|&n| {
                let range = start..start + n;
                start += n;
                range
            })
            .collect()
    }

    pub fn index_of(&self, id: u16) -> Option<usize> {
        self.motor_id.iter().position(|&m| m == id)
    }

    fn validate(&self) -> Result<()> {
        if self.motor_interface.is_empty() {
            return Err(ConfigError::NoInterfaces);
        }
        check_len("motor_num", self.motor_interface.len(), self.motor_num.len())?;
        let declared: usize = self.motor_num.iter().sum();
        if declared != self.motor_id.len() {
            return Err(ConfigError::MotorCount {
                declared,
                listed: self.motor_id.len(),
            });
        }
        check_len("motor_model", self.motor_id.len(), self.motor_model.len())?;
        let mut seen = HashSet::new();
        for &id in &self.motor_id {
            if !seen.insert(id) {
                return Err(ConfigError::DuplicateMotorId(id));
            }
        }
        self.driver_kind()?;
        self.backend()?;
        self.models()?;
        Ok(())
    }
}

fn check_len(field: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(ConfigError::LengthMismatch {
            field,
            expected,
            found,
        });
    }
    Ok(())
}

impl RobotConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(raw)?;
        let config = Self {
            motors: file.motors.ok_or(ConfigError::MissingSection("motors"))?,
            robot: file.robot.ok_or(ConfigError::MissingSection("robot"))?,
            imu: file.imu,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.motors.validate()?;
        let n = self.motors.motor_count();
        let joints = &self.robot;
        check_len("kp", n, joints.kp.len())?;
        check_len("kd", n, joints.kd.len())?;
        check_len("motor_sign", n, joints.motor_sign.len())?;
        if let Some(angles) = &joints.default_angles {
            check_len("default_angles", n, angles.len())?;
        }
        for (index, &value) in joints.motor_sign.iter().enumerate() {
            if value != 1 && value != -1 {
                return Err(ConfigError::InvalidSign { index, value });
            }
        }
        self.chain_indices()?;
        Ok(())
    }

    /// Resolve every closed chain from motor ids to actuator indices.
    pub fn chain_indices(&self) -> Result<Vec<ChainIndices>> {
        let mut owned = HashSet::new();
        let mut sides = HashSet::new();
        let mut chains = Vec::with_capacity(self.robot.closed_chains.len());
        for chain in &self.robot.closed_chains {
            let &[a, b] = chain.motors.as_slice() else {
                return Err(ConfigError::ChainSize(chain.motors.len()));
            };
            if !sides.insert(chain.side) {
                return Err(ConfigError::DuplicateSide(chain.side));
            }
            let mut idx = [0; 2];
            for (slot, id) in [a, b].into_iter().enumerate() {
                let i = self
                    .motors
                    .index_of(id)
                    .ok_or(ConfigError::UnknownChainMotor(id))?;
                if !owned.insert(i) {
                    return Err(ConfigError::MotorInTwoChains(id));
                }
                idx[slot] = i;
            }
            chains.push(ChainIndices {
                side: chain.side,
                idx,
            });
        }
        Ok(chains)
    }

    /// Per-actuator sign multipliers as floats.
    pub fn signs(&self) -> Vec<f32> {
        self.robot.motor_sign.iter().map(|&s| f32::from(s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"
motors:
  master_id_offset: 16
  motor_type: evo
  motor_interface_type: mock
  motor_interface: [can0, can1]
  motor_num: [2, 2]
  motor_id: [1, 2, 3, 4]
  motor_model: [1, 1, 0, 0]
robot:
  kp: [40, 40, 20, 20]
  kd: [2, 2, 1, 1]
  motor_sign: [1, -1, 1, 1]
  closed_chains:
    - { motors: [3, 4], side: left }
"#;

    fn with(replace: &str, by: &str) -> Result<RobotConfig> {
        RobotConfig::from_yaml_str(&SMALL.replace(replace, by))
    }

    #[test]
    fn test_parse_small_config() {
        let cfg = RobotConfig::from_yaml_str(SMALL).unwrap();
        assert_eq!(cfg.motors.motor_count(), 4);
        assert_eq!(cfg.motors.groups(), vec![0..2, 2..4]);
        assert_eq!(cfg.motors.backend().unwrap(), Backend::Mock);
        assert_eq!(cfg.motors.offline_threshold, 10);
        assert_eq!(cfg.motors.timing.reset_settle_ms, 1000);
        assert_eq!(
            cfg.chain_indices().unwrap(),
            vec![ChainIndices {
                side: Side::Left,
                idx: [2, 3]
            }]
        );
        assert_eq!(cfg.signs(), vec![1.0, -1.0, 1.0, 1.0]);
        assert!(cfg.imu.is_none());
    }

    #[test]
    fn test_missing_sections_are_fatal() {
        let err = RobotConfig::from_yaml_str("robot: {kp: [], kd: [], motor_sign: []}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection("motors")));
        let motors_only = SMALL.split("robot:").next().unwrap();
        let err = RobotConfig::from_yaml_str(motors_only).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection("robot")));
    }

    #[test]
    fn test_counts_and_lengths_checked() {
        assert!(matches!(
            with("motor_num: [2, 2]", "motor_num: [2, 1]"),
            Err(ConfigError::MotorCount {
                declared: 3,
                listed: 4
            })
        ));
        assert!(matches!(
            with("kd: [2, 2, 1, 1]", "kd: [2, 2, 1]"),
            Err(ConfigError::LengthMismatch { field: "kd", .. })
        ));
        assert!(matches!(
            with("motor_id: [1, 2, 3, 4]", "motor_id: [1, 2, 3, 1]"),
            Err(ConfigError::DuplicateMotorId(1))
        ));
    }

    #[test]
    fn test_unknown_names_rejected() {
        assert!(matches!(
            with("motor_type: evo", "motor_type: dm"),
            Err(ConfigError::UnknownMotorType(t)) if t == "dm"
        ));
        assert!(matches!(
            with("motor_interface_type: mock", "motor_interface_type: ethercat"),
            Err(ConfigError::UnknownInterfaceType(_))
        ));
        assert!(matches!(
            with("motor_model: [1, 1, 0, 0]", "motor_model: [1, 1, 0, 7]"),
            Err(ConfigError::UnknownModel(7))
        ));
    }

    #[test]
    fn test_sign_must_be_unit() {
        assert!(matches!(
            with("motor_sign: [1, -1, 1, 1]", "motor_sign: [1, -1, 0, 1]"),
            Err(ConfigError::InvalidSign { index: 2, value: 0 })
        ));
    }

    #[test]
    fn test_chain_rules() {
        assert!(matches!(
            with("motors: [3, 4]", "motors: [3]"),
            Err(ConfigError::ChainSize(1))
        ));
        assert!(matches!(
            with("motors: [3, 4]", "motors: [3, 9]"),
            Err(ConfigError::UnknownChainMotor(9))
        ));
        let two_chains = SMALL.replace(
            "    - { motors: [3, 4], side: left }",
            "    - { motors: [3, 4], side: left }\n    - { motors: [4, 1], side: right }",
        );
        assert!(matches!(
            RobotConfig::from_yaml_str(&two_chains),
            Err(ConfigError::MotorInTwoChains(4))
        ));
        let same_side = SMALL.replace(
            "    - { motors: [3, 4], side: left }",
            "    - { motors: [3, 4], side: left }\n    - { motors: [1, 2], side: left }",
        );
        assert!(matches!(
            RobotConfig::from_yaml_str(&same_side),
            Err(ConfigError::DuplicateSide(Side::Left))
        ));
    }

    #[test]
    fn test_timing_overrides() {
        let cfg = with(
            "  motor_model: [1, 1, 0, 0]",
            "  motor_model: [1, 1, 0, 0]\n  offline_threshold: 3\n  timing: { settle_ms: 2, reset_settle_ms: 50 }",
        )
        .unwrap();
        assert_eq!(cfg.motors.offline_threshold, 3);
        let timing = cfg.motors.timing;
        assert_eq!(timing.reset_settle(), Duration::from_millis(50));
        assert_eq!(timing.motor_timing().settle, Duration::from_millis(2));
        assert_eq!(timing.zero_settle_ms, 100);
    }

    #[test]
    fn test_bundled_atom01_config() {
        let cfg = RobotConfig::from_yaml_str(include_str!("../../../configs/atom01.yaml")).unwrap();
        assert_eq!(cfg.motors.motor_count(), 12);
        assert_eq!(cfg.motors.backend().unwrap(), Backend::SocketCan);
        let chains = cfg.chain_indices().unwrap();
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].idx, [4, 5]);
        assert_eq!(chains[1].side, Side::Right);
        assert_eq!(cfg.robot.default_angles.as_ref().map(Vec::len), Some(12));
    }

    #[test]
    fn test_load_reports_path() {
        let err = RobotConfig::load("/nonexistent/atom.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/atom.yaml"));
    }
}
