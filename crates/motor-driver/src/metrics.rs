use crate::Result;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct MotorMetrics {
    pub tx_frames: IntCounter,
    pub rx_frames: IntCounter,
    pub clamped_fields: IntCounter,
    pub offline_events: IntCounter,
    pub aborted_ticks: IntCounter,
    pub motors_configured: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub motors: MotorMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let motors = MotorMetrics {
            tx_frames: IntCounter::new("atom_motor_tx_frames", "Frames sent to actuators")?,
            rx_frames: IntCounter::new(
                "atom_motor_rx_frames",
                "Status frames decoded from actuators",
            )?,
            clamped_fields: IntCounter::new(
                "atom_motor_clamped_fields",
                "Command fields clamped into the device range",
            )?,
            offline_events: IntCounter::new(
                "atom_motor_offline_events",
                "Actuators found past the liveness threshold",
            )?,
            aborted_ticks: IntCounter::new(
                "atom_control_aborted_ticks",
                "Control ticks aborted before the command phase",
            )?,
            motors_configured: IntGauge::new("atom_motors_configured", "Number of actuators")?,
        };
        registry.register(Box::new(motors.tx_frames.clone()))?;
        registry.register(Box::new(motors.rx_frames.clone()))?;
        registry.register(Box::new(motors.clamped_fields.clone()))?;
        registry.register(Box::new(motors.offline_events.clone()))?;
        registry.register(Box::new(motors.aborted_ticks.clone()))?;
        registry.register(Box::new(motors.motors_configured.clone()))?;
        Ok(Self { registry, motors })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
