//! Simulated EVO actuators that answer on a [`MockBus`](can_transport::MockBus) wire.
//!
//! Every frame addressed to a known motor id gets a status reply on
//! `id + master_id_offset`, the way the real devices behave. A motor can be
//! made silent to exercise the offline path.

use crate::decode::encode_status;
use crate::encode::{decode_command, AdminCommand};
use crate::{MitCommand, MotorModel, StatusFrame};
use can_transport::{CanFrame, CanId, MockHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
struct SimMotor {
    model: MotorModel,
    status: StatusFrame,
    silent: bool,
    zero_sticks: bool,
    commands: Vec<MitCommand>,
}

impl SimMotor {
    fn new(model: MotorModel) -> Self {
        Self {
            model,
            status: StatusFrame {
                mos_temp: 30,
                coil_temp: model.layout().status.coil_temp.map(|_| 30),
                ..StatusFrame::default()
            },
            silent: false,
            zero_sticks: true,
            commands: Vec::new(),
        }
    }

    fn handle(&mut self, data: &[u8; 8]) {
        if data[..7] == [0xFF; 7] {
            if data[7] == AdminCommand::SetZero.final_byte() && self.zero_sticks {
                self.status.pos = 0.0;
            }
            return;
        }
        let cmd = decode_command(self.model, data);
        // stiff enough to track the set-point within one exchange
        if cmd.kp > 0.0 {
            self.status.pos = cmd.pos;
        }
        self.status.vel = cmd.vel;
        self.status.effort = cmd.torque;
        self.commands.push(cmd);
    }
}

/// A set of simulated motors sharing one bus.
#[derive(Clone)]
pub struct SimulatedBus {
    master_id_offset: u16,
    motors: Arc<Mutex<HashMap<u16, SimMotor>>>,
}

impl SimulatedBus {
    pub fn new(master_id_offset: u16) -> Self {
        Self {
            master_id_offset,
            motors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn add_motor(&self, id: u16, model: MotorModel) {
        self.motors.lock().insert(id, SimMotor::new(model));
    }

    /// Install this simulation as the responder of `wire`.
    pub fn attach(&self, wire: &MockHandle) {
        let sim = self.clone();
        wire.set_responder(move |frame| sim.respond(frame));
    }

    fn respond(&self, frame: &CanFrame) -> Vec<CanFrame> {
        if frame.len != 8 || frame.id.is_extended() {
            return Vec::new();
        }
        let Ok(id) = u16::try_from(frame.id.raw()) else {
            return Vec::new();
        };
        let mut motors = self.motors.lock();
        let Some(motor) = motors.get_mut(&id) else {
            return Vec::new();
        };
        motor.handle(&frame.data);
        if motor.silent {
            return Vec::new();
        }
        let reply_id = id
            .checked_add(self.master_id_offset)
            .and_then(CanId::standard);
        let tag = (id & 0xFF) as u8;
        reply_id
            .map(|rid| CanFrame::data8(rid, encode_status(motor.model, &motor.status, tag)))
            .into_iter()
            .collect()
    }

    fn with_motor(&self, id: u16, f: impl FnOnce(&mut SimMotor)) {
        if let Some(m) = self.motors.lock().get_mut(&id) {
            f(m);
        }
    }

    /// Stop (or resume) answering frames for `id`.
    pub fn set_silent(&self, id: u16, silent: bool) {
        self.with_motor(id, |m| m.silent = silent);
    }

    pub fn set_error(&self, id: u16, code: u8) {
        self.with_motor(id, |m| m.status.error_code = code);
    }

    pub fn set_position(&self, id: u16, pos: f32) {
        self.with_motor(id, |m| m.status.pos = pos);
    }

    pub fn set_velocity(&self, id: u16, vel: f32) {
        self.with_motor(id, |m| m.status.vel = vel);
    }

    /// Whether a set-zero request actually moves the reported position to 0.
    pub fn set_zero_sticks(&self, id: u16, sticks: bool) {
        self.with_motor(id, |m| m.zero_sticks = sticks);
    }

    /// MIT commands received by `id`, oldest first.
    pub fn commands(&self, id: u16) -> Vec<MitCommand> {
        self.motors
            .lock()
            .get(&id)
            .map(|m| m.commands.clone())
            .unwrap_or_default()
    }

    pub fn clear_commands(&self) {
        for m in self.motors.lock().values_mut() {
            m.commands.clear();
        }
    }
}
