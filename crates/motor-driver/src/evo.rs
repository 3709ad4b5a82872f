//! EVO family driver (REVO 4310 and ENCOS 8108 actuators).

use crate::decode::decode_status;
use crate::encode::{
    encode_command, read_param_frame, register_id, save_register_frame, write_register_frame,
    AdminCommand,
};
use crate::{
    ControlMode, FlashParam, MitCommand, Motor, MotorError, MotorFault, MotorMetrics, MotorModel,
    MotorSpec, MotorState, MotorTiming, Result, StatusFrame,
};
use can_transport::{CanFrame, CanId, CanTransport, FrameHandler};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, trace, warn};

/// State written by the receive thread.
struct Feedback {
    model: MotorModel,
    status: Mutex<StatusFrame>,
    liveness: AtomicU32,
    metrics: Option<MotorMetrics>,
}

impl Feedback {
    fn on_frame(&self, frame: &CanFrame) {
        let Some(status) = decode_status(self.model, frame.payload()) else {
            trace!(%frame, "ignoring non-status frame");
            return;
        };
        *self.status.lock() = status;
        // Release: a reader that sees 0 also sees the status stored above.
        self.liveness.store(0, Ordering::Release);
        if let Some(m) = &self.metrics {
            m.rx_frames.inc();
        }
    }
}

pub struct EvoMotor {
    id: u16,
    master_id: u16,
    model: MotorModel,
    command_id: CanId,
    register_id: CanId,
    transport: Arc<CanTransport>,
    handler: FrameHandler,
    feedback: Arc<Feedback>,
    mit_mode: AtomicBool,
    timing: MotorTiming,
    metrics: Option<MotorMetrics>,
}

impl EvoMotor {
    pub fn new(
        spec: MotorSpec,
        transport: Arc<CanTransport>,
        timing: MotorTiming,
        metrics: Option<MotorMetrics>,
    ) -> Result<Self> {
        let command_id = CanId::standard(spec.id).ok_or(MotorError::InvalidId(spec.id))?;
        let register_id = register_id(spec.id).ok_or(MotorError::InvalidId(spec.id))?;
        let master_id = spec
            .id
            .checked_add(spec.master_id_offset)
            .ok_or(MotorError::InvalidId(spec.id))?;

        let feedback = Arc::new(Feedback {
            model: spec.model,
            status: Mutex::new(StatusFrame::default()),
            liveness: AtomicU32::new(0),
            metrics: metrics.clone(),
        });
        let sink = Arc::clone(&feedback);
        let handler: FrameHandler = Arc::new(move |frame: &CanFrame| sink.on_frame(frame));
        transport.register(u32::from(master_id), Arc::clone(&handler));
        debug!(
            id = spec.id,
            master_id,
            model = %spec.model,
            iface = transport.name(),
            "evo motor attached"
        );

        Ok(Self {
            id: spec.id,
            master_id,
            model: spec.model,
            command_id,
            register_id,
            transport,
            handler,
            feedback,
            mit_mode: AtomicBool::new(false),
            timing,
            metrics,
        })
    }

    pub fn master_id(&self) -> u16 {
        self.master_id
    }

    fn send(&self, frame: &CanFrame) -> Result<()> {
        // Counted before the write so that a fast reply always resets it afterwards.
        self.feedback.liveness.fetch_add(1, Ordering::AcqRel);
        self.transport
            .transmit(frame)
            .map_err(|source| MotorError::Transport {
                id: self.id,
                source,
            })?;
        if let Some(m) = &self.metrics {
            m.tx_frames.inc();
        }
        Ok(())
    }

    fn send_admin(&self, cmd: AdminCommand) -> Result<()> {
        trace!(id = self.id, ?cmd, "admin");
        self.send(&CanFrame::data8(self.command_id, cmd.payload()))
    }

    fn settle(&self) {
        thread::sleep(self.timing.settle);
    }

    fn position(&self) -> f32 {
        self.feedback.status.lock().pos
    }
}

impl Motor for EvoMotor {
    fn id(&self) -> u16 {
        self.id
    }

    fn model(&self) -> MotorModel {
        self.model
    }

    fn lock(&self) -> Result<()> {
        self.send_admin(AdminCommand::Lock)
    }

    fn unlock(&self) -> Result<()> {
        self.send_admin(AdminCommand::Unlock)
    }

    fn init(&self) -> Result<Option<MotorFault>> {
        self.unlock()?;
        self.settle();
        self.set_control_mode(ControlMode::Mit);
        self.settle();
        self.lock()?;
        self.settle();
        self.refresh_status()?;
        self.settle();

        let fault = MotorFault::from_code(self.feedback.status.lock().error_code);
        match fault {
            Some(f) => warn!(id = self.id, fault = %f, "motor reports fault after init"),
            None => debug!(id = self.id, "motor initialized"),
        }
        Ok(fault)
    }

    fn deinit(&self) -> Result<()> {
        self.unlock()?;
        self.settle();
        Ok(())
    }

    fn set_zero(&self) -> Result<bool> {
        self.send_admin(AdminCommand::SetZero)?;
        thread::sleep(self.timing.zero_settle);
        let pos = self.position();
        info!(id = self.id, pos, "zero position set");
        self.unlock()?;
        if pos.abs() > self.timing.zero_tolerance {
            warn!(id = self.id, pos, "position did not settle at zero");
            return Ok(false);
        }
        Ok(true)
    }

    fn clear_error(&self) -> Result<()> {
        self.send_admin(AdminCommand::ClearError)
    }

    fn refresh_status(&self) -> Result<()> {
        self.send_admin(AdminCommand::Refresh)
    }

    fn mit_command(&self, cmd: MitCommand) -> Result<()> {
        if self.control_mode() != ControlMode::Mit {
            // The device needs the mode switch first; this set-point is dropped.
            self.set_control_mode(ControlMode::Mit);
            debug!(id = self.id, "switched to MIT mode, command dropped");
            return Ok(());
        }
        let encoded = encode_command(self.model, &cmd);
        if encoded.clamped > 0 {
            if let Some(m) = &self.metrics {
                m.clamped_fields.inc_by(u64::from(encoded.clamped));
            }
        }
        self.send(&CanFrame::data8(self.command_id, encoded.data))
    }

    fn read_param(&self, param: FlashParam) -> Result<()> {
        self.send(&read_param_frame(self.register_id, param))
    }

    fn write_register(&self, index: u16, subindex: u8, value: i32) -> Result<()> {
        self.send(&write_register_frame(self.register_id, index, subindex, value))
    }

    fn save_register(&self, rid: u8) -> Result<()> {
        self.send(&save_register_frame(self.register_id, rid))
    }

    fn control_mode(&self) -> ControlMode {
        if self.mit_mode.load(Ordering::Acquire) {
            ControlMode::Mit
        } else {
            ControlMode::Disabled
        }
    }

    fn set_control_mode(&self, mode: ControlMode) {
        self.mit_mode
            .store(mode == ControlMode::Mit, Ordering::Release);
    }

    fn state(&self) -> MotorState {
        let liveness = self.liveness();
        let status = *self.feedback.status.lock();
        MotorState {
            id: self.id,
            model: self.model,
            pos: status.pos,
            vel: status.vel,
            effort: status.effort,
            error_code: status.error_code,
            mos_temp: status.mos_temp,
            coil_temp: status.coil_temp,
            liveness,
            mode: self.control_mode(),
        }
    }

    fn liveness(&self) -> u32 {
        self.feedback.liveness.load(Ordering::Acquire)
    }
}

impl Drop for EvoMotor {
    fn drop(&mut self) {
        // A replacement motor on the same id may own the route by now.
        self.transport
            .unregister_handler(u32::from(self.master_id), &self.handler);
    }
}
