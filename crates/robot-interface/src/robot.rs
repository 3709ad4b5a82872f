//! The actuator orchestrator: one control tick per call, plus bring-up and
//! maintenance operations fanned out over the bus interfaces.

use crate::config::{ChainIndices, RobotConfig};
use crate::decouple::{Decoupler, PairState};
use crate::dispatch::DispatchPool;
use crate::error::{Result, RobotError};
use can_transport::BusRegistry;
use motor_driver::{create_motor, MetricsHub, MitCommand, Motor, MotorSpec, MotorState};
use nalgebra::Vector2;
use parking_lot::Mutex;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Immutable per-joint parameters shared with dispatch tasks.
struct JointParams {
    kp: Vec<f32>,
    kd: Vec<f32>,
    sign: Vec<f32>,
    coupled: Vec<bool>,
    chains: Vec<ChainIndices>,
}

/// Joint-space values of one read phase.
#[derive(Clone, Debug)]
struct JointFrame {
    q: Vec<f32>,
    v: Vec<f32>,
    tau: Vec<f32>,
}

impl JointFrame {
    fn zeros(n: usize) -> Self {
        Self {
            q: vec![0.0; n],
            v: vec![0.0; n],
            tau: vec![0.0; n],
        }
    }

    fn from_readings(readings: &[Reading], sign: &[f32]) -> Self {
        let scaled = |field: fn(&Reading) -> f32| -> Vec<f32> {
            readings.iter().zip(sign).map(|(r, s)| field(r) * s).collect()
        };
        Self {
            q: scaled(|r| r.pos),
            v: scaled(|r| r.vel),
            tau: scaled(|r| r.effort),
        }
    }

    fn pair(&self, [a, b]: [usize; 2]) -> PairState {
        let v2 = |x: &[f32]| Vector2::new(f64::from(x[a]), f64::from(x[b]));
        PairState::new(
            v2(self.q.as_slice()),
            v2(self.v.as_slice()),
            v2(self.tau.as_slice()),
        )
    }

    fn set_pair(&mut self, [a, b]: [usize; 2], pair: &PairState) {
        for (slot, i) in [a, b].into_iter().enumerate() {
            self.q[i] = pair.q[slot] as f32;
            self.v[i] = pair.v[slot] as f32;
            self.tau[i] = pair.tau[slot] as f32;
        }
    }
}

struct JointState {
    current: JointFrame,
    decoupler: Decoupler,
}

impl JointState {
    fn new(n: usize) -> Self {
        Self {
            current: JointFrame::zeros(n),
            decoupler: Decoupler::default(),
        }
    }

    /// Map actuator readings to joint space and make them current.
    ///
    /// Returns each chain's joint-space solution in chain order. If any chain
    /// fails to solve, the current frame keeps its previous values.
    fn update(
        &mut self,
        readings: &[Reading],
        sign: &[f32],
        chains: &[ChainIndices],
    ) -> Result<Vec<PairState>> {
        let mut frame = JointFrame::from_readings(readings, sign);
        let mut solved = Vec::with_capacity(chains.len());
        for chain in chains {
            let joint = self.decoupler.forward(chain.side, &frame.pair(chain.idx))?;
            frame.set_pair(chain.idx, &joint);
            solved.push(joint);
        }
        self.current = frame;
        Ok(solved)
    }
}

#[derive(Clone, Copy, Debug)]
struct Reading {
    id: u16,
    pos: f32,
    vel: f32,
    effort: f32,
    liveness: u32,
}

impl Reading {
    fn of(motor: &dyn Motor) -> Self {
        let s = motor.state();
        Self {
            id: s.id,
            pos: s.pos,
            vel: s.vel,
            effort: s.effort,
            liveness: s.liveness,
        }
    }
}

/// Drives every actuator of the robot through one synchronous surface.
///
/// Actuators are grouped by bus interface; each group is served by one
/// dispatch worker, in index order, while groups run concurrently.
pub struct RobotInterface {
    config: RobotConfig,
    motors: Arc<Vec<Arc<dyn Motor>>>,
    groups: Vec<Range<usize>>,
    params: Arc<JointParams>,
    pool: DispatchPool,
    // Serializes whole fan-outs; always taken after `joints`.
    dispatch_lock: Mutex<()>,
    joints: Mutex<JointState>,
    initialized: AtomicBool,
    offline_threshold: u32,
    reset_settle: Duration,
    refresh_settle: Duration,
    metrics: MetricsHub,
    _registry: Arc<BusRegistry>,
}

impl RobotInterface {
    pub fn new(config: RobotConfig) -> Result<Self> {
        Self::with_registry(config, Arc::new(BusRegistry::new()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(RobotConfig::load(path)?)
    }

    /// Build on an existing registry; interfaces already attached to it are reused.
    pub fn with_registry(config: RobotConfig, registry: Arc<BusRegistry>) -> Result<Self> {
        config.validate()?;
        let mc = &config.motors;
        let backend = mc.backend()?;
        let kind = mc.driver_kind()?;
        let models = mc.models()?;
        let timing = mc.timing.motor_timing();
        let groups = mc.groups();
        let metrics = MetricsHub::new()?;

        let mut motors: Vec<Arc<dyn Motor>> = Vec::with_capacity(mc.motor_count());
        for (iface, range) in mc.motor_interface.iter().zip(&groups) {
            let transport = registry.get_or_open(iface, backend)?;
            for idx in range.clone() {
                let spec = MotorSpec {
                    id: mc.motor_id[idx],
                    model: models[idx],
                    master_id_offset: mc.master_id_offset,
                };
                motors.push(create_motor(
                    kind,
                    spec,
                    Arc::clone(&transport),
                    timing,
                    Some(metrics.motors.clone()),
                )?);
            }
        }
        let n = motors.len();
        metrics.motors.motors_configured.set(n as i64);
        let offline_threshold = mc.offline_threshold;
        let reset_settle = mc.timing.reset_settle();
        let refresh_settle = mc.timing.refresh_settle();

        let chains = config.chain_indices()?;
        let mut coupled = vec![false; n];
        for chain in &chains {
            for &i in &chain.idx {
                coupled[i] = true;
            }
        }
        let params = JointParams {
            kp: config.robot.kp.clone(),
            kd: config.robot.kd.clone(),
            sign: config.signs(),
            coupled,
            chains,
        };
        let pool = DispatchPool::new(groups.len())?;
        info!(
            motors = n,
            interfaces = groups.len(),
            chains = params.chains.len(),
            "robot interface ready"
        );

        Ok(Self {
            offline_threshold,
            reset_settle,
            refresh_settle,
            motors: Arc::new(motors),
            groups,
            params: Arc::new(params),
            pool,
            dispatch_lock: Mutex::new(()),
            joints: Mutex::new(JointState::new(n)),
            initialized: AtomicBool::new(false),
            metrics,
            config,
            _registry: registry,
        })
    }

    /// Run `op` on every actuator, one task per interface.
    ///
    /// Returns the per-actuator values in index order, or every failure that
    /// occurred across all interfaces.
    fn exec_parallel<T, F>(&self, op: F) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(&dyn Motor, usize) -> Result<T> + Send + Sync + 'static,
    {
        let _guard = self.dispatch_lock.lock();
        let op = Arc::new(op);
        let tasks: Vec<_> = self
            .groups
            .iter()
            .cloned()
            .map(|range| {
                let motors = Arc::clone(&self.motors);
                let op = Arc::clone(&op);
                move || {
                    range
                        .map(|idx| op(motors[idx].as_ref(), idx))
                        .collect::<Vec<_>>()
                }
            })
            .collect();

        let mut values = Vec::with_capacity(self.motors.len());
        let mut errors = Vec::new();
        for outcome in self.pool.run_parallel(tasks) {
            match outcome {
                Ok(results) => {
                    for r in results {
                        match r {
                            Ok(v) => values.push(v),
                            Err(e) => errors.push(e),
                        }
                    }
                }
                Err(e) => errors.push(e.into()),
            }
        }
        match RobotError::collect(errors) {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }

    fn read_all(&self) -> Result<Vec<Reading>> {
        self.exec_parallel(|motor, _| Ok(Reading::of(motor)))
    }

    fn check_len(&self, found: usize) -> Result<()> {
        let expected = self.motors.len();
        if found != expected {
            return Err(RobotError::ActionLength { expected, found });
        }
        Ok(())
    }

    /// One control tick: read, decouple, command.
    ///
    /// Does nothing until [`init_motors`](Self::init_motors) succeeded. If any
    /// actuator has gone more than `offline_threshold` frames without a reply,
    /// the tick is aborted before anything is sent and every such actuator is
    /// listed in [`RobotError::ActuatorOffline`]. The next tick checks again.
    pub fn apply_action(&self, action: &[f32]) -> Result<()> {
        if !self.is_initialized() {
            trace!("apply_action before init ignored");
            return Ok(());
        }
        self.check_len(action.len())?;
        let params = &self.params;
        let mut commands = action.to_vec();
        {
            let mut joints = self.joints.lock();
            let readings = self.read_all()?;
            let offline: Vec<u16> = readings
                .iter()
                .filter(|r| r.liveness > self.offline_threshold)
                .map(|r| r.id)
                .collect();
            if !offline.is_empty() {
                let m = &self.metrics.motors;
                m.offline_events.inc_by(offline.len() as u64);
                m.aborted_ticks.inc();
                warn!(motors = ?offline, threshold = self.offline_threshold, "actuators offline, tick aborted");
                return Err(RobotError::ActuatorOffline { motors: offline });
            }
            let solved = joints.update(&readings, &params.sign, &params.chains)?;

            for (chain, joint) in params.chains.iter().zip(&solved) {
                let [a, b] = chain.idx;
                let pd = |i: usize, slot: usize| {
                    f64::from(params.kp[i]) * (f64::from(action[i]) - joint.q[slot])
                        + f64::from(params.kd[i]) * (0.0 - joint.v[slot])
                };
                let target = PairState::new(joint.q, joint.v, Vector2::new(pd(a, 0), pd(b, 1)));
                let out = joints.decoupler.inverse(chain.side, &target)?;
                commands[a] = out.tau[0] as f32;
                commands[b] = out.tau[1] as f32;
            }
        }

        let params = Arc::clone(&self.params);
        let commands = Arc::new(commands);
        self.exec_parallel(move |motor, idx| {
            let sign = params.sign[idx];
            let cmd = if params.coupled[idx] {
                MitCommand::torque(commands[idx] * sign)
            } else {
                MitCommand::new(commands[idx] * sign, 0.0, params.kp[idx], params.kd[idx], 0.0)
            };
            Ok(motor.mit_command(cmd)?)
        })?;
        Ok(())
    }

    /// Move every joint to `targets` in two waves: half gains, a pause, full gains.
    pub fn reset_joints(&self, targets: &[f32]) -> Result<()> {
        if !self.is_initialized() {
            return Err(RobotError::NotInitialized);
        }
        self.check_len(targets.len())?;
        let mut positions = targets.to_vec();
        {
            let joints = self.joints.lock();
            for chain in &self.params.chains {
                let [a, b] = chain.idx;
                let q = Vector2::new(f64::from(targets[a]), f64::from(targets[b]));
                let pair = PairState::new(q, Vector2::zeros(), Vector2::zeros());
                let out = joints.decoupler.inverse(chain.side, &pair)?;
                positions[a] = out.q[0] as f32;
                positions[b] = out.q[1] as f32;
            }
        }
        let positions = Arc::new(positions);
        info!(settle_ms = self.reset_settle.as_millis() as u64, "resetting joints");
        self.position_wave(&positions, 0.5)?;
        thread::sleep(self.reset_settle);
        self.position_wave(&positions, 1.0)
    }

    fn position_wave(&self, positions: &Arc<Vec<f32>>, gain: f32) -> Result<()> {
        let params = Arc::clone(&self.params);
        let positions = Arc::clone(positions);
        self.exec_parallel(move |motor, idx| {
            let cmd = MitCommand::new(
                positions[idx] * params.sign[idx],
                0.0,
                params.kp[idx] * gain,
                params.kd[idx] * gain,
                0.0,
            );
            Ok(motor.mit_command(cmd)?)
        })?;
        Ok(())
    }

    /// Ask every actuator for a fresh status and rebuild the joint state from it.
    pub fn refresh_joints(&self) -> Result<()> {
        let mut joints = self.joints.lock();
        self.exec_parallel(|motor, _| Ok(motor.refresh_status()?))?;
        thread::sleep(self.refresh_settle);
        let readings = self.read_all()?;
        joints.update(&readings, &self.params.sign, &self.params.chains)?;
        debug!("joint state refreshed");
        Ok(())
    }

    /// Bring every actuator into control mode.
    ///
    /// The robot only counts as initialized if no actuator reports a fault;
    /// otherwise the first faulty actuator in index order is returned.
    pub fn init_motors(&self) -> Result<()> {
        let faults = self.exec_parallel(|motor, _| Ok(motor.init()?))?;
        let first = faults
            .iter()
            .zip(self.motors.iter())
            .find_map(|(f, m)| f.map(|fault| (m.id(), fault)));
        if let Some((id, fault)) = first {
            warn!(id, %fault, "init aborted by device fault");
            return Err(RobotError::DeviceFault { id, fault });
        }
        // Release: a tick that observes `true` also observes the bring-up above.
        self.initialized.store(true, Ordering::Release);
        info!("motors initialized");
        Ok(())
    }

    pub fn deinit_motors(&self) -> Result<()> {
        // Cleared first so no tick commands a motor that is being released.
        self.initialized.store(false, Ordering::Release);
        self.exec_parallel(|motor, _| Ok(motor.deinit()?))?;
        info!("motors released");
        Ok(())
    }

    /// Zero every encoder at the current pose. Refused while initialized.
    pub fn set_zeros(&self) -> Result<()> {
        if self.is_initialized() {
            return Err(RobotError::InvalidState(
                "set_zeros while motors are initialized",
            ));
        }
        let settled = self.exec_parallel(|motor, _| Ok((motor.id(), motor.set_zero()?)))?;
        let failed: Vec<u16> = settled
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(id, _)| id)
            .collect();
        if !failed.is_empty() {
            return Err(RobotError::ZeroFailed { motors: failed });
        }
        info!("zero positions set");
        Ok(())
    }

    pub fn clear_errors(&self) -> Result<()> {
        self.exec_parallel(|motor, _| Ok(motor.clear_error()?))?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn joint_positions(&self) -> Vec<f32> {
        self.joints.lock().current.q.clone()
    }

    pub fn joint_velocities(&self) -> Vec<f32> {
        self.joints.lock().current.v.clone()
    }

    pub fn joint_torques(&self) -> Vec<f32> {
        self.joints.lock().current.tau.clone()
    }

    pub fn motor_states(&self) -> Vec<MotorState> {
        self.motors.iter().map(|m| m.state()).collect()
    }

    pub fn motor_count(&self) -> usize {
        self.motors.len()
    }

    pub fn default_angles(&self) -> Option<&[f32]> {
        self.config.robot.default_angles.as_deref()
    }

    pub fn config(&self) -> &RobotConfig {
        &self.config
    }

    pub fn metrics_text(&self) -> String {
        self.metrics.encode_text()
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use can_transport::{MockBus, MockHandle};
    use motor_driver::{MotorFault, SimulatedBus};
    use std::time::Instant;

    // can0 carries 1..3, can1 carries 4..6; motors 2,3 and 5,6 form the ankles.
    const CONFIG: &str = r#"
motors:
  master_id_offset: 16
  motor_type: evo
  motor_interface_type: mock
  motor_interface: [can0, can1]
  motor_num: [3, 3]
  motor_id: [1, 2, 3, 4, 5, 6]
  motor_model: [1, 0, 0, 1, 0, 0]
  timing:
    settle_ms: 5
    zero_settle_ms: 20
    reset_settle_ms: 30
    refresh_settle_ms: 20
robot:
  kp: [40, 20, 20, 40, 20, 20]
  kd: [2, 1, 1, 2, 1, 1]
  motor_sign: [1, 1, -1, 1, 1, 1]
  closed_chains:
    - { motors: [2, 3], side: left }
    - { motors: [5, 6], side: right }
  default_angles: [0.3, 0.0, 0.0, 0.3, 0.0, 0.0]
"#;

    struct Rig {
        robot: RobotInterface,
        sims: Vec<SimulatedBus>,
        wires: Vec<MockHandle>,
    }

    impl Rig {
        fn new() -> Self {
            let config = RobotConfig::from_yaml_str(CONFIG).unwrap();
            let registry = Arc::new(BusRegistry::new());
            let models = config.motors.models().unwrap();
            let mut sims = Vec::new();
            let mut wires = Vec::new();
            for (iface, range) in config.motors.motor_interface.iter().zip(config.motors.groups()) {
                let bus = MockBus::new(iface);
                let sim = SimulatedBus::new(config.motors.master_id_offset);
                for idx in range {
                    sim.add_motor(config.motors.motor_id[idx], models[idx]);
                }
                sim.attach(&bus.handle());
                wires.push(bus.handle());
                registry.attach(iface, bus).unwrap();
                sims.push(sim);
            }
            let robot = RobotInterface::with_registry(config, registry).unwrap();
            Self { robot, sims, wires }
        }

        fn sim_of(&self, id: u16) -> &SimulatedBus {
            &self.sims[if id <= 3 { 0 } else { 1 }]
        }

        fn sent_total(&self) -> usize {
            self.wires.iter().map(|w| w.sent_count()).sum()
        }

        fn wait_until_live(&self) {
            let deadline = Instant::now() + Duration::from_secs(1);
            while self.robot.motor_states().iter().any(|s| s.liveness != 0) {
                assert!(Instant::now() < deadline, "replies never arrived");
                thread::sleep(Duration::from_millis(2));
            }
        }
    }

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_action_ignored_before_init() {
        let rig = Rig::new();
        assert!(!rig.robot.is_initialized());
        rig.robot.apply_action(&[0.0; 6]).unwrap();
        assert_eq!(rig.sent_total(), 0);
    }

    #[test]
    fn test_init_and_deinit_toggle_flag() {
        let rig = Rig::new();
        rig.robot.init_motors().unwrap();
        assert!(rig.robot.is_initialized());
        rig.wait_until_live();
        rig.robot.deinit_motors().unwrap();
        assert!(!rig.robot.is_initialized());
        assert!(rig.robot.metrics_text().contains("atom_motors_configured 6"));
    }

    #[test]
    fn test_init_reports_first_fault() {
        let rig = Rig::new();
        rig.sim_of(5).set_error(5, 0x04);
        rig.sim_of(6).set_error(6, 0x01);
        let err = rig.robot.init_motors().unwrap_err();
        assert!(matches!(
            err,
            RobotError::DeviceFault {
                id: 5,
                fault: MotorFault::MosOverTemperature
            }
        ));
        assert!(!rig.robot.is_initialized());
    }

    #[test]
    fn test_action_length_checked() {
        let rig = Rig::new();
        rig.robot.init_motors().unwrap();
        assert!(matches!(
            rig.robot.apply_action(&[0.0; 5]),
            Err(RobotError::ActionLength {
                expected: 6,
                found: 5
            })
        ));
    }

    #[test]
    fn test_free_and_coupled_commands() {
        let rig = Rig::new();
        rig.robot.init_motors().unwrap();
        rig.wait_until_live();
        rig.robot
            .apply_action(&[0.25, 0.1, -0.1, 0.0, 0.0, 0.0])
            .unwrap();

        // free joint: position set-point with its own gains
        let free = *rig.sim_of(1).commands(1).last().unwrap();
        assert!(close(free.pos, 0.25, 1e-3));
        assert!(close(free.kp, 40.0, 0.2));
        assert!(close(free.kd, 2.0, 0.05));
        assert!(close(free.torque, 0.0, 0.05));

        // left ankle at neutral: joint torque (2, -2) maps to crank torques (3, -1)
        let a = *rig.sim_of(2).commands(2).last().unwrap();
        let b = *rig.sim_of(3).commands(3).last().unwrap();
        for cmd in [a, b] {
            assert!(close(cmd.kp, 0.0, 1e-6));
            assert!(close(cmd.kd, 0.0, 1e-6));
            assert!(close(cmd.pos, 0.0, 1e-3));
        }
        assert!(close(a.torque, 3.0, 0.05), "{a:?}");
        // motor 3 is mounted reversed
        assert!(close(b.torque, 1.0, 0.05), "{b:?}");

        // the right ankle holds zero, so it gets no torque
        let r = *rig.sim_of(5).commands(5).last().unwrap();
        assert!(close(r.torque, 0.0, 0.05));
    }

    #[test]
    fn test_offline_motor_aborts_twelfth_tick() {
        let rig = Rig::new();
        rig.robot.init_motors().unwrap();
        rig.wait_until_live();
        rig.sim_of(1).set_silent(1, true);

        let action = [0.0; 6];
        for tick in 1..=11 {
            rig.robot
                .apply_action(&action)
                .unwrap_or_else(|e| panic!("tick {tick} failed: {e}"));
        }
        assert_eq!(rig.robot.motor_states()[0].liveness, 11);

        let before = rig.sent_total();
        let err = rig.robot.apply_action(&action).unwrap_err();
        assert!(matches!(&err, RobotError::ActuatorOffline { motors } if motors == &vec![1]));
        assert_eq!(rig.sent_total(), before);
        // no automatic recovery
        assert!(rig.robot.apply_action(&action).is_err());
        assert!(rig.robot.metrics_text().contains("atom_control_aborted_ticks 2"));

        rig.sim_of(1).set_silent(1, false);
        rig.robot.refresh_joints().unwrap();
        rig.robot.apply_action(&action).unwrap();
    }

    #[test]
    fn test_reset_sends_half_then_full_gain() {
        let rig = Rig::new();
        rig.robot.init_motors().unwrap();
        for sim in &rig.sims {
            sim.clear_commands();
        }
        let started = Instant::now();
        rig.robot
            .reset_joints(&[0.3, 0.0, 0.0, -0.3, 0.0, 0.0])
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));

        for id in 1..=6u16 {
            let cmds = rig.sim_of(id).commands(id);
            assert_eq!(cmds.len(), 2, "motor {id}");
            let kp = if id == 1 || id == 4 { 40.0 } else { 20.0 };
            assert!(close(cmds[0].kp, kp / 2.0, 0.2), "motor {id}: {:?}", cmds[0]);
            assert!(close(cmds[1].kp, kp, 0.2), "motor {id}: {:?}", cmds[1]);
            assert_eq!(cmds[0].pos, cmds[1].pos);
        }
        assert!(close(rig.sim_of(1).commands(1)[1].pos, 0.3, 1e-3));
        assert!(close(rig.sim_of(4).commands(4)[1].pos, -0.3, 1e-3));
        // neutral ankle targets map to neutral cranks
        assert!(close(rig.sim_of(2).commands(2)[1].pos, 0.0, 1e-3));
    }

    #[test]
    fn test_reset_requires_init() {
        let rig = Rig::new();
        assert!(matches!(
            rig.robot.reset_joints(&[0.0; 6]),
            Err(RobotError::NotInitialized)
        ));
    }

    #[test]
    fn test_refresh_decouples_ankles() {
        let rig = Rig::new();
        rig.sim_of(1).set_position(1, 0.5);
        rig.sim_of(4).set_position(4, -0.2);
        rig.sim_of(1).set_velocity(1, 0.7);
        rig.robot.refresh_joints().unwrap();
        assert!(close(rig.robot.joint_velocities()[0], 0.7, 1e-2));
        let q = rig.robot.joint_positions();
        assert!(close(q[0], 0.5, 1e-3));
        assert!(close(q[3], -0.2, 1e-3));
        for i in [1, 2, 4, 5] {
            assert!(close(q[i], 0.0, 1e-3), "joint {i}: {}", q[i]);
        }
    }

    #[test]
    fn test_unsolvable_ankle_keeps_joint_state() {
        let rig = Rig::new();
        rig.robot.init_motors().unwrap();
        rig.wait_until_live();
        rig.robot.apply_action(&[0.0; 6]).unwrap();
        rig.robot.refresh_joints().unwrap();
        let q = rig.robot.joint_positions();
        let v = rig.robot.joint_velocities();
        let tau = rig.robot.joint_torques();

        // both left cranks at 3 rad: the linkage has no joint-space solution
        rig.sim_of(2).set_position(2, 3.0);
        rig.sim_of(3).set_position(3, -3.0);
        assert!(matches!(
            rig.robot.refresh_joints(),
            Err(RobotError::Kinematics(_))
        ));
        assert_eq!(rig.robot.joint_positions(), q);

        let before = rig.sent_total();
        assert!(matches!(
            rig.robot.apply_action(&[0.0; 6]),
            Err(RobotError::Kinematics(_))
        ));
        assert_eq!(rig.sent_total(), before);
        assert_eq!(rig.robot.joint_positions(), q);
        assert_eq!(rig.robot.joint_velocities(), v);
        assert_eq!(rig.robot.joint_torques(), tau);
    }

    #[test]
    fn test_set_zeros_refused_while_running() {
        let rig = Rig::new();
        rig.robot.init_motors().unwrap();
        assert!(matches!(
            rig.robot.set_zeros(),
            Err(RobotError::InvalidState(_))
        ));
        rig.robot.deinit_motors().unwrap();
        rig.robot.set_zeros().unwrap();
    }

    #[test]
    fn test_set_zeros_reports_unsettled_motors() {
        let rig = Rig::new();
        rig.sim_of(4).set_position(4, 1.0);
        rig.sim_of(4).set_zero_sticks(4, false);
        assert!(matches!(
            rig.robot.set_zeros(),
            Err(RobotError::ZeroFailed { motors }) if motors == vec![4]
        ));
    }

    #[test]
    fn test_clear_errors_reaches_every_motor() {
        let rig = Rig::new();
        rig.robot.clear_errors().unwrap();
        for w in &rig.wires {
            let sent = w.sent();
            assert_eq!(sent.len(), 3);
            assert!(sent.iter().all(|f| f.payload()[7] == 0xFD));
        }
    }

    #[cfg(all(target_os = "linux", feature = "socketcan"))]
    #[test]
    fn test_can_interface_type_has_a_backend() {
        let yaml = CONFIG
            .replace("motor_interface_type: mock", "motor_interface_type: can")
            .replace("[can0, can1]", "[nocan98, nocan99]");
        let config = RobotConfig::from_yaml_str(&yaml).unwrap();
        match RobotInterface::new(config) {
            Err(RobotError::Transport(e)) => assert!(
                !matches!(e, can_transport::TransportError::Unsupported(_)),
                "{e}"
            ),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("opened a missing interface"),
        }
    }

    #[test]
    fn test_default_angles_exposed() {
        let rig = Rig::new();
        assert_eq!(rig.robot.default_angles().map(<[f32]>::len), Some(6));
        assert_eq!(rig.robot.motor_count(), 6);
    }
}
