use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use can_transport as can;
use can_transport::CanBus;
use motor_driver::SimulatedBus;
use robot_interface::{RobotConfig, RobotInterface};

#[derive(Parser, Debug)]
#[command(
    name = "atom",
    version,
    about = "Atom actuator CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Robot description
    #[arg(long, global = true, default_value = "configs/atom01.yaml")]
    config: PathBuf,

    /// Run against simulated motors on mock buses
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    Slcan,
    Socketcan,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available CAN interfaces
    CanList {
        #[arg(long, value_enum, default_value_t = Backend::Mock)]
        backend: Backend,
    },
    /// Request a status frame from every actuator and print it
    Probe,
    /// Bring every actuator into control mode
    Init,
    /// Release every actuator
    Deinit,
    /// Zero every encoder at the current pose
    Zero,
    /// Clear latched device errors
    ClearErrors,
    /// Init, move to the default pose, hold it, then release
    Hold {
        /// Control ticks to run
        #[arg(long, default_value_t = 500u32)]
        ticks: u32,
        /// Tick rate in Hz
        #[arg(long, default_value_t = 200.0)]
        rate_hz: f64,
        /// Print Prometheus metrics when done
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    if let Commands::CanList { backend } = cli.command {
        return can_list_backend(backend);
    }
    let session = Session::open(&cli.config, cli.mock)?;
    let robot = &session.robot;
    match cli.command {
        Commands::CanList { .. } => Ok(()),
        Commands::Probe => probe(robot),
        Commands::Init => {
            robot.init_motors()?;
            println!("init: ok ({} motors)", robot.motor_count());
            Ok(())
        }
        Commands::Deinit => {
            robot.deinit_motors()?;
            println!("deinit: ok");
            Ok(())
        }
        Commands::Zero => {
            robot.set_zeros()?;
            println!("zero: ok");
            Ok(())
        }
        Commands::ClearErrors => {
            robot.clear_errors()?;
            println!("clear-errors: ok");
            Ok(())
        }
        Commands::Hold {
            ticks,
            rate_hz,
            metrics,
        } => {
            hold(robot, ticks, rate_hz)?;
            if metrics {
                print!("{}", robot.metrics_text());
            }
            Ok(())
        }
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A robot plus, in mock mode, the simulations answering on its buses.
struct Session {
    robot: RobotInterface,
    _sims: Vec<SimulatedBus>,
}

impl Session {
    fn open(path: &Path, mock: bool) -> Result<Self> {
        let config = RobotConfig::load(path)
            .with_context(|| format!("loading config: {}", path.display()))?;
        let registry = Arc::new(can::BusRegistry::new());
        let mut sims = Vec::new();
        if mock {
            let motors = &config.motors;
            let models = motors.models()?;
            for (iface, range) in motors.motor_interface.iter().zip(motors.groups()) {
                let bus = can::MockBus::new(iface);
                let sim = SimulatedBus::new(motors.master_id_offset);
                for idx in range {
                    sim.add_motor(motors.motor_id[idx], models[idx]);
                }
                sim.attach(&bus.handle());
                registry.attach(iface, bus)?;
                sims.push(sim);
            }
            info!(interfaces = sims.len(), "using simulated motors");
        }
        let robot = RobotInterface::with_registry(config, registry)
            .context("building robot interface")?;
        Ok(Self { robot, _sims: sims })
    }
}

fn can_list_backend(backend: Backend) -> Result<()> {
    let buses = match backend {
        Backend::Mock => can::MockBus::list()?,
        Backend::Slcan => can::SlcanBus::list()?,
        Backend::Socketcan => socketcan_list()?,
    };
    for bus in buses {
        println!("{}\t{}", bus.name, bus.driver);
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn socketcan_list() -> Result<Vec<can::BusInfo>> {
    Ok(can::SocketCanBus::list()?)
}

#[cfg(not(target_os = "linux"))]
fn socketcan_list() -> Result<Vec<can::BusInfo>> {
    anyhow::bail!("SocketCAN is only available on Linux")
}

fn probe(robot: &RobotInterface) -> Result<()> {
    robot.refresh_joints()?;
    println!("id\tmodel\tpos\tvel\teffort\terr\tmos\tcoil\tlive");
    for s in robot.motor_states() {
        let coil = s.coil_temp.map(|t| t.to_string()).unwrap_or_else(|| "-".into());
        println!(
            "{}\t{}\t{:.4}\t{:.4}\t{:.4}\t{:#04x}\t{}\t{}\t{}",
            s.id, s.model, s.pos, s.vel, s.effort, s.error_code, s.mos_temp, coil, s.liveness
        );
        if let Some(fault) = s.fault() {
            warn!(id = s.id, %fault, "motor reports fault");
        }
    }
    let q: Vec<String> = robot
        .joint_positions()
        .iter()
        .map(|v| format!("{v:.4}"))
        .collect();
    println!("joints: [{}]", q.join(", "));
    Ok(())
}

fn hold(robot: &RobotInterface, ticks: u32, rate_hz: f64) -> Result<()> {
    anyhow::ensure!(rate_hz > 0.0, "rate must be positive, got {rate_hz}");
    let pose = robot
        .default_angles()
        .map(<[f32]>::to_vec)
        .unwrap_or_else(|| vec![0.0; robot.motor_count()]);
    robot.init_motors()?;
    let outcome = hold_pose(robot, &pose, ticks, Duration::from_secs_f64(1.0 / rate_hz));
    // Release the motors even when a tick failed.
    robot.deinit_motors()?;
    outcome
}

fn hold_pose(robot: &RobotInterface, pose: &[f32], ticks: u32, period: Duration) -> Result<()> {
    robot.reset_joints(pose)?;
    let started = Instant::now();
    let mut next = started;
    for tick in 0..ticks {
        robot
            .apply_action(pose)
            .with_context(|| format!("control tick {tick}"))?;
        next += period;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
    info!(ticks, elapsed_ms = started.elapsed().as_millis() as u64, "hold finished");
    let q: Vec<String> = robot
        .joint_positions()
        .iter()
        .map(|v| format!("{v:.4}"))
        .collect();
    println!("joints: [{}]", q.join(", "));
    Ok(())
}
