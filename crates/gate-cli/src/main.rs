use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use gate_proto::telemetry::{EventKind, FlightEvent};

use gate_vision::calibration::CalibrationData;
use gate_vision::camera::{self, CameraConfig, FrameSource};
use gate_vision::geometry::{GateConfig, GateGeometry};
use gate_vision::pnp::PlanarPnp;
use gate_vision::pose::PoseSolver;
use gate_vision::replay::{RecordedFrame, ReplayDetector};
use gate_vision::{doctor as vision_doctor, DetectedMarker, MarkerDetector, VisionConfig};

use gate_fc::command::{ControlCommand, Transmitter};
use gate_fc::flight::{FlightController, TickAction, TickReport};
use gate_fc::operator::{OperatorCommand, Transition, HELP};
use gate_fc::state::FlightState;
use gate_fc::{doctor as fc_doctor, sim, FlightConfig, TransmitterConfig};

use std::io::Write as _;
use std::time::{Duration, Instant};

/// Pacing for frame sources that return instantly (replay).
const BLANK_FRAME_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(name = "gatepilot", version, about = "Gate-relative altitude hold for RC quadcopters")]
struct Cli {
    /// Required by every command except `calibration write`.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Interactive flight loop; operator keys arrive on stdin.
    Fly {
        /// Marker ID printed on both gate markers.
        #[arg(long)]
        marker_id: Option<i32>,
        /// Serial tty to the transmitter.
        #[arg(long)]
        tty: Option<String>,
    },
    /// Manual command console for bench testing the transmitter.
    Drive {
        #[arg(long)]
        tty: Option<String>,
    },
    /// Print the PID step response against a first-order plant.
    PidSim,
    Calibration { #[command(subcommand)] cmd: CalibrationCmd },
    Vision { #[command(subcommand)] cmd: VisionCmd },
}

#[derive(Debug, Subcommand)]
enum CalibrationCmd {
    Show,
    /// Write the reference camera calibration.
    Write {
        #[arg(long)]
        out: String,
    },
}

#[derive(Debug, Subcommand)]
enum VisionCmd {
    /// Pose report for every frame of the configured recording.
    Replay,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    calibration: CalibrationCfg,
    #[serde(default)]
    gate: GateConfig,
    vision: VisionConfig,
    camera: Option<CameraConfig>,
    #[serde(default)]
    transmitter: TransmitterConfig,
    #[serde(default)]
    flight: FlightConfig,
    log: Option<LogCfg>,
}

#[derive(Debug, serde::Deserialize)]
struct CalibrationCfg { path: String }

#[derive(Debug, serde::Deserialize)]
struct LogCfg {
    /// NDJSON flight log, appended.
    flight_log: Option<String>,
    /// Where `c` writes frames and detections (default: working directory).
    capture_dir: Option<String>,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

fn load_calibration(cfg: &Config) -> Result<CalibrationData> {
    CalibrationData::load(&cfg.calibration.path).context("load camera calibration")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // `calibration write` bootstraps a fresh setup and never reads the config.
    let cfg = match &cli.cmd {
        Command::Calibration { cmd: CalibrationCmd::Write { .. } } | Command::PidSim => None,
        _ => Some(load_config(required_config(cli.config.as_deref())?)?),
    };
    let need = || cfg.as_ref().context("--config is required for this command");

    match cli.cmd {
        Command::Doctor => doctor(need()?).await?,
        Command::Fly { marker_id, tty } => fly(need()?, marker_id, tty).await?,
        Command::Drive { tty } => drive(need()?, tty).await?,
        Command::PidSim => pid_sim(),
        Command::Calibration { cmd } => calibration_cmd(cfg.as_ref(), cmd)?,
        Command::Vision { cmd } => vision_cmd(need()?, cmd)?,
    }
    Ok(())
}

fn required_config(path: Option<&str>) -> Result<&str> {
    path.context("--config is required for this command")
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    let cal = load_calibration(cfg)?;
    vision_doctor::check_calibration(&cal)?;
    vision_doctor::check_gate(&cfg.gate)?;
    vision_doctor::check_vision(&cfg.vision)?;

    if let Some(cam) = &cfg.camera {
        anyhow::ensure!(
            matches!(cam.mode.as_str(), "libcamera-jpeg" | "v4l2-mjpeg"),
            "unknown camera.mode: {}",
            cam.mode
        );
        anyhow::ensure!(cam.width > 0 && cam.height > 0, "camera size invalid");
    } else {
        info!("doctor: no [camera], flight runs on blank frames");
    }

    fc_doctor::check_transmitter(&cfg.transmitter)?;
    fc_doctor::check_flight(&cfg.flight)?;

    if !std::path::Path::new(&cfg.transmitter.serial_dev).exists() {
        warn!("doctor: transmitter {} not present", cfg.transmitter.serial_dev);
    }

    info!("doctor: OK");
    Ok(())
}

fn calibration_cmd(cfg: Option<&Config>, cmd: CalibrationCmd) -> Result<()> {
    match cmd {
        CalibrationCmd::Show => {
            let cfg = cfg.context("--config is required for calibration show")?;
            let cal = load_calibration(cfg)?;
            println!("path={}", cfg.calibration.path);
            for row in cal.intrinsic_matrix {
                println!("  [{:12.6} {:12.6} {:12.6}]", row[0], row[1], row[2]);
            }
            println!("distortion={:?}", cal.distortion_coefficients);
        }
        CalibrationCmd::Write { out } => {
            CalibrationData::reference().save(&out)?;
            info!("calibration: wrote reference calibration to {}", out);
        }
    }
    Ok(())
}

fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    match cmd {
        VisionCmd::Replay => {
            let path = cfg.vision.replay_path.as_deref().context("vision.replay_path missing")?;
            let mut replay = ReplayDetector::open(path, false)?;
            anyhow::ensure!(!replay.is_empty(), "recording {} has no frames", path);
            let mut solver = init_pose_solver(cfg)?;
            let mut found = 0usize;
            let total = replay.len();
            let mut i = 0usize;
            while !replay.finished() {
                let est = solver.solve(&replay.next_frame(), cfg.flight.marker_id);
                if est.found {
                    found += 1;
                }
                let height = est.height().map(|h| format!(" height:{:.1}", h)).unwrap_or_default();
                println!("frame {:4}: {}{}", i, est.status_line(), height);
                i += 1;
            }
            println!("found {}/{} frames", found, total);
            Ok(())
        }
    }
}

fn pid_sim() {
    let mut pid = sim::default_pid();
    let mut plant = sim::FirstOrderPlant::default();
    for step in sim::step_response(&mut pid, &mut plant, sim::STEPS) {
        println!("{}", step.line());
    }
}

async fn drive(cfg: &Config, tty: Option<String>) -> Result<()> {
    let dev = tty.unwrap_or_else(|| cfg.transmitter.serial_dev.clone());
    let mut tx = Transmitter::open(&dev, cfg.transmitter.baud)?;
    info!("drive: transmitter on {}", dev);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().context("flush stdout")?;
        let Some(line) = lines.next_line().await.context("read stdin")? else { break };
        match line.trim() {
            "" => continue,
            "q" => break,
            "a" => { tx.arm()?; println!("Armed"); }
            "b" => { println!("Binding..."); tx.bind()?; println!("  done"); }
            "d" => { tx.disarm()?; println!("Disarm"); }
            "h" | "?" => print_drive_help(),
            text => match ControlCommand::parse(text) {
                Ok(c) => {
                    println!(
                        "throttle:{:.2} direction:{:.2} forward:{:.2} rotation:{:.2}",
                        c.throttle, c.direction, c.forward, c.rotation
                    );
                    tx.command(&c)?;
                }
                Err(e) => println!("{:#}", e),
            },
        }
    }
    Ok(())
}

fn print_drive_help() {
    println!("b    -- bind the quadcopter");
    println!("a    -- arm the quadcopter for flight");
    println!("d    -- disarm and stop flying");
    println!("One to four numbers in [-1, 1] separated by spaces: throttle,");
    println!("direction, forward/backwards and rotation. Missing numbers are neutral (0).");
    println!("q    -- quit program");
    println!("h, ? -- this help");
}

async fn fly(cfg: &Config, marker_id: Option<i32>, tty: Option<String>) -> Result<()> {
    info!("fly: starting");

    let mut flight_cfg = cfg.flight.clone();
    if let Some(id) = marker_id {
        flight_cfg.marker_id = id;
    }
    let dev = tty.unwrap_or_else(|| cfg.transmitter.serial_dev.clone());

    let source = match &cfg.camera {
        Some(cam) => FrameSource::Camera(cam.clone()),
        None => FrameSource::Blank { width: 640, height: 480 },
    };
    let mut detector = init_detector(&cfg.vision)?;
    let solver = init_pose_solver(cfg)?;
    let tx = Transmitter::open(&dev, cfg.transmitter.baud)?;
    let mut fc = FlightController::new(tx, solver, &flight_cfg);

    let log_cfg = cfg.log.as_ref();
    let mut log = FlightLog::open(log_cfg.and_then(|l| l.flight_log.as_deref())).await?;
    let capture_dir = std::path::PathBuf::from(log_cfg.and_then(|l| l.capture_dir.clone()).unwrap_or_else(|| ".".into()));

    // Operator keys: one or more per line on stdin.
    let (op_tx, mut op_rx) = mpsc::channel::<OperatorCommand>(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            for key in line.chars().filter(|c| !c.is_whitespace()) {
                match OperatorCommand::from_key(key) {
                    Some(op) => {
                        if op_tx.send(op).await.is_err() {
                            return;
                        }
                    }
                    None => warn!("unknown key {:?} (h for help)", key),
                }
            }
        }
    });

    println!("{}", HELP);
    info!("fly: marker id {}, transmitter {}", fc.marker_id(), dev);

    let start = Instant::now();
    let mut captures = 0u32;

    'frames: loop {
        let frame = tokio::select! {
            f = source.next_frame() => Some(f?),
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(frame) = frame else { break };
        if matches!(source, FrameSource::Blank { .. }) {
            tokio::time::sleep(BLANK_FRAME_INTERVAL).await;
        }
        let gray = camera::to_gray(&frame);
        let detections = detector.detect(&gray, cfg.vision.dictionary)?;
        let now = start.elapsed().as_secs_f64();

        while let Ok(op) = op_rx.try_recv() {
            match op {
                OperatorCommand::Quit => break 'frames,
                OperatorCommand::Help => println!("{}", HELP),
                OperatorCommand::Capture => {
                    match capture(&capture_dir, captures, &frame, &detections) {
                        Ok(()) => captures += 1,
                        Err(e) => warn!("capture failed: {:#}", e),
                    }
                }
                other => {
                    let Some(t) = other.transition() else { continue };
                    let before = fc.state();
                    fc.apply(t, now)?;
                    if let Some(ev) = transition_event(t, before, fc.state()) {
                        log.record(&ev).await;
                    }
                    println!("{}", fc.state());
                }
            }
        }

        let report = fc.process(now, &detections)?;
        if fc.state() == FlightState::Flying || report.action != TickAction::Idle {
            info!("{}", report.status_line());
        } else {
            debug!("{}", report.status_line());
        }
        if let Some(ev) = tick_event(&report) {
            log.record(&ev).await;
        }
    }

    if fc.state() != FlightState::Unarmed {
        fc.stop_flying()?;
        log.record(&FlightEvent::new(EventKind::Stop, fc.state().to_string()).with_msg("quit")).await;
    }
    let st = fc.status();
    info!(
        "fly: done, last fix {:?} ago, last height {:?} cm, last throttle {:?}",
        st.fix_age(),
        st.last_height_cm,
        st.last_throttle
    );
    Ok(())
}

/// Writes `raw_image_N.png` and `detect_N.json` for one frame.
fn capture(dir: &std::path::Path, n: u32, frame: &image::DynamicImage, detections: &[DetectedMarker]) -> Result<()> {
    let name = dir.join(format!("raw_image_{}.png", n));
    frame.save(&name).with_context(|| format!("write {}", name.display()))?;
    println!("Captured input {}", name.display());

    let rec = RecordedFrame { frame: n as u64, markers: detections.to_vec() };
    let name = dir.join(format!("detect_{}.json", n));
    std::fs::write(&name, rec.to_line()?).with_context(|| format!("write {}", name.display()))?;
    println!("Captured detection {}", name.display());
    Ok(())
}

fn transition_event(t: Transition, before: FlightState, after: FlightState) -> Option<FlightEvent> {
    let kind = match t {
        Transition::Bind => EventKind::Bind,
        Transition::Arm => EventKind::Arm,
        Transition::StartFlying if before != FlightState::Flying && after == FlightState::Flying => EventKind::TakeOff,
        Transition::StartFlying => return None,
        Transition::StopFlying => EventKind::Stop,
    };
    Some(FlightEvent::new(kind, after.to_string()))
}

fn tick_event(report: &TickReport) -> Option<FlightEvent> {
    let state = report.state.to_string();
    let mut ev = match report.action {
        TickAction::Idle => return None,
        TickAction::Commanded(cmd) => {
            let mut ev = FlightEvent::new(EventKind::Tick, state);
            ev.throttle = Some(cmd.throttle);
            ev
        }
        TickAction::Missed(n) => {
            let mut ev = FlightEvent::new(EventKind::Tick, state);
            ev.missed = n;
            ev
        }
        TickAction::FailSafe(n) => {
            let mut ev = FlightEvent::new(EventKind::FailSafe, state).with_msg(format!("missed {} frames", n));
            ev.missed = n;
            ev
        }
    };
    ev.height_cm = report.pose.height();
    Some(ev)
}

/// Append-only NDJSON flight log. Write failures disable the log, never the flight.
struct FlightLog {
    file: Option<tokio::fs::File>,
}

impl FlightLog {
    async fn open(path: Option<&str>) -> Result<Self> {
        let Some(path) = path else { return Ok(Self { file: None }) };
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("open flight log {}", path))?;
        info!("fly: logging to {}", path);
        Ok(Self { file: Some(file) })
    }

    async fn record(&mut self, ev: &FlightEvent) {
        let Some(f) = self.file.as_mut() else { return };
        let res = match ev.to_line() {
            Ok(line) => f.write_all(line.as_bytes()).await.context("write flight log"),
            Err(e) => Err::<(), _>(e).context("serialize flight event"),
        };
        if let Err(e) = res {
            warn!("flight log disabled: {:#}", e);
            self.file = None;
        }
    }
}

// --- init helpers ---
fn init_detector(v: &VisionConfig) -> Result<Box<dyn MarkerDetector>> {
    match v.backend.as_str() {
        "replay" => {
            let path = v.replay_path.as_deref().context("vision.replay_path missing")?;
            Ok(Box::new(ReplayDetector::open(path, v.replay_loop.unwrap_or(false))?))
        }
        other => anyhow::bail!("unknown vision.backend: {}", other),
    }
}

fn init_pose_solver(cfg: &Config) -> Result<PoseSolver> {
    let cal = load_calibration(cfg)?;
    let pnp = match cfg.vision.max_reprojection_px {
        Some(px) => PlanarPnp::new(px),
        None => PlanarPnp::default(),
    };
    Ok(PoseSolver::new(cal, GateGeometry::from_config(&cfg.gate), Box::new(pnp)))
}
