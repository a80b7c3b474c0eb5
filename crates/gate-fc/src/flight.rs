//! Altitude-hold flight loop over the gate pose.
//!
//! One `process` call per frame. While flying, a found gate yields exactly one
//! throttle command; a lost gate yields none, and more than the allowed number
//! of consecutive misses disarms.

use std::io::Write;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info, warn};

use gate_vision::pose::{PoseEstimate, PoseSolver};
use gate_vision::DetectedMarker;

use crate::command::{ControlCommand, Transmitter};
use crate::operator::Transition;
use crate::pid::Pid;
use crate::safety::{MissCounter, MissVerdict};
use crate::state::{FlightState, FlightStatus};
use crate::FlightConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickAction {
    /// Not flying; pose only.
    Idle,
    Commanded(ControlCommand),
    /// Gate lost, still within tolerance; nothing sent.
    Missed(u32),
    /// Gate lost too long; disarmed.
    FailSafe(u32),
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub pose: PoseEstimate,
    pub state: FlightState,
    pub action: TickAction,
}

impl TickReport {
    pub fn status_line(&self) -> String {
        let action = match self.action {
            TickAction::Idle => String::new(),
            TickAction::Commanded(c) => format!(" throttle:{:.3}", c.throttle),
            TickAction::Missed(n) => format!(" missing {}", n),
            TickAction::FailSafe(n) => format!(" missed {}, stopped", n),
        };
        format!("[{}] {}{}", self.state, self.pose.status_line(), action)
    }
}

pub struct FlightController<W: Write> {
    tx: Transmitter<W>,
    pose: PoseSolver,
    height_pid: Pid,
    misses: MissCounter,
    state: FlightState,
    marker_id: i32,
    hold_target_cm: f64,
    status: FlightStatus,
}

impl<W: Write> FlightController<W> {
    pub fn new(tx: Transmitter<W>, pose: PoseSolver, cfg: &FlightConfig) -> Self {
        Self {
            tx,
            pose,
            height_pid: cfg.height_pid.build(),
            misses: MissCounter::new(cfg.max_missed_frames),
            state: FlightState::Unarmed,
            marker_id: cfg.marker_id,
            hold_target_cm: cfg.hold_target_cm,
            status: FlightStatus { marker_id: cfg.marker_id, ..FlightStatus::default() },
        }
    }

    pub fn state(&self) -> FlightState {
        self.state
    }

    pub fn missed_frames(&self) -> u32 {
        self.misses.missed()
    }

    pub fn marker_id(&self) -> i32 {
        self.marker_id
    }

    pub fn height_pid(&self) -> &Pid {
        &self.height_pid
    }

    pub fn transmitter(&self) -> &Transmitter<W> {
        &self.tx
    }

    pub fn status(&self) -> FlightStatus {
        FlightStatus {
            state: self.state,
            missed_frames: self.misses.missed(),
            ..self.status.clone()
        }
    }

    pub fn bind(&mut self) -> Result<()> {
        info!("flight: binding");
        self.tx.bind()?;
        self.state = FlightState::Unarmed;
        self.misses.reset();
        Ok(())
    }

    pub fn arm(&mut self) -> Result<()> {
        self.tx.arm()?;
        self.state = FlightState::Armed;
        info!("flight: armed");
        Ok(())
    }

    /// Returns `false` (and changes nothing) unless armed.
    pub fn start_flying(&mut self, now: f64) -> bool {
        if self.state != FlightState::Armed {
            warn!("flight: must be armed first to fly (state={})", self.state);
            return false;
        }
        self.misses.reset();
        self.height_pid.set_set_point(self.hold_target_cm);
        self.height_pid.prepare_for_start(now, 0.0);
        self.state = FlightState::Flying;
        info!("flight: flying, hold target {} cm", self.hold_target_cm);
        true
    }

    pub fn stop_flying(&mut self) -> Result<()> {
        self.tx.disarm()?;
        self.state = FlightState::Unarmed;
        self.misses.reset();
        info!("flight: stopped and disarmed");
        Ok(())
    }

    pub fn apply(&mut self, transition: Transition, now: f64) -> Result<()> {
        match transition {
            Transition::Bind => self.bind(),
            Transition::Arm => self.arm(),
            Transition::StartFlying => {
                self.start_flying(now);
                Ok(())
            }
            Transition::StopFlying => self.stop_flying(),
        }
    }

    pub fn process(&mut self, now: f64, detections: &[DetectedMarker]) -> Result<TickReport> {
        let pose = self.pose.solve(detections, self.marker_id);
        if pose.found {
            self.status.last_fix = Some(Instant::now());
            self.status.last_height_cm = pose.height();
        }

        let action = if self.state != FlightState::Flying {
            TickAction::Idle
        } else if let Some(h) = pose.height() {
            let v = self.height_pid.compute(now, h);
            let cmd = ControlCommand::altitude(v);
            self.tx.command(&cmd)?;
            self.misses.reset();
            self.status.last_throttle = Some(v);
            TickAction::Commanded(cmd)
        } else {
            match self.misses.record_miss() {
                MissVerdict::Tolerated(n) => {
                    debug!("flight: missing {}", n);
                    TickAction::Missed(n)
                }
                MissVerdict::Abort(n) => {
                    warn!("flight: missed {} frames, stopping", n);
                    self.stop_flying()?;
                    TickAction::FailSafe(n)
                }
            }
        };

        Ok(TickReport { pose, state: self.state, action })
    }
}
