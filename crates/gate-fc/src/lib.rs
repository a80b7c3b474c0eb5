pub mod command;
pub mod doctor;
pub mod flight;
pub mod operator;
pub mod pid;
pub mod safety;
pub mod sim;
pub mod state;

use serde::Deserialize;

use crate::pid::{Direction, Pid, ProportionalMode};

#[derive(Debug, Clone, Deserialize)]
pub struct TransmitterConfig {
    /// Serial tty of the RC transmitter bridge.
    #[serde(default = "default_serial_dev")]
    pub serial_dev: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_serial_dev() -> String {
    "/dev/ttyACM0".into()
}

fn default_baud() -> u32 {
    115200
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self { serial_dev: default_serial_dev(), baud: default_baud() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PidConfig {
    pub direction: Direction,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub proportional: ProportionalMode,
    pub output_min: f64,
    pub output_max: f64,

    /// Output reported before the first compute (e.g. minimum throttle).
    pub initial_output: Option<f64>,
    /// Set point held until take-off retargets the loop.
    pub initial_set_point: Option<f64>,
}

impl Default for PidConfig {
    /// Altitude loop: throttle falls as the camera gets farther above the gate.
    fn default() -> Self {
        Self {
            direction: Direction::Forward,
            kp: 0.02,
            ki: 0.0,
            kd: 0.0,
            proportional: ProportionalMode::OnError,
            output_min: -1.0,
            output_max: 1.0,
            initial_output: Some(-1.0),
            initial_set_point: Some(20.0),
        }
    }
}

impl PidConfig {
    pub fn build(&self) -> Pid {
        let mut pid = Pid::new(self.direction);
        if let Some(sp) = self.initial_set_point {
            pid.set_set_point(sp);
        }
        pid.set_output_limits(self.output_min, self.output_max);
        if let Some(out) = self.initial_output {
            pid.set_initial_output(out);
        }
        pid.set_tunings(self.kp, self.ki, self.kd, self.proportional);
        pid
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlightConfig {
    /// ID printed on both gate markers.
    #[serde(default = "default_marker_id")]
    pub marker_id: i32,
    /// Height set point applied at take-off (cm).
    #[serde(default)]
    pub hold_target_cm: f64,
    #[serde(default = "default_max_missed")]
    pub max_missed_frames: u32,
    #[serde(default)]
    pub height_pid: PidConfig,
}

fn default_marker_id() -> i32 {
    2
}

fn default_max_missed() -> u32 {
    safety::MAX_ALLOWED_MISSES
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            marker_id: default_marker_id(),
            hold_target_cm: 0.0,
            max_missed_frames: default_max_missed(),
            height_pid: PidConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_flight_section_uses_altitude_defaults() {
        let cfg: FlightConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.marker_id, 2);
        assert_eq!(cfg.max_missed_frames, 10);
        let pid = cfg.height_pid.build();
        assert_eq!(pid.output(), -1.0);
        assert_eq!(pid.set_point(), 20.0);
        assert_eq!(pid.limits(), (-1.0, 1.0));
        assert_eq!(pid.gains(), (0.02, 0.0, 0.0));
    }

    #[test]
    fn default_altitude_loop_is_corrective() {
        let mut pid = FlightConfig::default().height_pid.build();
        pid.set_set_point(0.0);
        pid.prepare_for_start(0.0, 0.0);
        let mut last = f64::INFINITY;
        for (i, h) in [10.0, 30.0, 45.0].into_iter().enumerate() {
            let out = pid.compute(0.1 * (i + 1) as f64, h);
            assert!(out < 0.0, "throttle {} above the target at {} cm", out, h);
            assert!(out < last);
            last = out;
        }

        // Below the target the loop climbs.
        pid.set_set_point(20.0);
        assert!(pid.compute(1.0, 5.0) > 0.0);
    }

    #[test]
    fn pid_section_parses() {
        let cfg: FlightConfig = toml::from_str(
            r#"
            marker_id = 7
            hold_target_cm = 35.0

            [height_pid]
            direction = "reverse"
            kp = 0.5
            ki = 0.1
            kd = 0.0
            proportional = "on_measurement"
            output_min = 0.0
            output_max = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.marker_id, 7);
        assert_eq!(cfg.height_pid.direction, Direction::Reverse);
        assert!(cfg.height_pid.initial_output.is_none());
    }
}
