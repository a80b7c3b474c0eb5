//! Incremental PID with output clamping, integral anti-windup and bump-less start.
//!
//! Time is in seconds. `compute` returns the previous output untouched when the
//! clock has not advanced. Nothing is reset implicitly: callers rebaseline with
//! `prepare_for_start` on mode transitions.

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Output rises when the input is below the set point.
    Forward,
    /// Gains are negated on assignment.
    Reverse,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Reverse => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProportionalMode {
    /// `kp * error`.
    OnError,
    /// `-kp * (input - initial_input)`; set point changes cause no kick.
    OnMeasurement,
}

#[derive(Debug, Clone)]
pub struct Pid {
    direction: Direction,
    // Unsigned tunings as last accepted; the signed working gains follow.
    tunings: [f64; 3],
    kp: f64,
    ki: f64,
    kd: f64,
    mode: ProportionalMode,
    out_min: f64,
    out_max: f64,
    iterm: f64,
    output: f64,
    set_point: f64,
    last_time: f64,
    last_input: f64,
    init_input: f64,
}

impl Pid {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            tunings: [0.0; 3],
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            mode: ProportionalMode::OnMeasurement,
            out_min: 0.0,
            out_max: 0.0,
            iterm: 0.0,
            output: 0.0,
            set_point: 0.0,
            last_time: 0.0,
            last_input: 0.0,
            init_input: 0.0,
        }
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
        self.apply_gains();
    }

    pub fn set_initial_output(&mut self, output: f64) {
        self.output = output;
    }

    /// Clamps the last output and the integral immediately. Inverted limits are
    /// logged and ignored.
    pub fn set_output_limits(&mut self, min: f64, max: f64) {
        if min > max {
            warn!("pid: output limits rejected, min {} > max {}", min, max);
            return;
        }
        self.out_min = min;
        self.out_max = max;
        self.iterm = self.clamp(self.iterm);
        self.output = self.clamp(self.output);
    }

    /// Negative gains are logged and the previous tunings kept.
    pub fn set_tunings(&mut self, kp: f64, ki: f64, kd: f64, mode: ProportionalMode) {
        if kp < 0.0 || ki < 0.0 || kd < 0.0 {
            warn!("pid: gains cannot be negative (kp={}, ki={}, kd={}), keeping previous", kp, ki, kd);
            return;
        }
        self.tunings = [kp, ki, kd];
        self.mode = mode;
        self.apply_gains();
    }

    pub fn set_set_point(&mut self, set_point: f64) {
        self.set_point = set_point;
    }

    /// Seeds time and input baselines so the first `compute` sees no derivative kick.
    pub fn prepare_for_start(&mut self, now: f64, input: f64) {
        self.last_time = now;
        self.last_input = input;
        self.init_input = input;
    }

    pub fn compute(&mut self, now: f64, input: f64) -> f64 {
        let dt = now - self.last_time;
        if dt <= 0.0 {
            return self.output;
        }

        let kp = self.kp;
        let ki = self.ki * dt;
        let kd = self.kd / dt;

        let error = self.set_point - input;
        self.iterm = self.clamp(self.iterm + ki * error);

        let d_input = input - self.last_input;

        let mut output = match self.mode {
            ProportionalMode::OnError => kp * error,
            ProportionalMode::OnMeasurement => -kp * (input - self.init_input),
        };
        output = self.clamp(output + self.iterm - kd * d_input);

        self.last_input = input;
        self.last_time = now;
        self.output = output;
        output
    }

    pub fn output(&self) -> f64 { self.output }
    pub fn integral(&self) -> f64 { self.iterm }
    pub fn set_point(&self) -> f64 { self.set_point }
    pub fn direction(&self) -> Direction { self.direction }
    pub fn limits(&self) -> (f64, f64) { (self.out_min, self.out_max) }

    /// Signed working gains `(kp, ki, kd)`.
    pub fn gains(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    fn apply_gains(&mut self) {
        let s = self.direction.sign();
        let [kp, ki, kd] = self.tunings;
        self.kp = s * kp;
        self.ki = s * ki;
        self.kd = s * kd;
    }

    fn clamp(&self, v: f64) -> f64 {
        v.max(self.out_min).min(self.out_max)
    }
}
