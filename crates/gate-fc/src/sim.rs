//! Step response of the PID loop against a first-order lag, for offline tuning.

use crate::pid::{Direction, Pid, ProportionalMode};

pub const DT: f64 = 0.1;
pub const STEPS: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct FirstOrderPlant {
    pub time_constant: f64,
    pub out: f64,
}

impl Default for FirstOrderPlant {
    fn default() -> Self {
        Self { time_constant: 0.97, out: 0.0 }
    }
}

impl FirstOrderPlant {
    pub fn update(&mut self, input: f64) -> f64 {
        self.out = self.out * self.time_constant + input * (1.0 - self.time_constant);
        self.out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimStep {
    pub now: f64,
    pub start: f64,
    pub control: f64,
    pub end: f64,
}

impl SimStep {
    pub fn line(&self) -> String {
        format!(
            "now:{:4.1} startval:{:6.3} controlOut:{:6.3} => {:6.3}",
            self.now, self.start, self.control, self.end
        )
    }
}

/// The stock tuning exercise: set point 8 with output limited to `[0, 10]`.
pub fn default_pid() -> Pid {
    let mut pid = Pid::new(Direction::Forward);
    pid.set_output_limits(0.0, 10.0);
    pid.set_tunings(30.0, 5.0, 5.0, ProportionalMode::OnError);
    pid.set_set_point(8.0);
    pid
}

pub fn step_response(pid: &mut Pid, plant: &mut FirstOrderPlant, steps: usize) -> Vec<SimStep> {
    let mut now = 0.0;
    pid.prepare_for_start(now, plant.out);
    (0..steps)
        .map(|_| {
            now += DT;
            let start = plant.out;
            let control = pid.compute(now, start);
            let end = plant.update(control);
            SimStep { now, start, control, end }
        })
        .collect()
}
