use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlightState {
    #[default]
    Unarmed,
    Armed,
    Flying,
}

impl fmt::Display for FlightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlightState::Unarmed => "unarmed",
            FlightState::Armed => "armed",
            FlightState::Flying => "flying",
        };
        f.write_str(s)
    }
}

/// Snapshot for operator display.
#[derive(Debug, Clone, Default)]
pub struct FlightStatus {
    pub state: FlightState,
    pub marker_id: i32,
    pub missed_frames: u32,
    pub last_fix: Option<Instant>,
    pub last_height_cm: Option<f64>,
    pub last_throttle: Option<f64>,
}

impl FlightStatus {
    pub fn fix_age(&self) -> Option<Duration> {
        self.last_fix.map(|t| t.elapsed())
    }
}
