use anyhow::Result;

use crate::{FlightConfig, PidConfig, TransmitterConfig};

pub fn check_transmitter(t: &TransmitterConfig) -> Result<()> {
    anyhow::ensure!(!t.serial_dev.is_empty(), "transmitter.serial_dev missing");
    anyhow::ensure!(t.baud > 0, "transmitter.baud must be > 0");
    Ok(())
}

pub fn check_pid(name: &str, p: &PidConfig) -> Result<()> {
    anyhow::ensure!(
        p.kp >= 0.0 && p.ki >= 0.0 && p.kd >= 0.0,
        "{}: gains must be >= 0 (use direction = \"reverse\" to invert)",
        name
    );
    anyhow::ensure!(p.output_min <= p.output_max, "{}: output_min > output_max", name);
    if let Some(out) = p.initial_output {
        anyhow::ensure!(
            (p.output_min..=p.output_max).contains(&out),
            "{}: initial_output {} outside [{}, {}]",
            name,
            out,
            p.output_min,
            p.output_max
        );
    }
    Ok(())
}

pub fn check_flight(f: &FlightConfig) -> Result<()> {
    anyhow::ensure!(f.max_missed_frames >= 1, "flight.max_missed_frames must be >= 1");
    anyhow::ensure!(f.hold_target_cm.is_finite(), "flight.hold_target_cm must be finite");
    check_pid("flight.height_pid", &f.height_pid)
}
