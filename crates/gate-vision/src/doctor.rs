use anyhow::Result;

use crate::calibration::CalibrationData;
use crate::geometry::{GateConfig, GateGeometry};
use crate::VisionConfig;

pub fn check_calibration(cal: &CalibrationData) -> Result<()> {
    cal.validate()?;
    anyhow::ensure!(cal.cx() > 0.0 && cal.cy() > 0.0, "principal point should lie inside the image");
    Ok(())
}

pub fn check_gate(gate: &GateConfig) -> Result<()> {
    anyhow::ensure!(gate.target_size_cm > 0.0, "gate.target_size_cm must be > 0");
    anyhow::ensure!(gate.target_distance_cm > 0.0, "gate.target_distance_cm must be > 0");
    let g = GateGeometry::from_config(gate);
    let left_edge = g.left_marker().iter().map(|p| p[0]).fold(f64::MIN, f64::max);
    let right_edge = g.right_marker().iter().map(|p| p[0]).fold(f64::MAX, f64::min);
    anyhow::ensure!(
        left_edge < right_edge,
        "gate.target_distance_cm must exceed target_size_cm (markers overlap)"
    );
    Ok(())
}

pub fn check_vision(v: &VisionConfig) -> Result<()> {
    match v.backend.as_str() {
        "replay" => anyhow::ensure!(
            v.replay_path.as_ref().map(|p| !p.is_empty()).unwrap_or(false),
            "vision.replay_path missing"
        ),
        other => anyhow::bail!("unknown vision.backend: {}", other),
    }
    if let Some(px) = v.max_reprojection_px {
        anyhow::ensure!(px > 0.0, "vision.max_reprojection_px must be > 0");
    }
    Ok(())
}
