use serde::Deserialize;

/// Model-space point in centimetres.
pub type Point3 = [f64; 3];

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Side of one square marker (cm).
    pub target_size_cm: f64,
    /// Distance between the marker centres (cm).
    pub target_distance_cm: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { target_size_cm: 12.3, target_distance_cm: 32.2 }
    }
}

/// Two coplanar square markers centred on the gate midpoint, marker plane Z=0.
///
/// Points run clockwise from the upper-left corner of the left marker, then
/// clockwise from the upper-left corner of the right marker. This is the same
/// order the detector reports corners in.
#[derive(Debug, Clone, PartialEq)]
pub struct GateGeometry {
    points: [Point3; 8],
}

impl GateGeometry {
    pub fn new(target_size: f64, target_distance: f64) -> Self {
        let max_dx = (target_size + target_distance) / 2.0;
        let min_dx = max_dx - target_size;
        let dy = target_size / 2.0;
        let points = [
            [-max_dx, -dy, 0.0],
            [-min_dx, -dy, 0.0],
            [-min_dx, dy, 0.0],
            [-max_dx, dy, 0.0],
            [min_dx, -dy, 0.0],
            [max_dx, -dy, 0.0],
            [max_dx, dy, 0.0],
            [min_dx, dy, 0.0],
        ];
        Self { points }
    }

    pub fn from_config(cfg: &GateConfig) -> Self {
        Self::new(cfg.target_size_cm, cfg.target_distance_cm)
    }

    pub fn points(&self) -> &[Point3; 8] {
        &self.points
    }

    pub fn left_marker(&self) -> &[Point3] {
        &self.points[..4]
    }

    pub fn right_marker(&self) -> &[Point3] {
        &self.points[4..]
    }
}
