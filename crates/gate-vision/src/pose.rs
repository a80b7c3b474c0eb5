use std::time::Instant;

use nalgebra::{Rotation3, Vector3};
use tracing::debug;

use crate::calibration::CalibrationData;
use crate::geometry::GateGeometry;
use crate::pnp::PnpSolver;
use crate::{filter_by_id, DetectedMarker, Point2};

/// A gate needs exactly this many markers with the configured ID.
pub const MARKERS_PER_GATE: usize = 2;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoseEstimate {
    pub found: bool,
    /// Gate origin in camera coordinates (cm).
    pub translation: [f64; 3],
    /// Axis-angle rotation from gate to camera frame (radians).
    pub rotation: [f64; 3],
    pub solve_ms: f64,
    /// Markers carrying the expected ID in this frame.
    pub matched: usize,
    pub reproj_rmse: Option<f64>,
}

impl PoseEstimate {
    fn not_found(matched: usize) -> Self {
        Self { matched, ..Self::default() }
    }

    /// Camera distance from the marker plane (cm), positive in front of the gate.
    pub fn height(&self) -> Option<f64> {
        if !self.found {
            return None;
        }
        let r = Rotation3::from_scaled_axis(Vector3::from(self.rotation));
        let t = Vector3::from(self.translation);
        Some((r.inverse() * t).z)
    }

    /// Straight-line distance from the camera to the gate centre (cm).
    pub fn range(&self) -> Option<f64> {
        self.found.then(|| Vector3::from(self.translation).norm())
    }

    pub fn status_line(&self) -> String {
        if !self.found {
            return format!("{:.1} ms not found (matched {})", self.solve_ms, self.matched);
        }
        let [x, y, z] = self.translation;
        let [a, b, c] = self.rotation.map(f64::to_degrees);
        format!(
            "{:.1} ms ({:.1}, {:.1}, {:.1}) r:({:.1}, {:.1}, {:.1}) len:{:.1}",
            self.solve_ms,
            x, y, z,
            a, b, c,
            self.range().unwrap_or(0.0)
        )
    }
}

pub struct PoseSolver {
    calibration: CalibrationData,
    geometry: GateGeometry,
    pnp: Box<dyn PnpSolver>,
    image_points: Vec<Point2>,
}

impl PoseSolver {
    pub fn new(calibration: CalibrationData, geometry: GateGeometry, pnp: Box<dyn PnpSolver>) -> Self {
        Self {
            calibration,
            geometry,
            pnp,
            image_points: Vec::with_capacity(4 * MARKERS_PER_GATE),
        }
    }

    pub fn geometry(&self) -> &GateGeometry {
        &self.geometry
    }

    pub fn calibration(&self) -> &CalibrationData {
        &self.calibration
    }

    pub fn solve(&mut self, detections: &[DetectedMarker], expected_id: i32) -> PoseEstimate {
        let start = Instant::now();
        let mut est = self.solve_inner(detections, expected_id);
        est.solve_ms = start.elapsed().as_secs_f64() * 1000.0;
        est
    }

    fn solve_inner(&mut self, detections: &[DetectedMarker], expected_id: i32) -> PoseEstimate {
        let mut gate = filter_by_id(detections, expected_id);
        if gate.len() != MARKERS_PER_GATE {
            return PoseEstimate::not_found(gate.len());
        }

        // Stable sort: equal x keeps detector order.
        gate.sort_by(|a, b| {
            a.first_corner_x()
                .partial_cmp(&b.first_corner_x())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        self.image_points.clear();
        for m in &gate {
            self.image_points.extend_from_slice(&m.corners);
        }

        match self.pnp.solve(self.geometry.points(), &self.image_points, &self.calibration) {
            Ok(sol) => PoseEstimate {
                found: true,
                translation: sol.tvec,
                rotation: sol.rvec,
                solve_ms: 0.0,
                matched: MARKERS_PER_GATE,
                reproj_rmse: Some(sol.reproj_rmse),
            },
            Err(e) => {
                debug!("pose: solve failed: {}", e);
                PoseEstimate::not_found(MARKERS_PER_GATE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::geometry::Point3;
    use crate::pnp::{PlanarPnp, PnpError, PnpSolution};

    const ID: i32 = 2;

    fn solver() -> PoseSolver {
        PoseSolver::new(
            CalibrationData::pinhole(280.7, 280.7, 320.0, 240.0),
            GateGeometry::new(12.3, 32.2),
            Box::new(PlanarPnp::default()),
        )
    }

    /// Projects the gate as seen from `t` (camera frame) with the given rotation.
    fn gate_markers(s: &PoseSolver, rvec: [f64; 3], t: [f64; 3]) -> (DetectedMarker, DetectedMarker) {
        let r = Rotation3::from_scaled_axis(Vector3::from(rvec));
        let px: Vec<Point2> = s
            .geometry()
            .points()
            .iter()
            .map(|p| s.calibration().project(&(r * Vector3::from(*p) + Vector3::from(t))).unwrap())
            .collect();
        let left = DetectedMarker::new(ID, [px[0], px[1], px[2], px[3]]);
        let right = DetectedMarker::new(ID, [px[4], px[5], px[6], px[7]]);
        (left, right)
    }

    #[test]
    fn frontal_gate_gives_height_equal_to_depth() {
        let mut s = solver();
        let (l, r) = gate_markers(&s, [0.0; 3], [0.0, 5.0, 90.0]);
        let est = s.solve(&[l, r], ID);
        assert!(est.found);
        assert!((est.height().unwrap() - 90.0).abs() < 1e-6);
        assert!(est.solve_ms >= 0.0);
        assert!(est.status_line().contains("len:"));
    }

    #[test]
    fn height_is_measured_orthogonal_to_the_marker_plane() {
        let mut s = solver();
        // Camera yawed about the gate's vertical axis, gate centred 120 cm away.
        let yaw = 0.4_f64;
        let (l, r) = gate_markers(&s, [0.0, yaw, 0.0], [0.0, 0.0, 120.0]);
        let est = s.solve(&[l, r], ID);
        assert!(est.found);
        assert!((est.range().unwrap() - 120.0).abs() < 1e-5);
        assert!((est.height().unwrap() - 120.0 * yaw.cos()).abs() < 1e-5);
    }

    #[test]
    fn wrong_marker_count_is_not_found_and_cleared() {
        let mut s = solver();
        let (l, r) = gate_markers(&s, [0.0; 3], [0.0, 0.0, 100.0]);

        // Prime with a good solve so stale values would be visible.
        assert!(s.solve(&[l.clone(), r.clone()], ID).found);

        let spurious = DetectedMarker::new(ID, [[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 2.0]]);
        let cases: Vec<Vec<DetectedMarker>> = vec![
            vec![],
            vec![l.clone()],
            vec![l.clone(), r.clone(), spurious],
            vec![l.clone(), DetectedMarker { id: 9, ..r.clone() }],
        ];
        for dets in cases {
            let est = s.solve(&dets, ID);
            assert!(!est.found);
            assert_eq!(est.translation, [0.0; 3]);
            assert_eq!(est.rotation, [0.0; 3]);
            assert!(est.height().is_none());
        }
    }

    #[test]
    fn detection_order_does_not_change_the_pose() {
        let mut s = solver();
        let (l, r) = gate_markers(&s, [0.1, -0.2, 0.05], [-3.0, 4.0, 110.0]);
        let noise = DetectedMarker::new(5, [[0.0, 0.0]; 4]);
        let a = s.solve(&[l.clone(), noise.clone(), r.clone()], ID);
        let b = s.solve(&[r, noise, l], ID);
        assert!(a.found && b.found);
        assert_eq!(a.translation, b.translation);
        assert_eq!(a.rotation, b.rotation);
    }

    /// Returns a fixed pose and keeps the image points it was handed.
    struct Recording {
        seen: Arc<Mutex<Vec<Point2>>>,
    }

    impl PnpSolver for Recording {
        fn solve(&self, _model: &[Point3], image: &[Point2], _cal: &CalibrationData) -> Result<PnpSolution, PnpError> {
            *self.seen.lock().unwrap() = image.to_vec();
            Ok(PnpSolution { rvec: [0.0; 3], tvec: [0.0, 0.0, 50.0], reproj_rmse: 0.0 })
        }
    }

    #[test]
    fn equal_first_corner_x_keeps_detector_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut s = PoseSolver::new(
            CalibrationData::pinhole(280.7, 280.7, 320.0, 240.0),
            GateGeometry::new(12.3, 32.2),
            Box::new(Recording { seen: seen.clone() }),
        );
        // Stacked vertically: same first-corner x.
        let upper = DetectedMarker::new(ID, [[100.0, 10.0], [120.0, 10.0], [120.0, 30.0], [100.0, 30.0]]);
        let lower = DetectedMarker::new(ID, [[100.0, 50.0], [120.0, 50.0], [120.0, 70.0], [100.0, 70.0]]);
        let noise = DetectedMarker::new(4, [[0.0, 0.0]; 4]);

        for (first, second) in [(&upper, &lower), (&lower, &upper)] {
            let est = s.solve(&[first.clone(), noise.clone(), second.clone()], ID);
            assert!(est.found);
            let expected: Vec<Point2> = first.corners.iter().chain(&second.corners).copied().collect();
            assert_eq!(*seen.lock().unwrap(), expected);
        }
    }

    #[test]
    fn marker_pairs_are_sorted_left_to_right() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut s = PoseSolver::new(
            CalibrationData::pinhole(280.7, 280.7, 320.0, 240.0),
            GateGeometry::new(12.3, 32.2),
            Box::new(Recording { seen: seen.clone() }),
        );
        let left = DetectedMarker::new(ID, [[100.0, 10.0], [120.0, 10.0], [120.0, 30.0], [100.0, 30.0]]);
        let right = DetectedMarker::new(ID, [[200.0, 10.0], [220.0, 10.0], [220.0, 30.0], [200.0, 30.0]]);
        s.solve(&[right.clone(), left.clone()], ID);
        let expected: Vec<Point2> = left.corners.iter().chain(&right.corners).copied().collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[test]
    fn solver_failure_is_not_found() {
        let mut s = solver();
        let dot = DetectedMarker::new(ID, [[100.0, 100.0]; 4]);
        let est = s.solve(&[dot.clone(), dot], ID);
        assert!(!est.found);
        assert_eq!(est.matched, 2);
        assert!(est.status_line().contains("not found"));
    }
}
