//! Perspective-n-point for planar targets.
//!
//! Every gate point lies on Z=0, so the pose follows from the plane-to-image
//! homography: `H ~ K [r1 r2 t]`. The homography is fitted with a normalized
//! DLT on undistorted image coordinates, then decomposed and re-orthonormalized.

use nalgebra::{DMatrix, Matrix3, Rotation3, Vector3};
use thiserror::Error;

use crate::calibration::CalibrationData;
use crate::geometry::Point3;
use crate::Point2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PnpError {
    #[error("PnP requires at least {required} correspondences, got {actual}")]
    InsufficientCorrespondences { required: usize, actual: usize },

    #[error("mismatched lengths: model points ({0}) != image points ({1})")]
    MismatchedLengths(usize, usize),

    #[error("model points are not coplanar on Z=0")]
    NonPlanarModel,

    #[error("degenerate geometry: {0}")]
    Degenerate(String),

    #[error("solution places target behind the camera")]
    BehindCamera,

    #[error("reprojection error {rmse:.2}px exceeds {max:.2}px")]
    ReprojectionTooLarge { rmse: f64, max: f64 },
}

/// Camera pose of the model frame: `p_cam = R(rvec) * p_model + tvec`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnpSolution {
    /// Axis-angle rotation (radians).
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
    pub reproj_rmse: f64,
}

pub trait PnpSolver: Send {
    fn solve(
        &self,
        model: &[Point3],
        image: &[Point2],
        calibration: &CalibrationData,
    ) -> Result<PnpSolution, PnpError>;
}

#[derive(Debug, Clone)]
pub struct PlanarPnp {
    pub max_reprojection_px: f64,
}

impl Default for PlanarPnp {
    fn default() -> Self {
        Self { max_reprojection_px: 8.0 }
    }
}

impl PlanarPnp {
    pub fn new(max_reprojection_px: f64) -> Self {
        Self { max_reprojection_px }
    }
}

impl PnpSolver for PlanarPnp {
    fn solve(
        &self,
        model: &[Point3],
        image: &[Point2],
        calibration: &CalibrationData,
    ) -> Result<PnpSolution, PnpError> {
        if model.len() != image.len() {
            return Err(PnpError::MismatchedLengths(model.len(), image.len()));
        }
        if model.len() < 4 {
            return Err(PnpError::InsufficientCorrespondences { required: 4, actual: model.len() });
        }
        if model.iter().any(|p| p[2].abs() > 1e-9) {
            return Err(PnpError::NonPlanarModel);
        }

        let src: Vec<Point2> = model.iter().map(|p| [p[0], p[1]]).collect();
        let dst = image
            .iter()
            .map(|&px| calibration.pixel_to_normalized(px))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PnpError::Degenerate("image point could not be undistorted".into()))?;

        let h = fit_homography(&src, &dst)?;
        let (rotation, t) = decompose(&h)?;

        let mut sq = 0.0;
        for (p, px) in model.iter().zip(image) {
            let p_cam = rotation * Vector3::new(p[0], p[1], p[2]) + t;
            let proj = calibration.project(&p_cam).ok_or(PnpError::BehindCamera)?;
            sq += (proj[0] - px[0]).powi(2) + (proj[1] - px[1]).powi(2);
        }
        let rmse = (sq / model.len() as f64).sqrt();
        if !rmse.is_finite() || rmse > self.max_reprojection_px {
            return Err(PnpError::ReprojectionTooLarge { rmse, max: self.max_reprojection_px });
        }

        let rvec = rotation.scaled_axis();
        Ok(PnpSolution {
            rvec: [rvec.x, rvec.y, rvec.z],
            tvec: [t.x, t.y, t.z],
            reproj_rmse: rmse,
        })
    }
}

/// Translate the centroid to the origin and scale the mean radius to sqrt(2).
fn hartley(pts: &[Point2]) -> (Matrix3<f64>, Vec<Point2>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean > 1e-15 { std::f64::consts::SQRT_2 / mean } else { 1.0 };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let out = pts.iter().map(|p| [s * (p[0] - cx), s * (p[1] - cy)]).collect();
    (t, out)
}

fn fit_homography(src: &[Point2], dst: &[Point2]) -> Result<Matrix3<f64>, PnpError> {
    let n = src.len();
    let (t_src, src_n) = hartley(src);
    let (t_dst, dst_n) = hartley(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A from the 9x9 normal matrix; works for n=4 where thin SVD drops it.
    let eig = nalgebra::SymmetricEigen::new(a.transpose() * &a);
    let mut order: Vec<usize> = (0..9).collect();
    order.sort_by(|&i, &j| {
        eig.eigenvalues[i]
            .abs()
            .partial_cmp(&eig.eigenvalues[j].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let (smallest, second) = (order[0], order[1]);
    if eig.eigenvalues[second].abs() < 1e-10 {
        return Err(PnpError::Degenerate("homography null space is not one-dimensional".into()));
    }

    let v = |j: usize| eig.eigenvectors[(j, smallest)];
    let h_norm = Matrix3::new(v(0), v(1), v(2), v(3), v(4), v(5), v(6), v(7), v(8));
    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| PnpError::Degenerate("normalizing transform not invertible".into()))?;
    let h = t_dst_inv * h_norm * t_src;
    if h.iter().any(|x| !x.is_finite()) {
        return Err(PnpError::Degenerate("non-finite homography".into()));
    }
    Ok(h)
}

/// Splits `H ~ [r1 r2 t]` (normalized image coordinates) into a proper rotation and translation.
fn decompose(h: &Matrix3<f64>) -> Result<(Rotation3<f64>, Vector3<f64>), PnpError> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let (n1, n2) = (h1.norm(), h2.norm());
    if n1 < 1e-12 || n2 < 1e-12 {
        return Err(PnpError::Degenerate("homography columns vanish".into()));
    }
    let mut lambda = 2.0 / (n1 + n2);
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let t = h3 * lambda;

    let m = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = m.svd(true, true);
    let (mut u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(PnpError::Degenerate("rotation SVD failed".into())),
    };
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        for x in u.column_mut(2).iter_mut() {
            *x = -*x;
        }
        r = u * v_t;
    }
    Ok((Rotation3::from_matrix_unchecked(r), t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GateGeometry;

    fn project_all(
        cal: &CalibrationData,
        model: &[Point3],
        rvec: Vector3<f64>,
        tvec: Vector3<f64>,
    ) -> Vec<Point2> {
        let r = Rotation3::from_scaled_axis(rvec);
        model
            .iter()
            .map(|p| cal.project(&(r * Vector3::new(p[0], p[1], p[2]) + tvec)).unwrap())
            .collect()
    }

    #[test]
    fn recovers_frontal_pose() {
        let cal = CalibrationData::pinhole(280.7, 280.7, 320.0, 240.0);
        let gate = GateGeometry::new(12.3, 32.2);
        let t = Vector3::new(4.0, -3.0, 120.0);
        let image = project_all(&cal, gate.points(), Vector3::zeros(), t);

        let sol = PlanarPnp::default().solve(gate.points(), &image, &cal).unwrap();
        for k in 0..3 {
            assert!((sol.tvec[k] - t[k]).abs() < 1e-6, "tvec={:?}", sol.tvec);
            assert!(sol.rvec[k].abs() < 1e-8, "rvec={:?}", sol.rvec);
        }
        assert!(sol.reproj_rmse < 1e-6);
    }

    #[test]
    fn recovers_oblique_pose_through_distortion() {
        let mut cal = CalibrationData::pinhole(600.0, 600.0, 320.0, 240.0);
        cal.distortion_coefficients = [-0.05, 0.01, 0.0, 0.0, 0.0];
        let gate = GateGeometry::new(12.3, 32.2);
        let r = Vector3::new(0.15, -0.3, 0.05);
        let t = Vector3::new(-6.0, 10.0, 150.0);
        let image = project_all(&cal, gate.points(), r, t);

        let sol = PlanarPnp::default().solve(gate.points(), &image, &cal).unwrap();
        for k in 0..3 {
            assert!((sol.tvec[k] - t[k]).abs() < 1e-4, "tvec={:?}", sol.tvec);
            assert!((sol.rvec[k] - r[k]).abs() < 1e-6, "rvec={:?}", sol.rvec);
        }
    }

    #[test]
    fn collapsed_image_points_are_degenerate() {
        let cal = CalibrationData::pinhole(500.0, 500.0, 320.0, 240.0);
        let gate = GateGeometry::new(10.0, 30.0);
        let image = vec![[100.0, 200.0]; 8];
        let err = PlanarPnp::default().solve(gate.points(), &image, &cal).unwrap_err();
        assert!(matches!(err, PnpError::Degenerate(_)), "{err:?}");
    }

    #[test]
    fn inconsistent_correspondences_fail_reprojection() {
        let cal = CalibrationData::pinhole(500.0, 500.0, 320.0, 240.0);
        let gate = GateGeometry::new(10.0, 30.0);
        let mut image = project_all(&cal, gate.points(), Vector3::zeros(), Vector3::new(0.0, 0.0, 100.0));
        image.swap(0, 6);
        image[3][1] += 60.0;
        let err = PlanarPnp::new(2.0).solve(gate.points(), &image, &cal).unwrap_err();
        assert!(matches!(
            err,
            PnpError::ReprojectionTooLarge { .. } | PnpError::BehindCamera | PnpError::Degenerate(_)
        ));
    }

    #[test]
    fn rejects_bad_inputs() {
        let cal = CalibrationData::reference();
        let gate = GateGeometry::new(10.0, 30.0);
        let err = PlanarPnp::default().solve(gate.points(), &[[0.0, 0.0]; 3], &cal).unwrap_err();
        assert_eq!(err, PnpError::MismatchedLengths(8, 3));

        let err = PlanarPnp::default()
            .solve(&gate.points()[..3], &[[0.0, 0.0]; 3], &cal)
            .unwrap_err();
        assert_eq!(err, PnpError::InsufficientCorrespondences { required: 4, actual: 3 });

        let mut raised = *gate.points();
        raised[2][2] = 1.0;
        let err = PlanarPnp::default().solve(&raised, &[[0.0, 0.0]; 8], &cal).unwrap_err();
        assert_eq!(err, PnpError::NonPlanarModel);
    }
}
