//! Camera intrinsics and Brown-Conrady distortion, loaded once at startup.
//!
//! The calibration is persisted as TOML:
//!
//! ```toml
//! intrinsic_matrix = [[280.67, 0.0, 320.0], [0.0, 280.67, 240.0], [0.0, 0.0, 1.0]]
//! distortion_coefficients = [0.354, -0.675, 0.0, 0.0, 0.277]
//! ```

use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Point2;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("read calibration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse calibration {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid calibration: {0}")]
    Invalid(String),
}

/// Intrinsic matrix plus distortion `[k1, k2, p1, p2, k3]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    pub intrinsic_matrix: [[f64; 3]; 3],
    pub distortion_coefficients: [f64; 5],
}

const UNDISTORT_ITERS: usize = 20;
const UNDISTORT_EPS: f64 = 1e-12;

impl CalibrationData {
    /// Values measured for the 640x480 gate camera.
    pub fn reference() -> Self {
        let f = 2.806_759_903_445_550_9e2;
        Self {
            intrinsic_matrix: [[f, 0.0, 320.0], [0.0, f, 240.0], [0.0, 0.0, 1.0]],
            distortion_coefficients: [
                3.544_531_073_650_079e-1,
                -6.750_249_231_769_590_6e-1,
                0.0,
                0.0,
                2.770_115_704_865_963_6e-1,
            ],
        }
    }

    /// Pinhole camera with no lens distortion.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            intrinsic_matrix: [[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]],
            distortion_coefficients: [0.0; 5],
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cal: Self = toml::from_str(&s).map_err(|source| CalibrationError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        cal.validate()?;
        Ok(cal)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        use anyhow::Context;
        let path = path.as_ref();
        let s = toml::to_string(self).context("serialize calibration")?;
        std::fs::write(path, s).with_context(|| format!("write calibration {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        let all_finite = self.intrinsic_matrix.iter().flatten().all(|v| v.is_finite())
            && self.distortion_coefficients.iter().all(|v| v.is_finite());
        if !all_finite {
            return Err(CalibrationError::Invalid("non-finite value".into()));
        }
        if self.fx() <= 0.0 || self.fy() <= 0.0 {
            return Err(CalibrationError::Invalid(format!(
                "focal lengths must be positive (fx={}, fy={})",
                self.fx(),
                self.fy()
            )));
        }
        if self.intrinsic_matrix[2] != [0.0, 0.0, 1.0] {
            return Err(CalibrationError::Invalid("last row of intrinsic matrix must be [0, 0, 1]".into()));
        }
        Ok(())
    }

    pub fn fx(&self) -> f64 { self.intrinsic_matrix[0][0] }
    pub fn fy(&self) -> f64 { self.intrinsic_matrix[1][1] }
    pub fn cx(&self) -> f64 { self.intrinsic_matrix[0][2] }
    pub fn cy(&self) -> f64 { self.intrinsic_matrix[1][2] }
    fn skew(&self) -> f64 { self.intrinsic_matrix[0][1] }

    fn distort_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        let [k1, k2, p1, p2, k3] = self.distortion_coefficients;
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
        let xt = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let yt = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        (x * radial + xt, y * radial + yt)
    }

    /// Distorted pixel to undistorted normalized image coordinates.
    ///
    /// Inverts the distortion by fixed-point iteration; returns `None` when the
    /// iteration leaves the finite domain.
    pub fn pixel_to_normalized(&self, px: Point2) -> Option<Point2> {
        let yd = (px[1] - self.cy()) / self.fy();
        let xd = (px[0] - self.cx() - self.skew() * yd) / self.fx();
        if !xd.is_finite() || !yd.is_finite() {
            return None;
        }

        let [k1, k2, p1, p2, k3] = self.distortion_coefficients;
        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_ITERS {
            let r2 = x * x + y * y;
            let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return None;
            }
            let xt = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let yt = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            let xn = (xd - xt) / radial;
            let yn = (yd - yt) / radial;
            if !xn.is_finite() || !yn.is_finite() {
                return None;
            }
            let step = ((xn - x).powi(2) + (yn - y).powi(2)).sqrt();
            x = xn;
            y = yn;
            if step <= UNDISTORT_EPS {
                break;
            }
        }
        Some([x, y])
    }

    /// Projects a camera-frame point through distortion and intrinsics.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Point2> {
        if p_cam.z <= 1e-12 {
            return None;
        }
        let (x, y) = self.distort_normalized(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
        let u = self.fx() * x + self.skew() * y + self.cx();
        let v = self.fy() * y + self.cy();
        (u.is_finite() && v.is_finite()).then_some([u, v])
    }
}
