pub mod calibration;
pub mod camera;
pub mod doctor;
pub mod geometry;
pub mod pnp;
pub mod pose;
pub mod replay;

use anyhow::Result;
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Image point in pixels.
pub type Point2 = [f64; 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedMarker {
    pub id: i32,
    /// Clockwise from the upper-left corner.
    pub corners: [Point2; 4],
}

impl DetectedMarker {
    pub fn new(id: i32, corners: [Point2; 4]) -> Self {
        Self { id, corners }
    }

    pub fn first_corner_x(&self) -> f64 {
        self.corners[0][0]
    }
}

/// Fiducial dictionaries understood by the detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarkerDictionary {
    #[serde(rename = "4x4_50")]
    Dict4x4_50,
    #[serde(rename = "5x5_100")]
    Dict5x5_100,
    #[default]
    #[serde(rename = "6x6_250")]
    Dict6x6_250,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    pub backend: String, // "replay"
    #[serde(default)]
    pub dictionary: MarkerDictionary,

    /// Recorded detections, one JSON frame per line (backend = "replay").
    pub replay_path: Option<String>,
    /// Restart the recording at EOF instead of reporting empty frames.
    pub replay_loop: Option<bool>,

    /// Solves whose RMS reprojection error exceeds this are treated as not found.
    pub max_reprojection_px: Option<f64>,
}

pub trait MarkerDetector: Send {
    fn detect(&mut self, gray: &GrayImage, dictionary: MarkerDictionary) -> Result<Vec<DetectedMarker>>;
}

/// Keeps only the detections carrying `expected_id`, in detector order.
pub fn filter_by_id(detections: &[DetectedMarker], expected_id: i32) -> Vec<&DetectedMarker> {
    detections.iter().filter(|d| d.id == expected_id).collect()
}
