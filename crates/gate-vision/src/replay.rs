use std::io::BufRead;

use anyhow::{Context, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{DetectedMarker, MarkerDetector, MarkerDictionary};

/// One line of a detection recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    #[serde(default)]
    pub frame: u64,
    pub markers: Vec<DetectedMarker>,
}

impl RecordedFrame {
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize recorded frame")
    }
}

/// Plays back recorded detections, one frame per `detect` call.
///
/// The image argument is ignored. Past the end of the recording every frame is
/// empty unless looping is enabled.
#[derive(Debug, Clone)]
pub struct ReplayDetector {
    frames: Vec<Vec<DetectedMarker>>,
    cursor: usize,
    looping: bool,
}

impl ReplayDetector {
    pub fn from_frames(frames: Vec<Vec<DetectedMarker>>, looping: bool) -> Self {
        Self { frames, cursor: 0, looping }
    }

    pub fn open(path: &str, looping: bool) -> Result<Self> {
        let f = std::fs::File::open(path).with_context(|| format!("open detection replay {}", path))?;
        let frames = parse_recording(std::io::BufReader::new(f))
            .with_context(|| format!("parse detection replay {}", path))?;
        info!("vision: replaying {} frames from {}", frames.len(), path);
        Ok(Self::from_frames(frames, looping))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn finished(&self) -> bool {
        !self.looping && self.cursor >= self.frames.len()
    }

    pub fn next_frame(&mut self) -> Vec<DetectedMarker> {
        if self.cursor >= self.frames.len() {
            if !self.looping || self.frames.is_empty() {
                return Vec::new();
            }
            debug!("replay: looping");
            self.cursor = 0;
        }
        let out = self.frames[self.cursor].clone();
        self.cursor += 1;
        out
    }
}

impl MarkerDetector for ReplayDetector {
    fn detect(&mut self, _gray: &GrayImage, _dictionary: MarkerDictionary) -> Result<Vec<DetectedMarker>> {
        Ok(self.next_frame())
    }
}

fn parse_recording(r: impl BufRead) -> Result<Vec<Vec<DetectedMarker>>> {
    let mut frames = Vec::new();
    for (n, line) in r.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let rec: RecordedFrame =
            serde_json::from_str(line).with_context(|| format!("line {}", n + 1))?;
        frames.push(rec.markers);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(id: i32, x: f64) -> DetectedMarker {
        DetectedMarker::new(id, [[x, 0.0], [x + 1.0, 0.0], [x + 1.0, 1.0], [x, 1.0]])
    }

    #[test]
    fn parses_ndjson_and_skips_comments() {
        let rec = "# frame log\n\
            {\"frame\":0,\"markers\":[{\"id\":2,\"corners\":[[0,0],[1,0],[1,1],[0,1]]}]}\n\
            \n\
            {\"markers\":[]}\n";
        let frames = parse_recording(rec.as_bytes()).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][0].id, 2);
        assert!(frames[1].is_empty());
    }

    #[test]
    fn bad_line_reports_its_number() {
        let err = parse_recording("{\"markers\":[]}\nnot json\n".as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn stops_or_loops_at_end() {
        let frames = vec![vec![marker(1, 0.0)], vec![marker(2, 5.0)]];
        let gray = GrayImage::new(1, 1);

        let mut once = ReplayDetector::from_frames(frames.clone(), false);
        assert_eq!(once.detect(&gray, MarkerDictionary::default()).unwrap()[0].id, 1);
        assert_eq!(once.detect(&gray, MarkerDictionary::default()).unwrap()[0].id, 2);
        assert!(once.finished());
        assert!(once.detect(&gray, MarkerDictionary::default()).unwrap().is_empty());

        let mut looped = ReplayDetector::from_frames(frames, true);
        looped.next_frame();
        looped.next_frame();
        assert_eq!(looped.next_frame()[0].id, 1);
        assert!(!looped.finished());
    }

    #[test]
    fn recorded_frame_line_parses_back() {
        let rec = RecordedFrame { frame: 4, markers: vec![marker(2, 3.0)] };
        let back: RecordedFrame = serde_json::from_str(&rec.to_line().unwrap()).unwrap();
        assert_eq!(back, rec);
    }
}
