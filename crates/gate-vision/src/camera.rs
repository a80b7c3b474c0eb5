use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CameraConfig {
    pub mode: String,   // "libcamera-jpeg" | "v4l2-mjpeg"
    pub device: String, // /dev/video0 (v4l2)
    pub width: u32,
    pub height: u32,
}

/// Pull-based frame source. `Blank` feeds detectors that ignore pixels (replay).
#[derive(Debug, Clone)]
pub enum FrameSource {
    Camera(CameraConfig),
    Blank { width: u32, height: u32 },
}

impl FrameSource {
    pub async fn next_frame(&self) -> Result<DynamicImage> {
        match self {
            FrameSource::Camera(cfg) => {
                let jpeg = capture_jpeg(cfg).await?;
                image::load_from_memory(&jpeg).context("decode camera jpeg")
            }
            FrameSource::Blank { width, height } => {
                Ok(DynamicImage::ImageLuma8(GrayImage::new(*width, *height)))
            }
        }
    }
}

/// Grayscale copy handed to the marker detector.
pub fn to_gray(frame: &DynamicImage) -> GrayImage {
    frame.to_luma8()
}

/// - libcamera-jpeg: `libcamera-still -n -t 1 --width ... --height ... -o -`
///   writes one JPEG frame on stdout
/// - v4l2-mjpeg: `ffmpeg` grabs a single MJPEG frame from the device
pub async fn capture_jpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    match cfg.mode.as_str() {
        "libcamera-jpeg" => capture_libcamera(cfg).await,
        "v4l2-mjpeg" => capture_v4l2_ffmpeg(cfg).await,
        other => anyhow::bail!("unknown camera.mode: {}", other),
    }
}

async fn capture_libcamera(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = Command::new("libcamera-still");
    cmd.args([
        "-n",
        "-t", "1",
        "--width", &cfg.width.to_string(),
        "--height", &cfg.height.to_string(),
        "-o", "-",
    ]);

    debug!("capture: libcamera-still");
    let out = cmd.output().await.context("run libcamera-still")?;
    anyhow::ensure!(out.status.success(), "libcamera-still failed");
    Ok(out.stdout)
}

async fn capture_v4l2_ffmpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args([
        "-hide_banner", "-loglevel", "error",
        "-f", "video4linux2",
        "-input_format", "mjpeg",
        "-video_size", &format!("{}x{}", cfg.width, cfg.height),
        "-i", &cfg.device,
        "-vframes", "1",
        "-f", "image2pipe",
        "-vcodec", "mjpeg",
        "-",
    ]);

    debug!("capture: ffmpeg v4l2");
    let out = cmd.output().await.context("run ffmpeg capture")?;
    anyhow::ensure!(out.status.success(), "ffmpeg capture failed");
    Ok(out.stdout)
}
