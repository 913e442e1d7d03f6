// src/video.rs

use crate::types::{Frame, VideoConfig};
use anyhow::{Context, Result};
use opencv::{
    core, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use std::path::{Path, PathBuf};
use tracing::info;

/// Camera or video-file capture. Yields frames until the stream ends or the
/// loop stops; not restartable once exhausted.
pub struct VideoSource {
    cap: VideoCapture,
    pub fps: f64,
    pub width: usize,
    pub height: usize,
    frame_index: u64,
}

impl VideoSource {
    pub fn open(config: &VideoConfig) -> Result<Self> {
        let cap = match config.source.parse::<i32>() {
            Ok(index) => {
                info!("Opening camera {index}");
                let mut cap = VideoCapture::new(index, videoio::CAP_ANY)?;
                cap.set(videoio::CAP_PROP_FRAME_WIDTH, config.capture_width as f64)?;
                cap.set(videoio::CAP_PROP_FRAME_HEIGHT, config.capture_height as f64)?;
                cap
            }
            Err(_) => {
                info!("Opening video file: {}", config.source);
                VideoCapture::from_file(&config.source, videoio::CAP_ANY)?
            }
        };

        if !cap.is_opened()? {
            anyhow::bail!("Failed to open video source: {}", config.source);
        }

        let mut fps = cap.get(videoio::CAP_PROP_FPS)?;
        if !fps.is_finite() || fps <= 0.0 {
            fps = 30.0;
        }
        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as usize;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as usize;

        info!("✓ Video source ready: {}x{} @ {:.1} FPS", width, height, fps);

        Ok(Self {
            cap,
            fps,
            width,
            height,
            frame_index: 0,
        })
    }

    /// Next frame as RGB, or None at end of stream.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut mat = Mat::default();

        if !self.cap.read(&mut mat)? || mat.empty() {
            return Ok(None);
        }

        self.frame_index += 1;
        let timestamp_ms = (self.frame_index as f64 / self.fps) * 1000.0;

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        Ok(Some(Frame {
            data: rgb_mat.data_bytes()?.to_vec(),
            width: rgb_mat.cols() as usize,
            height: rgb_mat.rows() as usize,
            timestamp_ms,
        }))
    }
}

/// Annotated-output writer, only when enabled in config.
pub fn create_writer(
    config: &VideoConfig,
    width: i32,
    height: i32,
    fps: f64,
) -> Result<Option<VideoWriter>> {
    if !config.save_annotated {
        return Ok(None);
    }

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir))?;

    let stem = Path::new(&config.source)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "camera".to_string());
    let output_path =
        PathBuf::from(&config.output_dir).join(format!("{stem}_annotated.mp4"));

    info!("Output video: {}", output_path.display());

    let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
    let writer = VideoWriter::new(
        output_path.to_str().unwrap_or_default(),
        fourcc,
        fps,
        core::Size::new(width, height),
        true,
    )?;

    Ok(Some(writer))
}
