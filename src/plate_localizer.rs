// src/plate_localizer.rs

use crate::preprocessing::letterbox;
use crate::types::{
    ContourConfig, InferenceConfig, LocalizerBackend, LocalizerConfig, Patch, SegmentationConfig,
};
use anyhow::Result;
use opencv::{core, imgproc, prelude::*};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::info;

/// The localizer's verdict on a vehicle crop. `Absent` carries nothing;
/// `Found` geometry is in crop coordinates and still unclamped.
#[derive(Debug, Clone, PartialEq)]
pub enum PlateCandidate {
    Absent,
    Found {
        bbox: [i32; 4],
        confidence: Option<f32>,
    },
}

/// Plate localization seam. Two interchangeable backends implement it; the
/// pipeline never knows which one is active.
pub trait PlateLocalizer {
    fn locate(&mut self, vehicle: &Patch) -> Result<PlateCandidate>;
}

/// Build the backend selected in config.
pub fn make_localizer(
    config: &LocalizerConfig,
    inference: &InferenceConfig,
) -> Result<Box<dyn PlateLocalizer>> {
    match config.backend {
        LocalizerBackend::Segmentation => Ok(Box::new(SegmentationLocalizer::new(
            &config.segmentation,
            inference,
        )?)),
        LocalizerBackend::Contour => Ok(Box::new(ContourLocalizer::new(&config.contour))),
    }
}

// ============================================================================
// Strategy A: learned plate-region model
// ============================================================================

const SEG_INPUT_SIZE: usize = 640;

pub struct SegmentationLocalizer {
    session: Session,
    confidence_threshold: f32,
}

impl SegmentationLocalizer {
    pub fn new(config: &SegmentationConfig, inference: &InferenceConfig) -> Result<Self> {
        info!("Loading plate segmentation model: {}", config.model_path);

        let mut builder = Session::builder()?;
        if inference.use_gpu {
            builder = builder.with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(0)
                .build()])?;
        } else {
            builder = builder.with_execution_providers([CPUExecutionProvider::default().build()])?;
        }

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(inference.num_threads)?
            .commit_from_file(&config.model_path)?;

        info!("✓ Segmentation localizer initialized");
        Ok(Self {
            session,
            confidence_threshold: config.confidence_threshold,
        })
    }
}

impl PlateLocalizer for SegmentationLocalizer {
    fn locate(&mut self, vehicle: &Patch) -> Result<PlateCandidate> {
        if vehicle.is_empty() {
            return Ok(PlateCandidate::Absent);
        }

        let (input, scale, pad_x, pad_y) =
            letterbox(&vehicle.data, vehicle.width, vehicle.height, SEG_INPUT_SIZE);

        let shape = [1, 3, SEG_INPUT_SIZE, SEG_INPUT_SIZE];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;
        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let (_, data) = outputs[0].try_extract_tensor::<f32>()?;

        // Single-class head: rows of [cx, cy, w, h, objectness, class_conf]
        if data.len() % 6 != 0 {
            anyhow::bail!("Unexpected localizer output size: {}", data.len());
        }

        let mut best: Option<([f32; 4], f32)> = None;
        for row in data.chunks_exact(6) {
            let confidence = row[4] * row[5];
            if confidence < self.confidence_threshold {
                continue;
            }
            if best.map_or(true, |(_, c)| confidence > c) {
                best = Some(([row[0], row[1], row[2], row[3]], confidence));
            }
        }

        let Some(([cx, cy, w, h], confidence)) = best else {
            return Ok(PlateCandidate::Absent);
        };

        // Reverse the letterbox back into crop coordinates
        let x1 = ((cx - w / 2.0 - pad_x) / scale).round() as i32;
        let y1 = ((cy - h / 2.0 - pad_y) / scale).round() as i32;
        let x2 = ((cx + w / 2.0 - pad_x) / scale).round() as i32;
        let y2 = ((cy + h / 2.0 - pad_y) / scale).round() as i32;

        Ok(PlateCandidate::Found {
            bbox: [x1, y1, x2, y2],
            confidence: Some(confidence),
        })
    }
}

// ============================================================================
// Strategy B: classical contour heuristic
// ============================================================================

pub struct ContourLocalizer {
    top_k: usize,
    approx_epsilon: f64,
}

impl ContourLocalizer {
    pub fn new(config: &ContourConfig) -> Self {
        Self {
            top_k: config.top_k,
            approx_epsilon: config.approx_epsilon,
        }
    }
}

impl PlateLocalizer for ContourLocalizer {
    fn locate(&mut self, vehicle: &Patch) -> Result<PlateCandidate> {
        if vehicle.is_empty() {
            return Ok(PlateCandidate::Absent);
        }

        let mat = Mat::from_slice(&vehicle.data)?;
        let mat = mat.reshape(3, vehicle.height as i32)?;

        let mut gray = Mat::default();
        imgproc::cvt_color(&mat, &mut gray, imgproc::COLOR_RGB2GRAY, 0)?;

        let mut filtered = Mat::default();
        imgproc::bilateral_filter(&gray, &mut filtered, 11, 17.0, 17.0, core::BORDER_DEFAULT)?;

        let mut edges = Mat::default();
        imgproc::canny(&filtered, &mut edges, 30.0, 200.0, 3, false)?;

        let mut contours: core::Vector<core::Vector<core::Point>> = core::Vector::new();
        imgproc::find_contours(
            &edges,
            &mut contours,
            imgproc::RETR_TREE,
            imgproc::CHAIN_APPROX_SIMPLE,
            core::Point::new(0, 0),
        )?;

        let mut ranked: Vec<(f64, core::Vector<core::Point>)> =
            Vec::with_capacity(contours.len());
        for contour in contours {
            let area = imgproc::contour_area(&contour, false)?;
            ranked.push((area, contour));
        }
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        // First quadrilateral among the largest contours wins; acceptance is
        // binary on the 4-vertex test, so no confidence is attached.
        for (_, contour) in ranked.into_iter().take(self.top_k) {
            let mut approx = core::Vector::<core::Point>::new();
            imgproc::approx_poly_dp(&contour, &mut approx, self.approx_epsilon, true)?;
            if approx.len() == 4 {
                let rect = imgproc::bounding_rect(&approx)?;
                return Ok(PlateCandidate::Found {
                    bbox: [rect.x, rect.y, rect.x + rect.width, rect.y + rect.height],
                    confidence: None,
                });
            }
        }

        Ok(PlateCandidate::Absent)
    }
}
