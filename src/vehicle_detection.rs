// src/vehicle_detection.rs

use crate::preprocessing::letterbox;
use crate::types::{DetectionConfig, Frame, InferenceConfig};
use anyhow::Result;
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info};

const YOLO_INPUT_SIZE: usize = 640;
const YOLO_CLASSES: usize = 80;
const YOLO_ANCHORS: usize = 8400;

// COCO class IDs for vehicles
const VEHICLE_CLASSES: [usize; 4] = [2, 3, 5, 7]; // car, motorcycle, bus, truck

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in original image coordinates
    pub confidence: f32,
    pub class_id: usize,
    pub class_name: String,
}

/// Object detector seam: anything that can turn a frame into a finite list
/// of detections.
pub trait VehicleDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

pub struct YoloDetector {
    session: Session,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
}

impl YoloDetector {
    pub fn new(config: &DetectionConfig, inference: &InferenceConfig) -> Result<Self> {
        info!("Loading YOLO model: {}", config.model_path);

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

        info!("✓ Vehicle detector initialized");
        Ok(Self {
            session,
            confidence_threshold: config.confidence_threshold,
            nms_iou_threshold: config.nms_iou_threshold,
        })
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let shape = [1, 3, YOLO_INPUT_SIZE, YOLO_INPUT_SIZE];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let output = &outputs[0];
        let (_, data) = output.try_extract_tensor::<f32>()?;

        Ok(data.to_vec())
    }

    fn postprocess(
        &self,
        output: &[f32],
        scale: f32,
        pad_x: f32,
        pad_y: f32,
    ) -> Result<Vec<Detection>> {
        // YOLO output: [1, 84, 8400] laid out plane-major
        // Each prediction: [x, y, w, h, class0_conf, ..., class79_conf]
        if output.len() < (4 + YOLO_CLASSES) * YOLO_ANCHORS {
            anyhow::bail!("Unexpected detector output size: {}", output.len());
        }

        let mut detections = Vec::new();

        for i in 0..YOLO_ANCHORS {
            let cx = output[i];
            let cy = output[YOLO_ANCHORS + i];
            let w = output[YOLO_ANCHORS * 2 + i];
            let h = output[YOLO_ANCHORS * 3 + i];

            // Find best class
            let mut max_conf = 0.0f32;
            let mut best_class = 0;
            for c in 0..YOLO_CLASSES {
                let conf = output[YOLO_ANCHORS * (4 + c) + i];
                if conf > max_conf {
                    max_conf = conf;
                    best_class = c;
                }
            }

            if max_conf < self.confidence_threshold || !VEHICLE_CLASSES.contains(&best_class) {
                continue;
            }

            // Center format -> corner format, then reverse the letterbox
            let x1 = (cx - w / 2.0 - pad_x) / scale;
            let y1 = (cy - h / 2.0 - pad_y) / scale;
            let x2 = (cx + w / 2.0 - pad_x) / scale;
            let y2 = (cy + h / 2.0 - pad_y) / scale;

            detections.push(Detection {
                bbox: [x1, y1, x2, y2],
                confidence: max_conf,
                class_id: best_class,
                class_name: class_id_to_name(best_class),
            });
        }

        Ok(nms(detections, self.nms_iou_threshold))
    }
}

impl VehicleDetector for YoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, scale, pad_x, pad_y) =
            letterbox(&frame.data, frame.width, frame.height, YOLO_INPUT_SIZE);

        let output = self.infer(&input)?;
        let detections = self.postprocess(&output, scale, pad_x, pad_y)?;

        debug!("Detected {} vehicles", detections.len());
        Ok(detections)
    }
}

fn class_id_to_name(class_id: usize) -> String {
    match class_id {
        2 => "car",
        3 => "motorcycle",
        5 => "bus",
        7 => "truck",
        _ => "unknown",
    }
    .to_string()
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();

    while !detections.is_empty() {
        let current = detections.remove(0);
        detections.retain(|det| calculate_iou(&current.bbox, &det.bbox) < iou_threshold);
        keep.push(current);
    }

    keep
}

fn calculate_iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
