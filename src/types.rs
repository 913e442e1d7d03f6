use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub detection: DetectionConfig,
    pub inference: InferenceConfig,
    pub localizer: LocalizerConfig,
    pub ocr: OcrConfig,
    pub plate: PlateConfig,
    pub registry: RegistryConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub model_path: String,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub use_gpu: bool,
    pub num_threads: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalizerBackend {
    Segmentation,
    Contour,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizerConfig {
    pub backend: LocalizerBackend,
    pub segmentation: SegmentationConfig,
    pub contour: ContourConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationConfig {
    pub model_path: String,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContourConfig {
    pub top_k: usize,
    pub approx_epsilon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    pub datapath: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateConfig {
    pub grammar: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub source: String,
    pub capture_width: i32,
    pub capture_height: i32,
    pub display: bool,
    pub save_annotated: bool,
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// One captured video frame as raw RGB24, owned by the pipeline invocation
/// that processes it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

/// An owned RGB24 crop of a frame (a vehicle observation or a plate region).
#[derive(Debug, Clone)]
pub struct Patch {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }
}
