// src/pipeline.rs
//
// Per-frame orchestration: detect vehicles, localize a plate inside each,
// read it, validate it, cross-reference the registry. Every vehicle runs
// independently to exactly one terminal readout; a failing backend is
// contained at the vehicle boundary and never aborts the frame.

use crate::ocr::TextRecognizer;
use crate::plate_format::PlateFormat;
use crate::plate_localizer::{PlateCandidate, PlateLocalizer};
use crate::preprocessing::crop_rgb;
use crate::registry::{PlateRegistry, RegistryRecord};
use crate::types::Frame;
use crate::vehicle_detection::{Detection, VehicleDetector};
use tracing::{debug, warn};

const VEHICLE_CLASSES: [&str; 4] = ["car", "motorcycle", "bus", "truck"];

/// Terminal outcome of one vehicle's run through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PlateReadout {
    /// No plate region was found on the vehicle.
    NoPlate,
    /// A region was read but produced no usable characters.
    EmptyText,
    /// Cleaned text failed the plate grammar; the raw guess is kept as a
    /// diagnostic, never as a confirmed plate.
    Invalid { raw: String },
    /// A valid plate with no registry record.
    Unknown { plate: String },
    /// A valid plate matched to its registry record.
    Known {
        plate: String,
        record: RegistryRecord,
    },
    /// A valid plate whose registry lookup failed; distinct from Unknown so
    /// a store outage is never presented as an unregistered vehicle.
    LookupFailed { plate: String },
}

/// One annotatable vehicle result.
#[derive(Debug, Clone)]
pub struct VehicleReport {
    pub detection: Detection,
    pub readout: PlateReadout,
}

pub struct RecognitionPipeline {
    detector: Box<dyn VehicleDetector>,
    localizer: Box<dyn PlateLocalizer>,
    ocr: Box<dyn TextRecognizer>,
    format: PlateFormat,
    registry: PlateRegistry,
}

impl RecognitionPipeline {
    pub fn new(
        detector: Box<dyn VehicleDetector>,
        localizer: Box<dyn PlateLocalizer>,
        ocr: Box<dyn TextRecognizer>,
        format: PlateFormat,
        registry: PlateRegistry,
    ) -> Self {
        Self {
            detector,
            localizer,
            ocr,
            format,
            registry,
        }
    }

    /// Run every detected vehicle through the staged flow. Infallible: a
    /// detector fault yields an empty report list and the frame passes
    /// through unannotated.
    pub async fn process_frame(&mut self, frame: &Frame) -> Vec<VehicleReport> {
        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Vehicle detector failed, frame passes through: {e:#}");
                return Vec::new();
            }
        };

        let mut reports = Vec::new();
        for detection in detections {
            if !VEHICLE_CLASSES.contains(&detection.class_name.as_str()) {
                debug!("Ignoring non-vehicle detection: {}", detection.class_name);
                continue;
            }

            // Never trust detector geometry
            let Some(bbox) = clamp_bbox(detection.bbox, frame.width, frame.height) else {
                debug!("Dropping degenerate vehicle bbox {:?}", detection.bbox);
                continue;
            };

            let readout = self.process_vehicle(frame, bbox).await;
            reports.push(VehicleReport { detection, readout });
        }

        reports
    }

    async fn process_vehicle(&mut self, frame: &Frame, bbox: [usize; 4]) -> PlateReadout {
        let vehicle = crop_rgb(&frame.data, frame.width, bbox);

        let candidate = match self.localizer.locate(&vehicle) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("Plate localizer failed: {e:#}");
                return PlateReadout::NoPlate;
            }
        };

        let PlateCandidate::Found { bbox, .. } = candidate else {
            return PlateReadout::NoPlate;
        };

        // A candidate whose crop collapses to nothing is demoted; OCR is
        // never invoked on an empty image.
        let bbox = bbox.map(|v| v as f32);
        let Some(bbox) = clamp_bbox(bbox, vehicle.width, vehicle.height) else {
            debug!("Demoting plate candidate with degenerate geometry");
            return PlateReadout::NoPlate;
        };
        let plate = crop_rgb(&vehicle.data, vehicle.width, bbox);
        if plate.is_empty() {
            return PlateReadout::NoPlate;
        }

        let raw = match self.ocr.recognize(&plate) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("OCR failed: {e:#}");
                return PlateReadout::EmptyText;
            }
        };
        if raw.trim().is_empty() {
            return PlateReadout::EmptyText;
        }

        let cleaned = self.format.clean(&raw);
        if cleaned.is_empty() {
            return PlateReadout::EmptyText;
        }
        if !self.format.is_valid(&cleaned) {
            return PlateReadout::Invalid {
                raw: raw.trim().to_string(),
            };
        }

        match self.registry.lookup(&cleaned).await {
            Ok(Some(record)) => PlateReadout::Known {
                plate: cleaned,
                record,
            },
            Ok(None) => PlateReadout::Unknown { plate: cleaned },
            Err(e) => {
                warn!("Registry lookup failed for {cleaned}: {e}");
                PlateReadout::LookupFailed { plate: cleaned }
            }
        }
    }
}

/// Clamp an [x1, y1, x2, y2] box to image bounds. Returns None when the box
/// is degenerate after clamping, so cropping is never attempted on it.
pub fn clamp_bbox(bbox: [f32; 4], width: usize, height: usize) -> Option<[usize; 4]> {
    if bbox.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let x1 = bbox[0].max(0.0).min(width as f32) as usize;
    let y1 = bbox[1].max(0.0).min(height as f32) as usize;
    let x2 = bbox[2].ceil().max(0.0).min(width as f32) as usize;
    let y2 = bbox[3].ceil().max(0.0).min(height as f32) as usize;

    if x2 > x1 && y2 > y1 {
        Some([x1, y1, x2, y2])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Patch;
    use anyhow::Result;
    use std::collections::VecDeque;

    struct StubDetector(Vec<Detection>);

    impl VehicleDetector for StubDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    impl VehicleDetector for FailingDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            anyhow::bail!("detector backend offline")
        }
    }

    /// Replays a scripted sequence of verdicts, one per vehicle.
    struct ScriptedLocalizer(VecDeque<PlateCandidate>);

    impl PlateLocalizer for ScriptedLocalizer {
        fn locate(&mut self, _vehicle: &Patch) -> Result<PlateCandidate> {
            Ok(self.0.pop_front().unwrap_or(PlateCandidate::Absent))
        }
    }

    struct FailingLocalizer;

    impl PlateLocalizer for FailingLocalizer {
        fn locate(&mut self, _vehicle: &Patch) -> Result<PlateCandidate> {
            anyhow::bail!("segmentation model crashed")
        }
    }

    struct StubOcr(String);

    impl TextRecognizer for StubOcr {
        fn recognize(&mut self, _plate: &Patch) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingOcr;

    impl TextRecognizer for FailingOcr {
        fn recognize(&mut self, _plate: &Patch) -> Result<String> {
            anyhow::bail!("ocr backend offline")
        }
    }

    fn test_frame() -> Frame {
        Frame {
            data: vec![0u8; 64 * 48 * 3],
            width: 64,
            height: 48,
            timestamp_ms: 0.0,
        }
    }

    fn car(bbox: [f32; 4]) -> Detection {
        Detection {
            bbox,
            confidence: 0.9,
            class_id: 2,
            class_name: "car".to_string(),
        }
    }

    fn found() -> PlateCandidate {
        PlateCandidate::Found {
            bbox: [2, 2, 30, 14],
            confidence: Some(0.8),
        }
    }

    async fn memory_registry() -> PlateRegistry {
        let registry = PlateRegistry::connect("sqlite::memory:").await.unwrap();
        registry.ensure_schema().await.unwrap();
        registry
    }

    fn pipeline_with(
        detector: Box<dyn VehicleDetector>,
        localizer: Box<dyn PlateLocalizer>,
        ocr: Box<dyn TextRecognizer>,
        registry: PlateRegistry,
    ) -> RecognitionPipeline {
        RecognitionPipeline::new(
            detector,
            localizer,
            ocr,
            PlateFormat::new("^[A-Z]{3}[0-9]{3,4}$").unwrap(),
            registry,
        )
    }

    #[tokio::test]
    async fn known_plate_end_to_end() {
        let registry = memory_registry().await;
        registry.register("ABC123", "Maria Rojas", "Renault Logan").await.unwrap();

        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![car([4.0, 4.0, 40.0, 40.0])])),
            Box::new(ScriptedLocalizer(VecDeque::from([found()]))),
            Box::new(StubOcr(" a b c - 1 2 3 ".to_string())),
            registry,
        );

        let reports = pipeline.process_frame(&test_frame()).await;
        assert_eq!(reports.len(), 1);
        match &reports[0].readout {
            PlateReadout::Known { plate, record } => {
                assert_eq!(plate, "ABC123");
                assert_eq!(record.owner, "Maria Rojas");
            }
            other => panic!("expected Known, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unregistered_plate_is_unknown() {
        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![car([4.0, 4.0, 40.0, 40.0])])),
            Box::new(ScriptedLocalizer(VecDeque::from([found()]))),
            Box::new(StubOcr("XYZ9876".to_string())),
            memory_registry().await,
        );

        let reports = pipeline.process_frame(&test_frame()).await;
        assert_eq!(
            reports[0].readout,
            PlateReadout::Unknown {
                plate: "XYZ9876".to_string()
            }
        );
    }

    #[tokio::test]
    async fn vehicle_without_plate_is_still_reported() {
        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![car([4.0, 4.0, 40.0, 40.0])])),
            Box::new(ScriptedLocalizer(VecDeque::from([PlateCandidate::Absent]))),
            Box::new(StubOcr("ABC123".to_string())),
            memory_registry().await,
        );

        let reports = pipeline.process_frame(&test_frame()).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].readout, PlateReadout::NoPlate);
    }

    #[tokio::test]
    async fn punctuation_only_text_counts_as_empty() {
        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![car([4.0, 4.0, 40.0, 40.0])])),
            Box::new(ScriptedLocalizer(VecDeque::from([found()]))),
            Box::new(StubOcr("???".to_string())),
            memory_registry().await,
        );

        let reports = pipeline.process_frame(&test_frame()).await;
        assert_eq!(reports[0].readout, PlateReadout::EmptyText);
    }

    #[tokio::test]
    async fn whitespace_text_counts_as_empty() {
        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![car([4.0, 4.0, 40.0, 40.0])])),
            Box::new(ScriptedLocalizer(VecDeque::from([found()]))),
            Box::new(StubOcr("   ".to_string())),
            memory_registry().await,
        );

        let reports = pipeline.process_frame(&test_frame()).await;
        assert_eq!(reports[0].readout, PlateReadout::EmptyText);
    }

    #[tokio::test]
    async fn malformed_plate_is_invalid_with_diagnostic() {
        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![car([4.0, 4.0, 40.0, 40.0])])),
            Box::new(ScriptedLocalizer(VecDeque::from([found()]))),
            Box::new(StubOcr("AB123".to_string())),
            memory_registry().await,
        );

        let reports = pipeline.process_frame(&test_frame()).await;
        assert_eq!(
            reports[0].readout,
            PlateReadout::Invalid {
                raw: "AB123".to_string()
            }
        );
    }

    #[tokio::test]
    async fn degenerate_candidate_is_demoted() {
        let zero_width = PlateCandidate::Found {
            bbox: [10, 4, 10, 12],
            confidence: None,
        };
        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![car([4.0, 4.0, 40.0, 40.0])])),
            Box::new(ScriptedLocalizer(VecDeque::from([zero_width]))),
            Box::new(StubOcr("ABC123".to_string())),
            memory_registry().await,
        );

        let reports = pipeline.process_frame(&test_frame()).await;
        assert_eq!(reports[0].readout, PlateReadout::NoPlate);
    }

    #[tokio::test]
    async fn candidate_outside_crop_is_demoted() {
        let out_of_bounds = PlateCandidate::Found {
            bbox: [100, 100, 200, 160],
            confidence: Some(0.9),
        };
        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![car([4.0, 4.0, 40.0, 40.0])])),
            Box::new(ScriptedLocalizer(VecDeque::from([out_of_bounds]))),
            Box::new(StubOcr("ABC123".to_string())),
            memory_registry().await,
        );

        let reports = pipeline.process_frame(&test_frame()).await;
        assert_eq!(reports[0].readout, PlateReadout::NoPlate);
    }

    #[tokio::test]
    async fn non_vehicle_detections_are_ignored() {
        let person = Detection {
            bbox: [4.0, 4.0, 40.0, 40.0],
            confidence: 0.95,
            class_id: 0,
            class_name: "person".to_string(),
        };
        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![person])),
            Box::new(ScriptedLocalizer(VecDeque::from([found()]))),
            Box::new(StubOcr("ABC123".to_string())),
            memory_registry().await,
        );

        assert!(pipeline.process_frame(&test_frame()).await.is_empty());
    }

    #[tokio::test]
    async fn degenerate_detection_bbox_is_dropped() {
        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![car([40.0, 40.0, 4.0, 4.0])])),
            Box::new(ScriptedLocalizer(VecDeque::from([found()]))),
            Box::new(StubOcr("ABC123".to_string())),
            memory_registry().await,
        );

        assert!(pipeline.process_frame(&test_frame()).await.is_empty());
    }

    #[tokio::test]
    async fn detector_fault_yields_empty_frame() {
        let mut pipeline = pipeline_with(
            Box::new(FailingDetector),
            Box::new(ScriptedLocalizer(VecDeque::new())),
            Box::new(StubOcr("ABC123".to_string())),
            memory_registry().await,
        );

        assert!(pipeline.process_frame(&test_frame()).await.is_empty());
    }

    #[tokio::test]
    async fn localizer_fault_is_contained_to_the_vehicle() {
        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![car([4.0, 4.0, 40.0, 40.0])])),
            Box::new(FailingLocalizer),
            Box::new(StubOcr("ABC123".to_string())),
            memory_registry().await,
        );

        let reports = pipeline.process_frame(&test_frame()).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].readout, PlateReadout::NoPlate);
    }

    #[tokio::test]
    async fn ocr_fault_is_contained_to_the_vehicle() {
        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![car([4.0, 4.0, 40.0, 40.0])])),
            Box::new(ScriptedLocalizer(VecDeque::from([found()]))),
            Box::new(FailingOcr),
            memory_registry().await,
        );

        let reports = pipeline.process_frame(&test_frame()).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].readout, PlateReadout::EmptyText);
    }

    #[tokio::test]
    async fn registry_outage_is_not_reported_as_unknown() {
        let registry = memory_registry().await;
        registry.close().await;

        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![car([4.0, 4.0, 40.0, 40.0])])),
            Box::new(ScriptedLocalizer(VecDeque::from([found()]))),
            Box::new(StubOcr("ABC123".to_string())),
            registry,
        );

        let reports = pipeline.process_frame(&test_frame()).await;
        assert_eq!(
            reports[0].readout,
            PlateReadout::LookupFailed {
                plate: "ABC123".to_string()
            }
        );
    }

    #[tokio::test]
    async fn sibling_vehicles_are_processed_independently() {
        let registry = memory_registry().await;
        registry.register("ABC123", "Maria Rojas", "Renault Logan").await.unwrap();

        let mut pipeline = pipeline_with(
            Box::new(StubDetector(vec![
                car([2.0, 2.0, 30.0, 30.0]),
                car([32.0, 2.0, 62.0, 30.0]),
            ])),
            Box::new(ScriptedLocalizer(VecDeque::from([
                PlateCandidate::Absent,
                found(),
            ]))),
            Box::new(StubOcr("ABC123".to_string())),
            registry,
        );

        let reports = pipeline.process_frame(&test_frame()).await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].readout, PlateReadout::NoPlate);
        assert!(matches!(reports[1].readout, PlateReadout::Known { .. }));
    }

    #[test]
    fn clamp_keeps_inside_box() {
        assert_eq!(clamp_bbox([1.0, 2.0, 10.0, 12.0], 64, 48), Some([1, 2, 10, 12]));
    }

    #[test]
    fn clamp_trims_to_bounds() {
        assert_eq!(
            clamp_bbox([-5.0, -3.0, 100.0, 100.0], 64, 48),
            Some([0, 0, 64, 48])
        );
    }

    #[test]
    fn clamp_rejects_reversed_box() {
        assert_eq!(clamp_bbox([10.0, 10.0, 5.0, 20.0], 64, 48), None);
        assert_eq!(clamp_bbox([5.0, 20.0, 10.0, 10.0], 64, 48), None);
    }

    #[test]
    fn clamp_rejects_nan() {
        assert_eq!(clamp_bbox([f32::NAN, 0.0, 10.0, 10.0], 64, 48), None);
    }
}
