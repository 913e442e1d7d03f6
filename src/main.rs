// src/main.rs

mod annotator;
mod config;
mod ocr;
mod pipeline;
mod plate_format;
mod plate_localizer;
mod preprocessing;
mod registry;
mod types;
mod vehicle_detection;
mod video;

use anyhow::{Context, Result};
use opencv::{highgui, prelude::*};
use pipeline::{PlateReadout, RecognitionPipeline};
use plate_format::PlateFormat;
use plate_localizer::make_localizer;
use registry::PlateRegistry;
use tracing::info;
use types::Config;
use vehicle_detection::YoloDetector;
use video::VideoSource;

const WINDOW_NAME: &str = "Plate Recognition";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load("config.yaml").context("Failed to load config.yaml")?;

    tracing_subscriber::fmt()
        .with_env_filter(config.logging.level.as_str())
        .init();

    info!("🚗 License Plate Recognition System Starting");

    // Everything opened here is fatal on failure; once the frame loop starts,
    // failures are contained per frame or per vehicle.
    let registry = PlateRegistry::connect(&config.registry.database_url).await?;
    registry.ensure_schema().await?;

    let detector = YoloDetector::new(&config.detection, &config.inference)?;
    let localizer = make_localizer(&config.localizer, &config.inference)?;
    let ocr = ocr::TesseractOcr::new(&config.ocr)?;
    let format = PlateFormat::new(&config.plate.grammar)?;

    let mut source = VideoSource::open(&config.video)?;
    let mut writer = video::create_writer(
        &config.video,
        source.width as i32,
        source.height as i32,
        source.fps,
    )?;

    let mut pipeline = RecognitionPipeline::new(
        Box::new(detector),
        localizer,
        Box::new(ocr),
        format,
        registry.clone(),
    );

    info!("Entering frame loop (ESC or q to stop)");

    let mut frames = 0u64;
    let mut vehicles = 0u64;
    let mut known = 0u64;
    let mut unknown = 0u64;

    while let Some(frame) = source.read_frame()? {
        let reports = pipeline.process_frame(&frame).await;

        frames += 1;
        vehicles += reports.len() as u64;
        for report in &reports {
            match &report.readout {
                PlateReadout::Known { plate, record } => {
                    known += 1;
                    info!("Known plate {} ({} {})", plate, record.owner, record.model);
                }
                PlateReadout::Unknown { plate } => {
                    unknown += 1;
                    info!("Unrecognized plate {}", plate);
                }
                _ => {}
            }
        }

        let annotated = annotator::render(&frame, &reports)?;

        if let Some(writer) = writer.as_mut() {
            writer.write(&annotated)?;
        }

        if config.video.display {
            highgui::imshow(WINDOW_NAME, &annotated)?;

            // Stop is only observed here, between frames, so the in-flight
            // frame is always fully processed and drawn.
            let key = highgui::wait_key(1)?;
            if key == 27 || key == i32::from(b'q') {
                info!("Stop requested");
                break;
            }
        }
    }

    if let Some(writer) = writer.as_mut() {
        writer.release()?;
    }
    if config.video.display {
        highgui::destroy_all_windows()?;
    }
    registry.close().await;

    info!("Processing complete");
    info!("  Frames processed: {frames}");
    info!("  Vehicles observed: {vehicles}");
    info!("  Plates matched: {known} known, {unknown} unknown");

    Ok(())
}
