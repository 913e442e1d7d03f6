// src/annotator.rs

use crate::pipeline::{clamp_bbox, PlateReadout, VehicleReport};
use crate::types::Frame;
use anyhow::Result;
use opencv::{core, imgproc, prelude::*};

/// Draw every vehicle report onto a BGR copy of the frame. Total over all
/// readout variants: the vehicle box and class label are always drawn, plate
/// text and color only reflect what the pipeline actually established.
pub fn render(frame: &Frame, reports: &[VehicleReport]) -> Result<Mat> {
    let mat = Mat::from_slice(&frame.data)?;
    let mat = mat.reshape(3, frame.height as i32)?;

    let mut canvas = Mat::default();
    imgproc::cvt_color(&mat, &mut canvas, imgproc::COLOR_RGB2BGR, 0)?;

    for report in reports {
        let Some([x1, y1, x2, y2]) = clamp_bbox(report.detection.bbox, frame.width, frame.height)
        else {
            continue;
        };

        let color = readout_color(&report.readout);
        let rect = core::Rect::new(
            x1 as i32,
            y1 as i32,
            (x2 - x1) as i32,
            (y2 - y1) as i32,
        );
        imgproc::rectangle(&mut canvas, rect, color, 2, imgproc::LINE_8, 0)?;

        let label_y = (y1 as i32 - 10).max(20);
        imgproc::put_text(
            &mut canvas,
            &label_text(report),
            core::Point::new(x1 as i32, label_y),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.6,
            color,
            2,
            imgproc::LINE_8,
            false,
        )?;
    }

    Ok(canvas)
}

/// BGR color per outcome: green for registered plates, red for valid but
/// unregistered ones, yellow when the registry could not answer.
fn readout_color(readout: &PlateReadout) -> core::Scalar {
    match readout {
        PlateReadout::Known { .. } => core::Scalar::new(0.0, 255.0, 0.0, 0.0),
        PlateReadout::Unknown { .. } => core::Scalar::new(0.0, 0.0, 255.0, 0.0),
        PlateReadout::LookupFailed { .. } => core::Scalar::new(0.0, 255.0, 255.0, 0.0),
        PlateReadout::Invalid { .. } => core::Scalar::new(0.0, 165.0, 255.0, 0.0),
        PlateReadout::NoPlate | PlateReadout::EmptyText => {
            core::Scalar::new(255.0, 128.0, 0.0, 0.0)
        }
    }
}

fn label_text(report: &VehicleReport) -> String {
    let class_name = &report.detection.class_name;
    match &report.readout {
        PlateReadout::NoPlate | PlateReadout::EmptyText => {
            format!("{} {:.0}%", class_name, report.detection.confidence * 100.0)
        }
        PlateReadout::Invalid { raw } => format!("{class_name} {raw}?"),
        PlateReadout::Unknown { plate } => format!("{class_name} {plate}"),
        PlateReadout::Known { plate, record } => {
            format!("{class_name} {plate} {}", record.owner)
        }
        PlateReadout::LookupFailed { plate } => format!("{class_name} {plate} (lookup failed)"),
    }
}
