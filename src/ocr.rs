// src/ocr.rs

use crate::preprocessing::rgb_to_gray;
use crate::types::{OcrConfig, Patch};
use anyhow::{Context, Result};
use leptess::tesseract::TessApi;
use std::ffi::CString;
use tracing::info;

/// Text recognition seam: raw, unvalidated text out of a plate crop.
pub trait TextRecognizer {
    fn recognize(&mut self, plate: &Patch) -> Result<String>;
}

pub struct TesseractOcr {
    api: TessApi,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let mut api = TessApi::new(Some(&config.datapath), &config.language)
            .with_context(|| format!("Failed to initialize Tesseract ({})", config.language))?;

        // Plates are a single line of capitals and digits
        api.raw.set_variable(
            &CString::new("tessedit_char_whitelist")?,
            &CString::new("ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789")?,
        )?;
        api.raw.set_variable(
            &CString::new("tessedit_pageseg_mode")?,
            &CString::new("8")?,
        )?;

        info!("✓ Tesseract OCR initialized ({})", config.language);
        Ok(Self { api })
    }
}

impl TextRecognizer for TesseractOcr {
    fn recognize(&mut self, plate: &Patch) -> Result<String> {
        let gray = rgb_to_gray(plate);
        let width = plate.width as i32;
        let height = plate.height as i32;

        self.api
            .raw
            .set_image(&gray, width, height, 1, width)
            .context("Failed to hand plate crop to Tesseract")?;

        let text = self
            .api
            .get_utf8_text()
            .context("Tesseract returned undecodable text")?;

        Ok(text)
    }
}
