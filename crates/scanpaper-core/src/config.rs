// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which OCR engine `tesseract_ocr` requests are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OcrBackendKind {
    /// The `tesseract` command-line tool.
    Tesseract,
    /// The in-process `ocrs` engine (requires the `ocr` feature).
    Ocrs,
}

/// Persistent engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory for page temp files. `None` uses the system temp dir.
    pub temp_dir: Option<PathBuf>,
    /// Number of undo steps kept in the page ordering history.
    pub undo_steps: u32,
    /// Longest side of stored thumbnails, in pixels.
    pub thumbnail_size: u32,
    /// Resolution assumed for images that carry none.
    pub default_resolution: f64,
    /// Program used for OCR via the command line.
    pub tesseract_command: String,
    /// Program used for despeckle/deskew.
    pub unpaper_command: String,
    pub ocr_backend: OcrBackendKind,
    /// Directory holding the `ocrs` detection and recognition models.
    pub ocrs_model_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Temp dir to use, falling back to the platform default.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            undo_steps: 10,
            thumbnail_size: 100,
            default_resolution: crate::types::DEFAULT_RESOLUTION,
            tesseract_command: "tesseract".into(),
            unpaper_command: "unpaper".into(),
            ocr_backend: OcrBackendKind::Tesseract,
            ocrs_model_dir: None,
        }
    }
}
