// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process OCR with the pure-Rust `ocrs` engine.
//
// # Model Setup
//
// The engine needs two model files in one directory:
//
// - `text-detection.rten` locates words in the image.
// - `text-recognition.rten` decodes the characters of each line.
//
// Running the `ocrs` command-line tool once downloads them to
// `$XDG_CACHE_HOME/ocrs` (typically `~/.cache/ocrs`), which is the default
// model directory here.

use std::path::{Path, PathBuf};

use ocrs::{ImageSource, OcrEngine as Engine, OcrEngineParams, TextItem};
use rten::Model;
use rten_imageproc::Rect;
use scanpaper_core::error::{Result, ScanpaperError};
use tracing::{debug, info, instrument};

use super::OcrBackend;
use crate::page::Page;
use crate::text::{Bbox, BboxKind, BboxTree};

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// `$XDG_CACHE_HOME/ocrs`, falling back to `~/.cache/ocrs`.
fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Where to find the two model files.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub detection_model_path: PathBuf,
    pub recognition_model_path: PathBuf,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

impl OcrConfig {
    /// Expects `text-detection.rten` and `text-recognition.rten` in `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection_model_path: dir.join(DETECTION_MODEL_FILENAME),
            recognition_model_path: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }

    /// Missing models are a configuration problem the user can fix.
    pub fn validate(&self) -> Result<()> {
        for path in [&self.detection_model_path, &self.recognition_model_path] {
            if !path.exists() {
                return Err(ScanpaperError::Configuration(format!(
                    "OCR model not found at {}; run `ocrs` once to download the models",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// The `ocrs` engine with its models loaded.
///
/// Loading the models is the expensive step, so one engine is kept per
/// worker and reused for every page. `ocrs` ignores the language argument.
pub struct OcrsEngine {
    engine: Engine,
}

impl OcrsEngine {
    #[instrument(skip_all, fields(
        detection = %config.detection_model_path.display(),
        recognition = %config.recognition_model_path.display(),
    ))]
    pub fn new(config: OcrConfig) -> Result<Self> {
        config.validate()?;

        let load = |path: &Path| {
            Model::load_file(path).map_err(|err| {
                ScanpaperError::Configuration(format!(
                    "failed to load OCR model from {}: {err}",
                    path.display()
                ))
            })
        };
        info!("Loading OCR models");
        let engine = Engine::new(OcrEngineParams {
            detection_model: Some(load(&config.detection_model_path)?),
            recognition_model: Some(load(&config.recognition_model_path)?),
            ..Default::default()
        })
        .map_err(|err| ScanpaperError::Configuration(format!("failed to initialise OCR engine: {err}")))?;

        Ok(Self { engine })
    }

    pub fn from_model_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::new(OcrConfig::from_dir(dir))
    }
}

fn to_bbox(kind: BboxKind, rect: Rect, depth: u32, width: u32, height: u32) -> Bbox {
    let clamp = |v: i32, max: u32| (v.max(0) as u32).min(max);
    Bbox::new(
        kind,
        [
            clamp(rect.left(), width),
            clamp(rect.top(), height),
            clamp(rect.right(), width),
            clamp(rect.bottom(), height),
        ],
        depth,
    )
}

impl OcrBackend for OcrsEngine {
    fn name(&self) -> &'static str {
        "ocrs"
    }

    #[instrument(skip_all, fields(id = %page.id, width = page.width, height = page.height))]
    fn recognise(&self, page: &Page, _language: &str) -> Result<BboxTree> {
        let ocr_err = |stage: &str, err: &dyn std::fmt::Display| {
            ScanpaperError::external_tool(format!("OCR {stage} failed"), err.to_string())
        };

        let rgb = page.open_image()?.into_dynamic().to_rgb8();
        let (width, height) = rgb.dimensions();
        let source = ImageSource::from_bytes(rgb.as_raw(), (width, height))
            .map_err(|err| ocr_err("input", &err))?;
        let input = self
            .engine
            .prepare_input(source)
            .map_err(|err| ocr_err("preprocessing", &err))?;

        let word_rects = self
            .engine
            .detect_words(&input)
            .map_err(|err| ocr_err("word detection", &err))?;
        let line_rects = self.engine.find_text_lines(&input, &word_rects);
        let lines = self
            .engine
            .recognize_text(&input, &line_rects)
            .map_err(|err| ocr_err("recognition", &err))?;
        debug!(words = word_rects.len(), lines = line_rects.len(), "Layout found");

        let mut boxes = vec![Bbox::new(BboxKind::Page, [0, 0, width, height], 0)];
        for line in lines.iter().flatten() {
            if line.to_string().trim().is_empty() {
                continue;
            }
            boxes.push(to_bbox(BboxKind::Line, line.bounding_rect(), 1, width, height));
            for word in line.words() {
                let text = word.to_string();
                if text.trim().is_empty() {
                    continue;
                }
                boxes.push(to_bbox(BboxKind::Word, word.bounding_rect(), 2, width, height).with_text(text));
            }
        }

        info!(boxes = boxes.len(), "ocrs finished");
        Ok(BboxTree::from_boxes(boxes))
    }
}
