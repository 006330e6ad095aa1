// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OCR backends. Each one turns a page image into a bounding-box tree.

#[cfg(feature = "ocr")]
pub mod ocrs_engine;

use scanpaper_core::error::Result;

use crate::page::Page;
use crate::text::BboxTree;

#[cfg(feature = "ocr")]
pub use ocrs_engine::{OcrConfig, OcrsEngine};

/// An OCR engine.
pub trait OcrBackend: Send {
    fn name(&self) -> &'static str;

    /// Recognise the text on `page`. The returned tree's root covers the
    /// whole page.
    fn recognise(&self, page: &Page, language: &str) -> Result<BboxTree>;
}
