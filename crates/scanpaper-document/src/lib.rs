// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanpaper-document: Pages and everything done to a single page.
//
// Provides the `Page` value and its temp image file, image primitives
// (rotate, crop, threshold, filters, statistics), the bounding-box text layer
// with its crop transform and hOCR/djvu exchange formats, adapters for the
// external tesseract, unpaper and user-defined tools, and optional in-process
// OCR.

pub mod image;
pub mod ocr;
pub mod page;
pub mod text;
pub mod tools;

// Re-export the primary types so callers can use `scanpaper_document::Page` etc.
pub use image::ImageProcessor;
pub use ocr::OcrBackend;
pub use page::{ImageFile, Page};
pub use text::{Bbox, BboxKind, BboxTree};
pub use tools::{Direction, Tesseract, Unpaper, UnpaperOptions};

#[cfg(feature = "ocr")]
pub use ocr::OcrsEngine;
