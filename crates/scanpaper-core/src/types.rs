// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanpaper document engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-unique identity of a page.
///
/// Survives content mutation: a rotated page keeps its `PageId` while a new
/// page row is written for the new content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persistent row id of one page version in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub i64);

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one worker request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unit a page resolution is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionUnit {
    PixelsPerInch,
    PixelsPerCentimetre,
}

impl ResolutionUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PixelsPerInch => "PixelsPerInch",
            Self::PixelsPerCentimetre => "PixelsPerCentimeter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PixelsPerInch" => Some(Self::PixelsPerInch),
            "PixelsPerCentimeter" | "PixelsPerCentimetre" => Some(Self::PixelsPerCentimetre),
            _ => None,
        }
    }
}

/// Default resolution used when an image carries none.
pub const DEFAULT_RESOLUTION: f64 = 72.0;

/// Page resolution as (x, y, unit). Never (0, 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
    pub unit: ResolutionUnit,
}

impl Resolution {
    /// Build a resolution, replacing missing or non-positive components.
    ///
    /// A single valid component is mirrored to the other axis; if neither is
    /// valid the default of 72 ppi is used.
    pub fn new(x: f64, y: f64, unit: ResolutionUnit) -> Self {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        match (valid(x), valid(y)) {
            (true, true) => Self { x, y, unit },
            (true, false) => Self { x, y: x, unit },
            (false, true) => Self { x: y, y, unit },
            (false, false) => Self::default(),
        }
    }

    /// Same resolution with the axes exchanged (after a quarter turn).
    pub fn swapped(self) -> Self {
        Self {
            x: self.y,
            y: self.x,
            unit: self.unit,
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            x: DEFAULT_RESOLUTION,
            y: DEFAULT_RESOLUTION,
            unit: ResolutionUnit::PixelsPerInch,
        }
    }
}

/// Encoding of the image file backing a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageFormat {
    Png,
    Jpeg,
    Tiff,
    /// Portable anymap, as written by unpaper.
    Pnm,
    Bmp,
    /// One bit per pixel, stored as PNG.
    Monochrome,
}

impl PageFormat {
    /// File extension used for temp files of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png | Self::Monochrome => "png",
            Self::Jpeg => "jpg",
            Self::Tiff => "tif",
            Self::Pnm => "pnm",
            Self::Bmp => "bmp",
        }
    }

    /// Infer the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "tif" | "tiff" => Some(Self::Tiff),
            "pnm" | "pbm" | "pgm" | "ppm" => Some(Self::Pnm),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Tiff => "TIFF",
            Self::Pnm => "Portable anymap",
            Self::Bmp => "BMP",
            Self::Monochrome => "monochrome",
        }
    }
}

/// Where a page produced by an operation goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Replace the page with this id, keeping its position.
    Replace(PageId),
    /// Insert directly after the page with this id.
    InsertAfter(PageId),
}

impl Placement {
    /// The page the placement is relative to.
    pub fn anchor(&self) -> PageId {
        match self {
            Self::Replace(id) | Self::InsertAfter(id) => *id,
        }
    }
}

/// Per-channel image statistics cached on a page by `analyse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub mean: Vec<f64>,
    pub std_dev: Vec<f64>,
    pub analysed_at: DateTime<Utc>,
}

/// OCR bookkeeping for a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrState {
    pub performed: bool,
    pub time: Option<DateTime<Utc>>,
}
