// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One scanned page: a temp image file plus its geometry, resolution,
// text layer and bookkeeping.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scanpaper_core::error::Result;
use scanpaper_core::types::{
    OcrState, PageAnalysis, PageFormat, PageId, Resolution, ResolutionUnit, RowId,
};
use tempfile::TempPath;
use tracing::{debug, info};

use crate::image::ImageProcessor;
use crate::text::BboxTree;

/// Shared handle to a page's temp image file.
///
/// The file is deleted when the last handle is dropped, whichever path the
/// owning operation leaves by.
#[derive(Debug, Clone)]
pub struct ImageFile(Arc<TempPath>);

impl ImageFile {
    /// Reserve an empty temp file with the extension for `format`.
    pub fn create(dir: &Path, format: PageFormat) -> Result<Self> {
        Self::create_with_suffix(dir, &format!(".{}", format.extension()))
    }

    pub fn create_with_suffix(dir: &Path, suffix: &str) -> Result<Self> {
        let path = tempfile::Builder::new()
            .prefix("page-")
            .suffix(suffix)
            .tempfile_in(dir)?
            .into_temp_path();
        Ok(Self(Arc::new(path)))
    }

    /// Write encoded image bytes to a new temp file.
    pub fn write(dir: &Path, bytes: &[u8], format: PageFormat) -> Result<Self> {
        let file = Self::create(dir, format)?;
        std::fs::write(file.path(), bytes)?;
        Ok(file)
    }

    /// Encode `image` as `format` into a new temp file.
    pub fn save(dir: &Path, image: &ImageProcessor, format: PageFormat) -> Result<Self> {
        let file = Self::create(dir, format)?;
        image.save(file.path(), format)?;
        Ok(file)
    }

    /// Encode `image` as a one-bit PBM in a new temp file.
    pub fn save_bitmap(dir: &Path, image: &ImageProcessor) -> Result<Self> {
        let file = Self::create_with_suffix(dir, ".pbm")?;
        image.save_bitmap(file.path())?;
        Ok(file)
    }

    /// Copy an existing file into a new temp file.
    pub fn copy_from(dir: &Path, source: &Path, format: PageFormat) -> Result<Self> {
        let file = Self::create(dir, format)?;
        std::fs::copy(source, file.path())?;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.path())?)
    }

    /// Size of the file on disk in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(std::fs::metadata(self.path())?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A scanned page.
///
/// Pages are values: an operation never edits a page in place, it derives a
/// new page (same [`PageId`], no row id yet) that replaces the old one.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    /// Row of this version in the page store, once written.
    pub row_id: Option<RowId>,
    image: ImageFile,
    pub width: u32,
    pub height: u32,
    pub resolution: Resolution,
    pub format: PageFormat,
    pub text_layer: Option<BboxTree>,
    pub annotations: Option<BboxTree>,
    /// Time of the last content mutation.
    pub dirty_time: Option<DateTime<Utc>>,
    pub saved: bool,
    pub analysis: Option<PageAnalysis>,
    pub ocr: OcrState,
}

impl Page {
    /// Build a page around an image file, reading its dimensions.
    pub fn from_file(image: ImageFile, format: PageFormat, resolution: Resolution) -> Result<Self> {
        let processor = ImageProcessor::open(image.path())?;
        Ok(Self::from_parts(
            image,
            processor.width(),
            processor.height(),
            format,
            resolution,
        ))
    }

    /// Wrap an image file whose dimensions are already known.
    pub fn from_parts(
        image: ImageFile,
        width: u32,
        height: u32,
        format: PageFormat,
        resolution: Resolution,
    ) -> Self {
        let page = Self {
            id: PageId::new(),
            row_id: None,
            image,
            width,
            height,
            resolution,
            format,
            text_layer: None,
            annotations: None,
            dirty_time: None,
            saved: false,
            analysis: None,
            ocr: OcrState::default(),
        };
        info!(
            id = %page.id,
            width,
            height,
            format = format.as_str(),
            "New page"
        );
        page
    }

    /// Import an image file from outside the session.
    ///
    /// Files in a format the store keeps as-is are copied byte for byte;
    /// anything else is re-encoded as PNG.
    pub fn import(path: &Path, temp_dir: &Path, default_resolution: f64) -> Result<Self> {
        let known = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(PageFormat::from_extension);
        let image = match known {
            Some(format) => ImageFile::copy_from(temp_dir, path, format)?,
            None => ImageFile::save(temp_dir, &ImageProcessor::open(path)?, PageFormat::Png)?,
        };
        let resolution = Resolution::new(
            default_resolution,
            default_resolution,
            ResolutionUnit::PixelsPerInch,
        );
        Self::from_file(image, known.unwrap_or(PageFormat::Png), resolution)
    }

    /// Encode an in-memory image as a new page.
    pub fn from_image(
        image: &ImageProcessor,
        format: PageFormat,
        resolution: Resolution,
        temp_dir: &Path,
    ) -> Result<Self> {
        let file = ImageFile::save(temp_dir, image, format)?;
        Ok(Self::from_parts(
            file,
            image.width(),
            image.height(),
            format,
            resolution,
        ))
    }

    /// Materialise stored image bytes into a temp file.
    pub fn from_bytes(
        bytes: &[u8],
        format: PageFormat,
        resolution: Resolution,
        temp_dir: &Path,
    ) -> Result<Self> {
        Self::from_file(ImageFile::write(temp_dir, bytes, format)?, format, resolution)
    }

    /// A new version of this page carrying `image` in place of the old one.
    ///
    /// Identity, resolution and layers are kept; the new version is dirty,
    /// unsaved and has no cached analysis.
    pub fn derive(&self, image: &ImageProcessor, format: PageFormat, temp_dir: &Path) -> Result<Self> {
        let file = ImageFile::save(temp_dir, image, format)?;
        let mut page = self.with_image_file(file, format);
        page.width = image.width();
        page.height = image.height();
        page.mark_dirty();
        Ok(page)
    }

    /// Same as [`Page::derive`] for an image a tool already wrote to disk.
    /// Dimensions are re-read from the file.
    pub fn derive_from_file(&self, file: ImageFile, format: PageFormat) -> Result<Self> {
        let processor = ImageProcessor::open(file.path())?;
        let mut page = self.with_image_file(file, format);
        page.width = processor.width();
        page.height = processor.height();
        page.mark_dirty();
        Ok(page)
    }

    /// A copy that will be stored as a new row. The image file is shared.
    pub fn new_version(&self) -> Self {
        Self {
            row_id: None,
            ..self.clone()
        }
    }

    fn with_image_file(&self, image: ImageFile, format: PageFormat) -> Self {
        Self {
            row_id: None,
            image,
            format,
            analysis: None,
            ..self.clone()
        }
    }

    pub fn image_file(&self) -> &ImageFile {
        &self.image
    }

    pub fn image_path(&self) -> &Path {
        self.image.path()
    }

    pub fn image_bytes(&self) -> Result<Vec<u8>> {
        self.image.read()
    }

    pub fn open_image(&self) -> Result<ImageProcessor> {
        ImageProcessor::open(self.image.path())
    }

    /// Record a content change.
    pub fn mark_dirty(&mut self) {
        self.dirty_time = Some(Utc::now());
        self.saved = false;
    }

    /// Whether the temp image still exists on disk.
    pub fn exists(&self) -> bool {
        self.image.path().exists()
    }

    /// PNG thumbnail whose longest side is at most `max` pixels.
    pub fn thumbnail(&self, max: u32) -> Result<Vec<u8>> {
        let thumb = self.open_image()?.thumbnail(max);
        debug!(id = %self.id, width = thumb.width(), height = thumb.height(), "Thumbnail");
        thumb.to_png_bytes()
    }

    /// Whether the text layer root matches the page size.
    pub fn text_layer_matches_size(&self) -> bool {
        self.text_layer
            .as_ref()
            .and_then(BboxTree::root)
            .is_none_or(|root| root.bbox == [0, 0, self.width, self.height])
    }

    // -- Text layer import/export ----------------------------------------------

    pub fn import_hocr(&mut self, hocr: &str) -> Result<()> {
        self.text_layer = Some(BboxTree::from_hocr(hocr)?);
        Ok(())
    }

    pub fn export_hocr(&self) -> Option<String> {
        self.text_layer.as_ref().map(BboxTree::to_hocr)
    }

    pub fn import_text(&mut self, text: &str) {
        self.text_layer = Some(BboxTree::from_text(text, self.width, self.height));
    }

    pub fn export_text(&self) -> String {
        self.text_layer
            .as_ref()
            .map(BboxTree::to_text)
            .unwrap_or_default()
    }

    pub fn import_djvu_txt(&mut self, djvu: &str) -> Result<()> {
        self.text_layer = Some(BboxTree::from_djvu_txt(djvu)?);
        Ok(())
    }

    pub fn export_djvu_txt(&self) -> Option<String> {
        self.text_layer.as_ref().map(BboxTree::to_djvu_txt)
    }

    pub fn import_annotations(&mut self, hocr: &str) -> Result<()> {
        self.annotations = Some(BboxTree::from_hocr(hocr)?);
        Ok(())
    }

    pub fn import_djvu_ann(&mut self, ann: &str) -> Result<()> {
        self.annotations = Some(BboxTree::from_djvu_ann(ann, self.width, self.height)?);
        Ok(())
    }

    pub fn export_djvu_ann(&self) -> Option<String> {
        self.annotations.as_ref().map(BboxTree::to_djvu_ann)
    }
}
