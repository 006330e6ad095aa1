// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page operations. Each handler takes a page, runs an image primitive or an
// external tool, and returns the new page versions as deltas tagged with
// where they go. Handlers never touch the store; the worker applies their
// deltas inside one snapshot.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use scanpaper_core::cancel::CancelToken;
use scanpaper_core::config::{EngineConfig, OcrBackendKind};
use scanpaper_core::error::{Result, ScanpaperError};
use scanpaper_core::types::{OcrState, PageAnalysis, PageFormat, PageId, Placement};
use scanpaper_document::tools::user_defined::run_user_defined;
use scanpaper_document::{OcrBackend, Page, Tesseract, Unpaper, UnpaperOptions};

/// Which way `split` cuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitDirection {
    /// A vertical line at `position` pixels from the left.
    #[serde(rename = "v")]
    Vertical,
    /// A horizontal line at `position` pixels from the top.
    #[serde(rename = "h")]
    Horizontal,
}

/// A mutating operation on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PageOperation {
    Rotate { angle: f32 },
    Crop { x: u32, y: u32, width: u32, height: u32 },
    Split { direction: SplitDirection, position: u32 },
    Threshold { value: u8 },
    BrightnessContrast { brightness: f32, contrast: f32 },
    Negate,
    Unsharp { radius: f32, percent: u32, threshold: u8 },
    TesseractOcr { language: String },
    Unpaper { options: UnpaperOptions },
    UserDefined { command: String },
}

/// One new page version and where it belongs.
#[derive(Debug, Clone)]
pub struct Delta {
    pub page: Page,
    pub placement: Placement,
}

impl Delta {
    pub fn replace(page: Page) -> Self {
        Self {
            placement: Placement::Replace(page.id),
            page,
        }
    }

    pub fn insert_after(anchor: PageId, page: Page) -> Self {
        Self {
            placement: Placement::InsertAfter(anchor),
            page,
        }
    }
}

/// What a handler produced: deltas in application order (every `Replace`
/// before any `InsertAfter`) plus tool messages for the caller.
#[derive(Debug, Default)]
pub struct OperationOutput {
    pub deltas: Vec<Delta>,
    pub messages: Vec<String>,
}

impl OperationOutput {
    fn replace(page: Page) -> Self {
        Self {
            deltas: vec![Delta::replace(page)],
            messages: Vec::new(),
        }
    }
}

/// External programs and OCR engines, owned by the worker.
pub struct Tools {
    unpaper: Unpaper,
    tesseract_command: String,
    ocr_kind: OcrBackendKind,
    ocrs_model_dir: Option<PathBuf>,
    /// Built on first use, so a worker that never runs OCR never loads models.
    ocr: Option<Box<dyn OcrBackend>>,
}

impl Tools {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            unpaper: Unpaper::new(config.unpaper_command.clone()),
            tesseract_command: config.tesseract_command.clone(),
            ocr_kind: config.ocr_backend,
            ocrs_model_dir: config.ocrs_model_dir.clone(),
            ocr: None,
        }
    }

    /// Use `backend` for OCR instead of the configured one.
    pub fn with_ocr_backend(mut self, backend: Box<dyn OcrBackend>) -> Self {
        self.ocr = Some(backend);
        self
    }

    fn ocr(&mut self) -> Result<&dyn OcrBackend> {
        if self.ocr.is_none() {
            let backend: Box<dyn OcrBackend> = match self.ocr_kind {
                OcrBackendKind::Tesseract => Box::new(Tesseract::new(self.tesseract_command.clone())),
                OcrBackendKind::Ocrs => build_ocrs(self.ocrs_model_dir.as_deref())?,
            };
            info!(backend = backend.name(), "OCR backend ready");
            self.ocr = Some(backend);
        }
        self.ocr
            .as_deref()
            .ok_or_else(|| ScanpaperError::Configuration("no OCR backend".into()))
    }
}

#[cfg(feature = "ocr")]
fn build_ocrs(model_dir: Option<&Path>) -> Result<Box<dyn OcrBackend>> {
    use scanpaper_document::ocr::{OcrConfig, OcrsEngine};
    let config = model_dir.map(OcrConfig::from_dir).unwrap_or_default();
    Ok(Box::new(OcrsEngine::new(config)?))
}

#[cfg(not(feature = "ocr"))]
fn build_ocrs(_model_dir: Option<&Path>) -> Result<Box<dyn OcrBackend>> {
    Err(ScanpaperError::Configuration(
        "the ocrs backend needs scanpaper built with the `ocr` feature".into(),
    ))
}

/// Everything a handler may use besides the page itself.
pub struct OperationContext<'a> {
    pub temp_dir: &'a Path,
    pub cancel: &'a CancelToken,
    pub tools: &'a mut Tools,
}

impl PageOperation {
    /// Short verb used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rotate { .. } => "rotate",
            Self::Crop { .. } => "crop",
            Self::Split { .. } => "split",
            Self::Threshold { .. } => "threshold",
            Self::BrightnessContrast { .. } => "adjust brightness/contrast",
            Self::Negate => "negate",
            Self::Unsharp { .. } => "sharpen",
            Self::TesseractOcr { .. } => "run OCR",
            Self::Unpaper { .. } => "run unpaper",
            Self::UserDefined { .. } => "run user-defined tool",
        }
    }

    #[instrument(skip_all, fields(op = self.name(), id = %page.id))]
    pub fn apply(&self, page: &Page, ctx: &mut OperationContext<'_>) -> Result<OperationOutput> {
        ctx.cancel.checkpoint()?;
        let output = match self {
            Self::Rotate { angle } => rotate(page, *angle, ctx)?,
            Self::Crop { x, y, width, height } => crop(page, *x, *y, *width, *height, ctx)?,
            Self::Split { direction, position } => split(page, *direction, *position, ctx)?,
            Self::Threshold { value } => {
                let image = page.open_image()?.threshold(*value);
                ctx.cancel.checkpoint()?;
                OperationOutput::replace(page.derive(&image, PageFormat::Monochrome, ctx.temp_dir)?)
            }
            Self::BrightnessContrast { brightness, contrast } => {
                let image = page.open_image()?.brightness_contrast(*brightness, *contrast);
                filtered(page, image, ctx)?
            }
            Self::Negate => filtered(page, page.open_image()?.negate(), ctx)?,
            Self::Unsharp { radius, percent, threshold } => {
                let image = page.open_image()?.unsharp(*radius, *percent, *threshold);
                filtered(page, image, ctx)?
            }
            Self::TesseractOcr { language } => ocr(page, language, ctx)?,
            Self::Unpaper { options } => unpaper(page, options, ctx)?,
            Self::UserDefined { command } => {
                let out = run_user_defined(command, page, ctx.temp_dir, ctx.cancel)?;
                let mut new = out.page;
                fit_layers(&mut new);
                OperationOutput {
                    deltas: vec![Delta::replace(new)],
                    messages: out.message.into_iter().collect(),
                }
            }
        };
        ctx.cancel.checkpoint()?;
        Ok(output)
    }
}

fn filtered(
    page: &Page,
    image: scanpaper_document::ImageProcessor,
    ctx: &OperationContext<'_>,
) -> Result<OperationOutput> {
    ctx.cancel.checkpoint()?;
    Ok(OperationOutput::replace(page.derive(&image, page.format, ctx.temp_dir)?))
}

/// `Some(k)` when `angle` is `k` clockwise quarter turns.
fn quarter_turns(angle: f32) -> Option<u32> {
    let normalised = angle.rem_euclid(360.0);
    (0..=4u32)
        .find(|&k| (normalised - 90.0 * k as f32).abs() < 0.01)
        .map(|k| k % 4)
}

fn rotate(page: &Page, angle: f32, ctx: &OperationContext<'_>) -> Result<OperationOutput> {
    let image = page.open_image()?.rotate(angle);
    ctx.cancel.checkpoint()?;
    let mut new = page.derive(&image, page.format, ctx.temp_dir)?;

    match quarter_turns(angle) {
        Some(turns) => {
            if turns % 2 == 1 {
                new.resolution = page.resolution.swapped();
            }
            let turn = |tree: &scanpaper_document::BboxTree| {
                tree.rotate_quarter(turns, page.width, page.height)
            };
            new.text_layer = page.text_layer.as_ref().map(turn);
            new.annotations = page.annotations.as_ref().map(turn);
        }
        None => {
            if new.text_layer.is_some() || new.annotations.is_some() {
                warn!(angle, "text layer cannot follow a free rotation, dropping it");
            }
            new.text_layer = None;
            new.annotations = None;
        }
    }
    Ok(OperationOutput::replace(new))
}

fn crop(
    page: &Page,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    ctx: &OperationContext<'_>,
) -> Result<OperationOutput> {
    let image = page.open_image()?.crop(x, y, width, height)?;
    ctx.cancel.checkpoint()?;
    let mut new = page.derive(&image, page.format, ctx.temp_dir)?;
    new.text_layer = page.text_layer.as_ref().map(|t| t.crop(x, y, width, height));
    new.annotations = page.annotations.as_ref().map(|t| t.crop(x, y, width, height));
    Ok(OperationOutput::replace(new))
}

fn split(
    page: &Page,
    direction: SplitDirection,
    position: u32,
    ctx: &OperationContext<'_>,
) -> Result<OperationOutput> {
    let (w, h) = (page.width, page.height);
    let limit = match direction {
        SplitDirection::Vertical => w,
        SplitDirection::Horizontal => h,
    };
    if position == 0 || position >= limit {
        return Err(ScanpaperError::InvalidArgument(format!(
            "split position {position} is outside the {w}x{h} page"
        )));
    }
    let (first, second) = match direction {
        SplitDirection::Vertical => ((0, 0, position, h), (position, 0, w - position, h)),
        SplitDirection::Horizontal => ((0, 0, w, position), (0, position, w, h - position)),
    };
    info!(?direction, position, "splitting page");

    let image = page.open_image()?;
    let left = image.clone().crop(first.0, first.1, first.2, first.3)?;
    let right = image.crop(second.0, second.1, second.2, second.3)?;
    ctx.cancel.checkpoint()?;

    let mut part1 = page.derive(&left, page.format, ctx.temp_dir)?;
    let mut part2 = Page::from_image(&right, page.format, page.resolution, ctx.temp_dir)?;
    part2.mark_dirty();

    let crop_to = |(x, y, cw, ch): (u32, u32, u32, u32)| {
        move |t: &scanpaper_document::BboxTree| t.crop(x, y, cw, ch)
    };
    part1.text_layer = page.text_layer.as_ref().map(crop_to(first));
    part1.annotations = page.annotations.as_ref().map(crop_to(first));
    part2.text_layer = page.text_layer.as_ref().map(crop_to(second));
    part2.annotations = page.annotations.as_ref().map(crop_to(second));

    Ok(OperationOutput {
        deltas: vec![Delta::replace(part1), Delta::insert_after(page.id, part2)],
        messages: Vec::new(),
    })
}

fn ocr(page: &Page, language: &str, ctx: &mut OperationContext<'_>) -> Result<OperationOutput> {
    let backend = ctx.tools.ocr()?;
    let tree = backend.recognise(page, language)?;
    ctx.cancel.checkpoint()?;
    debug!(backend = backend.name(), boxes = tree.len(), "recognised");

    let mut new = page.new_version();
    new.text_layer = Some(tree);
    new.ocr = OcrState {
        performed: true,
        time: Some(Utc::now()),
    };
    new.mark_dirty();
    Ok(OperationOutput::replace(new))
}

fn unpaper(
    page: &Page,
    options: &UnpaperOptions,
    ctx: &mut OperationContext<'_>,
) -> Result<OperationOutput> {
    let out = ctx.tools.unpaper.run(page, options, ctx.temp_dir, ctx.cancel)?;
    let mut files = out.pages.into_iter();
    let primary = files
        .next()
        .ok_or_else(|| ScanpaperError::external_tool("unpaper produced no output", ""))?;

    // Deskewing moves content without changing the page size, so no box
    // position survives.
    let mut first = page.derive_from_file(primary, PageFormat::Pnm)?;
    first.text_layer = None;
    first.annotations = None;
    let mut deltas = vec![Delta::replace(first)];
    if let Some(file) = files.next() {
        let mut second = Page::from_file(file, PageFormat::Pnm, page.resolution)?;
        second.mark_dirty();
        deltas.push(Delta::insert_after(page.id, second));
    }
    Ok(OperationOutput {
        deltas,
        messages: out.messages,
    })
}

/// Drop layers whose root no longer matches the page after a tool changed
/// its size.
fn fit_layers(page: &mut Page) {
    let size = [0, 0, page.width, page.height];
    let fits = |tree: &Option<scanpaper_document::BboxTree>| {
        tree.as_ref()
            .and_then(|t| t.root())
            .is_none_or(|root| root.bbox == size)
    };
    if !fits(&page.text_layer) || !fits(&page.annotations) {
        debug!(id = %page.id, "page size changed, dropping stale layers");
        if !fits(&page.text_layer) {
            page.text_layer = None;
        }
        if !fits(&page.annotations) {
            page.annotations = None;
        }
    }
}

/// Per-channel statistics for the analysis cache.
pub fn analyse(page: &Page) -> Result<PageAnalysis> {
    let (mean, std_dev) = page.open_image()?.channel_stats();
    info!(id = %page.id, ?mean, ?std_dev, "analysed");
    Ok(PageAnalysis {
        mean,
        std_dev,
        analysed_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma};
    use scanpaper_core::types::{Resolution, ResolutionUnit};
    use scanpaper_document::{Bbox, BboxKind, BboxTree, ImageProcessor};

    fn page(dir: &Path, w: u32, h: u32) -> Page {
        let img = ImageProcessor::from_dynamic(DynamicImage::ImageLuma8(GrayImage::from_fn(
            w,
            h,
            |x, _| Luma([(x * 7 % 256) as u8]),
        )));
        let mut page = Page::from_image(
            &img,
            PageFormat::Png,
            Resolution::new(300.0, 150.0, ResolutionUnit::PixelsPerInch),
            dir,
        )
        .expect("page");
        page.text_layer = Some(BboxTree::from_boxes(vec![
            Bbox::new(BboxKind::Page, [0, 0, w, h], 0),
            Bbox::new(BboxKind::Word, [2, 2, 8, 6], 1).with_text("left"),
            Bbox::new(BboxKind::Word, [w - 8, 2, w - 2, 6], 1).with_text("right"),
        ]));
        page
    }

    fn run(op: PageOperation, page: &Page, dir: &Path) -> Result<OperationOutput> {
        let mut tools = Tools::from_config(&EngineConfig::default());
        op.apply(
            page,
            &mut OperationContext {
                temp_dir: dir,
                cancel: &CancelToken::new(),
                tools: &mut tools,
            },
        )
    }

    fn words(page: &Page) -> Vec<(String, [u32; 4])> {
        page.text_layer
            .iter()
            .flat_map(BboxTree::iter)
            .filter(|b| b.kind == BboxKind::Word)
            .map(|b| (b.text.clone().unwrap_or_default(), b.bbox))
            .collect()
    }

    struct FixedOcr;

    impl OcrBackend for FixedOcr {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn recognise(&self, page: &Page, language: &str) -> Result<BboxTree> {
            Ok(BboxTree::from_text(language, page.width, page.height))
        }
    }

    #[test]
    fn quarter_turn_detection() {
        assert_eq!(quarter_turns(90.0), Some(1));
        assert_eq!(quarter_turns(-90.0), Some(3));
        assert_eq!(quarter_turns(360.0), Some(0));
        assert_eq!(quarter_turns(45.0), None);
    }

    #[test]
    fn rotate_quarter_swaps_geometry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = page(dir.path(), 40, 20);
        let out = run(PageOperation::Rotate { angle: 90.0 }, &source, dir.path()).expect("rotate");
        let new = &out.deltas[0].page;
        assert_eq!((new.width, new.height), (20, 40));
        assert_eq!((new.resolution.x, new.resolution.y), (150.0, 300.0));
        assert_eq!(new.id, source.id);
        assert!(new.text_layer_matches_size());
        assert!(!new.saved);
        assert_eq!(out.deltas[0].placement, Placement::Replace(source.id));
    }

    #[test]
    fn free_rotation_drops_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = run(PageOperation::Rotate { angle: 30.0 }, &page(dir.path(), 40, 20), dir.path())
            .expect("rotate");
        assert!(out.deltas[0].page.text_layer.is_none());
        assert!(out.deltas[0].page.width > 40);
    }

    #[test]
    fn crop_outside_page_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let op = PageOperation::Crop { x: 30, y: 0, width: 20, height: 10 };
        let err = run(op, &page(dir.path(), 40, 20), dir.path()).expect_err("out of bounds");
        assert!(matches!(err, ScanpaperError::InvalidArgument(_)));
    }

    #[test]
    fn crop_moves_text_layer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let op = PageOperation::Crop { x: 4, y: 0, width: 20, height: 20 };
        let out = run(op, &page(dir.path(), 40, 20), dir.path()).expect("crop");
        let new = &out.deltas[0].page;
        assert_eq!((new.width, new.height), (20, 20));
        assert_eq!(words(new), [("left".to_string(), [0, 2, 4, 6])]);
    }

    #[test]
    fn split_vertical_halves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = page(dir.path(), 40, 20);
        let op = PageOperation::Split { direction: SplitDirection::Vertical, position: 15 };
        let out = run(op, &source, dir.path()).expect("split");
        let [first, second] = &out.deltas[..] else {
            panic!("expected two deltas");
        };
        assert_eq!(first.placement, Placement::Replace(source.id));
        assert_eq!(second.placement, Placement::InsertAfter(source.id));
        assert_ne!(second.page.id, source.id);
        assert_eq!(first.page.width + second.page.width, 40);
        assert_eq!((first.page.height, second.page.height), (20, 20));
        assert_eq!(first.page.resolution, source.resolution);
        assert_eq!(second.page.resolution, source.resolution);
        assert_eq!(words(&first.page), [("left".to_string(), [2, 2, 8, 6])]);
        assert_eq!(words(&second.page), [("right".to_string(), [17, 2, 23, 6])]);
    }

    #[test]
    fn split_horizontal_heights_add_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let op = PageOperation::Split { direction: SplitDirection::Horizontal, position: 5 };
        let out = run(op, &page(dir.path(), 40, 20), dir.path()).expect("split");
        assert_eq!(out.deltas[0].page.height + out.deltas[1].page.height, 20);
        assert_eq!(out.deltas[1].page.width, 40);
    }

    #[test]
    fn split_at_edge_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let op = PageOperation::Split { direction: SplitDirection::Vertical, position: 40 };
        assert!(run(op, &page(dir.path(), 40, 20), dir.path()).is_err());
    }

    #[test]
    fn threshold_is_monochrome() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = run(PageOperation::Threshold { value: 128 }, &page(dir.path(), 40, 20), dir.path())
            .expect("threshold");
        let new = &out.deltas[0].page;
        assert_eq!(new.format, PageFormat::Monochrome);
        let luma = new.open_image().expect("open").into_dynamic().to_luma8();
        assert!(luma.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn filters_keep_geometry_and_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = page(dir.path(), 40, 20);
        for op in [
            PageOperation::Negate,
            PageOperation::BrightnessContrast { brightness: 0.1, contrast: 1.2 },
            PageOperation::Unsharp { radius: 1.0, percent: 50, threshold: 2 },
        ] {
            let out = run(op, &source, dir.path()).expect("filter");
            let new = &out.deltas[0].page;
            assert_eq!((new.width, new.height), (40, 20));
            assert_eq!(new.resolution, source.resolution);
            assert_eq!(new.text_layer, source.text_layer);
            assert!(new.dirty_time.is_some());
            assert_eq!(new.row_id, None);
        }
    }

    #[test]
    fn ocr_stamps_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = page(dir.path(), 40, 20);
        let mut tools = Tools::from_config(&EngineConfig::default()).with_ocr_backend(Box::new(FixedOcr));
        let out = PageOperation::TesseractOcr { language: "eng".into() }
            .apply(
                &source,
                &mut OperationContext {
                    temp_dir: dir.path(),
                    cancel: &CancelToken::new(),
                    tools: &mut tools,
                },
            )
            .expect("ocr");
        let new = &out.deltas[0].page;
        assert!(new.ocr.performed && new.ocr.time.is_some());
        assert_eq!(new.export_text(), "eng");
        assert_eq!(new.image_path(), source.image_path());
    }

    #[test]
    fn missing_ocrs_feature_is_configuration_error() {
        if cfg!(feature = "ocr") {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let mut tools = Tools::from_config(&EngineConfig {
            ocr_backend: OcrBackendKind::Ocrs,
            ..EngineConfig::default()
        });
        let err = PageOperation::TesseractOcr { language: "eng".into() }
            .apply(
                &page(dir.path(), 10, 10),
                &mut OperationContext {
                    temp_dir: dir.path(),
                    cancel: &CancelToken::new(),
                    tools: &mut tools,
                },
            )
            .expect_err("no ocrs");
        assert!(matches!(err, ScanpaperError::Configuration(_)));
    }

    #[test]
    fn cancelled_before_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut tools = Tools::from_config(&EngineConfig::default());
        let err = PageOperation::Negate
            .apply(
                &page(dir.path(), 10, 10),
                &mut OperationContext {
                    temp_dir: dir.path(),
                    cancel: &cancel,
                    tools: &mut tools,
                },
            )
            .expect_err("cancelled");
        assert!(err.is_cancelled());
    }

    #[test]
    fn analysis_of_flat_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let img = ImageProcessor::from_dynamic(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            8,
            8,
            Luma([200]),
        )));
        let flat = Page::from_image(&img, PageFormat::Png, Resolution::default(), dir.path())
            .expect("page");
        let stats = analyse(&flat).expect("analyse");
        assert_eq!(stats.mean, [200.0]);
        assert_eq!(stats.std_dev, [0.0]);
    }

    #[cfg(unix)]
    #[test]
    fn duplex_unpaper_inserts_second_page() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let tool = dir.path().join("unpaper");
        std::fs::write(
            &tool,
            "#!/bin/sh\nwhile [ \"$1\" != \"--overwrite\" ]; do shift; done\nshift\ninput=\"$1\"; shift\nfor out in \"$@\"; do cp \"$input\" \"$out\"; done\necho 'deskew skipped' >&2\n",
        )
        .expect("script");
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let source = page(dir.path(), 40, 20);
        let mut tools = Tools::from_config(&EngineConfig {
            unpaper_command: tool.display().to_string(),
            ..EngineConfig::default()
        });
        let options = UnpaperOptions {
            output_pages: 2,
            ..UnpaperOptions::default()
        };
        let out = PageOperation::Unpaper { options }
            .apply(
                &source,
                &mut OperationContext {
                    temp_dir: dir.path(),
                    cancel: &CancelToken::new(),
                    tools: &mut tools,
                },
            )
            .expect("unpaper");
        assert_eq!(out.deltas.len(), 2);
        assert_eq!(out.deltas[0].placement, Placement::Replace(source.id));
        assert_eq!(out.deltas[1].placement, Placement::InsertAfter(source.id));
        assert_eq!(out.deltas[0].page.format, PageFormat::Pnm);
        assert!(source.text_layer.is_some());
        assert!(out.deltas[0].page.text_layer.is_none());
        assert!(out.deltas[0].page.annotations.is_none());
        assert_eq!(out.messages, ["deskew skipped\n"]);
    }
}
