// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// User-defined page tools: a shell command template with %i, %o and %r
// placeholders.
//
// With `%o` in the template the command reads `%i` (the page image) and
// writes `%o` (a fresh temp file). Without it the page is first copied to a
// temp file and `%i` names that copy, which the command edits in place.

use std::path::Path;

use scanpaper_core::cancel::CancelToken;
use scanpaper_core::error::Result;
use scanpaper_core::types::PageFormat;
use tracing::{info, instrument};

use crate::image::ImageProcessor;
use crate::page::{ImageFile, Page};

/// Result of a user-defined command.
#[derive(Debug)]
pub struct UserDefinedOutput {
    /// New version of the page, same id and text layer.
    pub page: Page,
    /// Whatever the command printed on stderr, if anything.
    pub message: Option<String>,
}

/// Substitute the placeholders in `template`.
pub fn expand_template(template: &str, input: &Path, output: &Path, resolution: f64) -> String {
    let (input, output) = (input.display().to_string(), output.display().to_string());
    let command = if template.contains("%o") {
        template.replace("%o", &output).replace("%i", &input)
    } else {
        template.replace("%i", &output)
    };
    command.replace("%r", &resolution.to_string())
}

#[instrument(skip_all, fields(id = %page.id, template = %template))]
pub fn run_user_defined(
    template: &str,
    page: &Page,
    temp_dir: &Path,
    cancel: &CancelToken,
) -> Result<UserDefinedOutput> {
    let suffix = page
        .image_path()
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let out = ImageFile::create_with_suffix(temp_dir, &suffix)?;
    if !template.contains("%o") {
        std::fs::copy(page.image_path(), out.path())?;
    }

    let command = expand_template(template, page.image_path(), out.path(), page.resolution.x);
    let output = super::run_shell(&command)?.check("user-defined command")?;
    cancel.checkpoint()?;

    info!(stdout = %output.stdout.trim_end(), stderr = %output.stderr.trim_end(), "Command finished");
    let message = (!output.stderr.is_empty()).then_some(output.stderr);

    // The command may have changed the encoding along with the pixels.
    let new_page = match ImageProcessor::detect_format(out.path())? {
        Some(format) => page.derive_from_file(out, format)?,
        None => page.derive(&ImageProcessor::open(out.path())?, PageFormat::Png, temp_dir)?,
    };
    Ok(UserDefinedOutput {
        page: new_page,
        message,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::text::BboxTree;
    use image::{DynamicImage, GrayImage, Luma};
    use scanpaper_core::error::ScanpaperError;
    use scanpaper_core::types::{Resolution, ResolutionUnit};

    fn page(dir: &Path) -> Page {
        let img = ImageProcessor::from_dynamic(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            40,
            30,
            Luma([255]),
        )));
        let mut page = Page::from_image(
            &img,
            PageFormat::Png,
            Resolution::new(300.0, 300.0, ResolutionUnit::PixelsPerInch),
            dir,
        )
        .expect("page");
        page.text_layer = Some(BboxTree::from_text("hello", 40, 30));
        page
    }

    #[test]
    fn template_expansion() {
        let (i, o) = (Path::new("/t/in.png"), Path::new("/t/out.png"));
        assert_eq!(
            expand_template("convert %i -resize 50% %o # %r", i, o, 300.0),
            "convert /t/in.png -resize 50% /t/out.png # 300"
        );
        assert_eq!(expand_template("mogrify %i", i, o, 72.0), "mogrify /t/out.png");
    }

    #[test]
    fn copy_mode_keeps_identity_and_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = page(dir.path());
        let out = run_user_defined("echo 'theme warning' >&2; test -s %i", &source, dir.path(), &CancelToken::new())
            .expect("run");
        assert_eq!(out.page.id, source.id);
        assert_eq!(out.page.text_layer, source.text_layer);
        assert_eq!(out.page.resolution, source.resolution);
        assert_eq!((out.page.width, out.page.height), (40, 30));
        assert!(!out.page.saved);
        assert_eq!(out.message.as_deref(), Some("theme warning\n"));
        assert_ne!(out.page.image_path(), source.image_path());
    }

    #[test]
    fn output_mode_reads_new_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = page(dir.path());
        let small = dir.path().join("small.pnm");
        std::fs::write(&small, b"P5\n2 3\n255\n\0\0\0\0\0\0").expect("write");
        let template = format!("cp {} %o", small.display());
        let out = run_user_defined(&template, &source, dir.path(), &CancelToken::new()).expect("run");
        assert_eq!((out.page.width, out.page.height), (2, 3));
        assert_eq!(out.page.format, PageFormat::Pnm);
        assert!(out.message.is_none());
    }

    #[test]
    fn failing_command_reports_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = run_user_defined("echo nope >&2; exit 1", &page(dir.path()), dir.path(), &CancelToken::new())
            .expect_err("fails");
        match err {
            ScanpaperError::ExternalTool { diagnostics, .. } => assert_eq!(diagnostics, "nope\n"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
