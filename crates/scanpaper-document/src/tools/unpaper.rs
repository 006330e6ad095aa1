// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// unpaper: despeckle, deskew and duplex split of scanned sheets.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use scanpaper_core::cancel::CancelToken;
use scanpaper_core::error::{Result, ScanpaperError};
use scanpaper_core::types::PageFormat;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::page::{ImageFile, Page};

static PROCESSING_SHEET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Processing sheet.*\.pnm\n").expect("static regex"));

/// Reading direction of a two-page spread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ltr,
    Rtl,
}

/// What to ask unpaper for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpaperOptions {
    /// Extra unpaper flags, e.g. `["--no-deskew", "--layout", "double"]`.
    #[serde(default)]
    pub args: Vec<String>,
    /// 1 for a single output sheet, 2 to split a spread into two pages.
    pub output_pages: u8,
    #[serde(default)]
    pub direction: Direction,
}

impl Default for UnpaperOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            output_pages: 1,
            direction: Direction::Ltr,
        }
    }
}

/// Pages written by one unpaper run, in reading order, plus any
/// diagnostics the tool printed.
#[derive(Debug)]
pub struct UnpaperOutput {
    pub pages: Vec<ImageFile>,
    pub messages: Vec<String>,
}

/// The `unpaper` program.
#[derive(Debug, Clone)]
pub struct Unpaper {
    command: String,
}

impl Unpaper {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Argument vector for one run (program name excluded).
    pub fn command_line(options: &UnpaperOptions, input: &Path, outputs: &[PathBuf]) -> Vec<String> {
        let mut args = options.args.clone();
        args.push("--output-pages".into());
        args.push(options.output_pages.to_string());
        args.push("--overwrite".into());
        args.push(input.display().to_string());
        args.extend(outputs.iter().map(|p| p.display().to_string()));
        args
    }

    /// Run unpaper on `page`.
    ///
    /// Input that is not already PNM is converted first, to PBM for
    /// monochrome pages and PGM or PPM otherwise. Output pages come
    /// back swapped for right-to-left spreads, so the first one always
    /// replaces the source page.
    #[instrument(skip_all, fields(id = %page.id, pages = options.output_pages))]
    pub fn run(
        &self,
        page: &Page,
        options: &UnpaperOptions,
        temp_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<UnpaperOutput> {
        if !(1..=2).contains(&options.output_pages) {
            return Err(ScanpaperError::InvalidArgument(format!(
                "unpaper can write 1 or 2 pages, not {}",
                options.output_pages
            )));
        }

        // Hold the converted copy until unpaper has read it.
        let converted;
        let input = if page.format == PageFormat::Pnm {
            page.image_path()
        } else {
            debug!(from = page.format.as_str(), "Converting to PNM for unpaper");
            let image = page.open_image()?;
            converted = if page.format == PageFormat::Monochrome {
                ImageFile::save_bitmap(temp_dir, &image)?
            } else {
                ImageFile::save(temp_dir, &image, PageFormat::Pnm)?
            };
            converted.path()
        };

        let outputs = (0..options.output_pages)
            .map(|_| ImageFile::create(temp_dir, PageFormat::Pnm))
            .collect::<Result<Vec<_>>>()?;
        let paths: Vec<PathBuf> = outputs.iter().map(|f| f.path().to_path_buf()).collect();

        let output = super::run(&self.command, Self::command_line(options, input, &paths))?
            .check(&self.command)?;
        cancel.checkpoint()?;

        let primary_empty = outputs[0].is_empty()?;
        let mut messages = Vec::new();

        if !output.stderr.is_empty() {
            error!(stderr = %output.stderr.trim_end(), "unpaper");
            messages.push(output.stderr.clone());
            if primary_empty {
                return Err(ScanpaperError::external_tool(
                    "unpaper produced no output",
                    output.stderr,
                ));
            }
        }

        let stdout = PROCESSING_SHEET.replace(&output.stdout, "");
        if !stdout.is_empty() {
            warn!(stdout = %stdout.trim_end(), "unpaper");
            messages.push(stdout.to_string());
            if primary_empty {
                return Err(ScanpaperError::external_tool(
                    "unpaper produced no output",
                    stdout.into_owned(),
                ));
            }
        }

        let mut pages = outputs;
        if pages.len() == 2 && options.direction == Direction::Rtl {
            pages.swap(0, 1);
        }
        Ok(UnpaperOutput { pages, messages })
    }
}

impl Default for Unpaper {
    fn default() -> Self {
        Self::new("unpaper")
    }
}
