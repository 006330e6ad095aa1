// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tesseract OCR via its command-line interface.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::OnceLock;

use scanpaper_core::error::{Result, ScanpaperError};
use tracing::{debug, info, instrument};

use crate::ocr::OcrBackend;
use crate::page::Page;
use crate::text::BboxTree;

/// The `tesseract` program.
///
/// The installed language list is read once per instance; a failed lookup
/// is retried on the next call.
#[derive(Debug, Clone)]
pub struct Tesseract {
    command: String,
    languages: OnceLock<Vec<String>>,
}

impl Default for Tesseract {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl Tesseract {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            languages: OnceLock::new(),
        }
    }

    /// Installed language codes, as reported by `--list-langs`.
    pub fn languages(&self) -> Result<&[String]> {
        if let Some(cached) = self.languages.get() {
            return Ok(cached);
        }
        let listed = self.list_languages()?;
        Ok(self.languages.get_or_init(|| listed))
    }

    fn list_languages(&self) -> Result<Vec<String>> {
        let output = super::run(&self.command, ["--list-langs"])?.check(&self.command)?;
        // Older releases print the list on stderr.
        let listing = if output.stdout.trim().is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(parse_language_list(&listing))
    }

    /// Fail with a configuration error unless every part of `language`
    /// (e.g. `eng+deu`) is installed.
    pub fn check_language(&self, language: &str) -> Result<()> {
        let installed = self.languages()?;
        if installed.is_empty() {
            return Err(ScanpaperError::Configuration(
                "no tesseract language data is installed".into(),
            ));
        }
        for code in language.split('+') {
            if !installed.iter().any(|l| l == code) {
                return Err(ScanpaperError::Configuration(format!(
                    "tesseract language '{code}' is not installed (available: {})",
                    installed.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Run OCR on an image file and return the raw hOCR document.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn hocr(&self, path: &Path, language: &str) -> Result<String> {
        let output = super::run(
            &self.command,
            [
                path.as_os_str(),
                OsStr::new("stdout"),
                OsStr::new("-l"),
                OsStr::new(language),
                OsStr::new("hocr"),
            ],
        )?
        .check(&self.command)?;
        if !output.stderr.trim().is_empty() {
            debug!(stderr = %output.stderr.trim_end(), "tesseract diagnostics");
        }
        Ok(output.stdout)
    }
}

impl OcrBackend for Tesseract {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognise(&self, page: &Page, language: &str) -> Result<BboxTree> {
        self.check_language(language)?;
        let hocr = self.hocr(page.image_path(), language)?;
        let tree = BboxTree::from_hocr(&hocr)?;
        info!(id = %page.id, boxes = tree.len(), "tesseract finished");
        Ok(tree)
    }
}

fn parse_language_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of available languages"))
        .map(str::to_string)
        .collect()
}
