// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the request `error` event.
//
// Every technical error is mapped to a plain message with a suggestion.
// External tool failures keep the tool's own diagnostic text so the user can
// see what the tool printed.

use crate::error::ScanpaperError;

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The session file itself cannot be used.
    Fatal,
    /// User must do something (install a language pack, fix a command).
    ActionRequired,
    /// The request failed but the document is intact; retrying may help.
    Recoverable,
}

/// A human-readable error with a plain message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain summary (shown as a heading).
    pub message: String,
    /// What the user should try.
    pub suggestion: String,
    /// Captured stdout/stderr of an external tool, if any.
    pub diagnostics: Option<String>,
    pub severity: Severity,
}

impl HumanError {
    /// Render as a single string: message, then diagnostics when present.
    pub fn render(&self) -> String {
        match &self.diagnostics {
            Some(diag) if !diag.trim().is_empty() => {
                format!("{}\n{}", self.message, diag.trim_end())
            }
            _ => self.message.clone(),
        }
    }
}

/// Convert a `ScanpaperError` into a `HumanError`.
pub fn humanize_error(err: &ScanpaperError) -> HumanError {
    let plain = |message: String, suggestion: &str, severity| HumanError {
        message,
        suggestion: suggestion.into(),
        diagnostics: None,
        severity,
    };

    match err {
        ScanpaperError::Format(detail) => plain(
            format!("This file is not a scanpaper session ({detail})."),
            "Choose a session file created by scanpaper, or start a new session.",
            Severity::Fatal,
        ),

        ScanpaperError::ReadOnly(detail) => plain(
            format!("This session was saved by a newer scanpaper and can only be viewed ({detail})."),
            "Update scanpaper to edit this session.",
            Severity::ActionRequired,
        ),

        ScanpaperError::NotFound(detail) => plain(
            detail.clone(),
            "The page may have been deleted while the operation was waiting.",
            Severity::Recoverable,
        ),

        ScanpaperError::AlreadyExists(detail) => plain(
            detail.clone(),
            "Pick a different page number.",
            Severity::Recoverable,
        ),

        ScanpaperError::InvalidArgument(detail) => plain(
            detail.clone(),
            "Check the values given to the operation.",
            Severity::Recoverable,
        ),

        ScanpaperError::Configuration(detail) => plain(
            detail.clone(),
            "Install the missing data or fix the tool settings, then try again.",
            Severity::ActionRequired,
        ),

        ScanpaperError::ExternalTool {
            message,
            diagnostics,
        } => HumanError {
            message: message.clone(),
            suggestion: "Check the tool's output below and its command line options.".into(),
            diagnostics: Some(diagnostics.clone()),
            severity: Severity::ActionRequired,
        },

        ScanpaperError::Image(detail) => plain(
            format!("The page image could not be processed: {detail}"),
            "The image may be damaged or in an unusual format.",
            Severity::Recoverable,
        ),

        ScanpaperError::TextLayer(detail) => plain(
            format!("The text layer could not be read: {detail}"),
            "Run OCR on the page again to rebuild its text layer.",
            Severity::Recoverable,
        ),

        ScanpaperError::Database(detail) => plain(
            format!("The session store had a problem: {detail}"),
            "Save your work elsewhere and reopen the session.",
            Severity::Fatal,
        ),

        ScanpaperError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::NotFound {
                plain(
                    format!("A file could not be found: {io_err}"),
                    "It may have been moved or deleted.",
                    Severity::Recoverable,
                )
            } else if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                plain(
                    format!("Permission denied: {io_err}"),
                    "Check the permissions of the temp directory.",
                    Severity::ActionRequired,
                )
            } else {
                plain(
                    format!("There was a problem reading or writing a file: {io_err}"),
                    "Check that the disk is not full.",
                    Severity::Recoverable,
                )
            }
        }

        ScanpaperError::Serialization(e) => plain(
            format!("Stored page data is corrupt: {e}"),
            "Please report this.",
            Severity::Recoverable,
        ),

        ScanpaperError::Worker(detail) => plain(
            format!("The document worker stopped: {detail}"),
            "Reopen the session.",
            Severity::Fatal,
        ),

        // Never shown: the worker drops cancelled requests silently.
        ScanpaperError::Cancelled => plain(
            "Operation cancelled.".into(),
            "",
            Severity::Recoverable,
        ),
    }
}
