// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanpaper.

use thiserror::Error;

/// Top-level error type for all Scanpaper operations.
#[derive(Debug, Error)]
pub enum ScanpaperError {
    // -- Store errors --
    #[error("not a scanpaper session: {0}")]
    Format(String),

    #[error("session is read-only: {0}")]
    ReadOnly(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("database error: {0}")]
    Database(String),

    // -- Page processing --
    #[error("image processing failed: {0}")]
    Image(String),

    #[error("text layer error: {0}")]
    TextLayer(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{message}")]
    ExternalTool { message: String, diagnostics: String },

    // -- Worker --
    #[error("operation cancelled")]
    Cancelled,

    #[error("worker error: {0}")]
    Worker(String),

    // -- I/O --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanpaperError {
    /// Build an [`ScanpaperError::ExternalTool`] from a message and the
    /// captured stderr/stdout of the tool.
    pub fn external_tool(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::ExternalTool {
            message: message.into(),
            diagnostics: diagnostics.into(),
        }
    }

    /// Errors raised by the page store itself. A batch request aborts on
    /// these instead of carrying on with the next page.
    pub fn is_store_level(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Format(_) | Self::ReadOnly(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanpaperError>;
