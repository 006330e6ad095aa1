// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanpaper: Core types, configuration and error definitions shared across all crates.

pub mod cancel;
pub mod config;
pub mod error;
pub mod human_errors;
pub mod types;

pub use cancel::CancelToken;
pub use config::{EngineConfig, OcrBackendKind};
pub use error::{Result, ScanpaperError};
pub use types::*;
