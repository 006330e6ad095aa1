// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Text layer: bounding-box trees, their geometry transform, and the hOCR and
// djvu exchange formats.

pub mod bbox;
pub mod djvu;
pub mod hocr;

pub use bbox::{Bbox, BboxKind, BboxTree, Rect, TextStyle};
