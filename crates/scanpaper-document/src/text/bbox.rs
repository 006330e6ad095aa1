// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounding-box tree: the text and annotation layer of a page.
//
// The tree is stored flat, in document order, with an explicit `depth` per
// node: page (0) → column/para → line → word. This is the same order in which
// hOCR and djvu text are written, so export is a single pass, and it is also
// the JSON shape kept in the page store.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Level of a node in the bounding-box hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BboxKind {
    Page,
    Column,
    Para,
    Line,
    Word,
    Header,
    Footer,
    Caption,
}

impl BboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Column => "column",
            Self::Para => "para",
            Self::Line => "line",
            Self::Word => "word",
            Self::Header => "header",
            Self::Footer => "footer",
            Self::Caption => "caption",
        }
    }

    /// Parse a kind name, accepting the hOCR spellings `carea` and `par`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "page" => Some(Self::Page),
            "column" | "carea" => Some(Self::Column),
            "para" | "par" => Some(Self::Para),
            "line" => Some(Self::Line),
            "word" => Some(Self::Word),
            "header" => Some(Self::Header),
            "footer" => Some(Self::Footer),
            "caption" => Some(Self::Caption),
            _ => None,
        }
    }
}

/// Inline text style carried over from hOCR markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextStyle {
    Strong,
    Em,
}

impl TextStyle {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::Em => "em",
        }
    }
}

/// Axis-aligned rectangle `[x1, y1, x2, y2]` in pixels, top-left origin.
pub type Rect = [u32; 4];

/// One node of the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    #[serde(rename = "type")]
    pub kind: BboxKind,
    pub bbox: Rect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// OCR confidence (`x_wconf`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i32>,
    /// Baseline polynomial coefficients, at least two.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textangle: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub style: Vec<TextStyle>,
    pub depth: u32,
}

impl Bbox {
    /// A node with only the mandatory fields set.
    pub fn new(kind: BboxKind, bbox: Rect, depth: u32) -> Self {
        Self {
            kind,
            bbox,
            id: None,
            text: None,
            confidence: None,
            baseline: None,
            textangle: None,
            style: Vec::new(),
            depth,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn width(&self) -> u32 {
        self.bbox[2].saturating_sub(self.bbox[0])
    }

    pub fn height(&self) -> u32 {
        self.bbox[3].saturating_sub(self.bbox[1])
    }
}

/// A page's text or annotation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BboxTree {
    boxes: Vec<Bbox>,
}

static TRAILING_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)[ ]+$").expect("static regex"));

impl BboxTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from nodes already in document order.
    pub fn from_boxes(boxes: Vec<Bbox>) -> Self {
        Self { boxes }
    }

    /// A single page node holding plain text.
    pub fn from_text(text: &str, width: u32, height: u32) -> Self {
        Self {
            boxes: vec![Bbox::new(BboxKind::Page, [0, 0, width, height], 0).with_text(text)],
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bbox> {
        self.boxes.iter()
    }

    pub fn boxes(&self) -> &[Bbox] {
        &self.boxes
    }

    pub fn boxes_mut(&mut self) -> &mut Vec<Bbox> {
        &mut self.boxes
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    /// The root node, if any.
    pub fn root(&self) -> Option<&Bbox> {
        self.boxes.first()
    }

    /// A tree is valid when it is non-empty and a page root has a non-zero
    /// extent.
    pub fn valid(&self) -> bool {
        match self.boxes.first() {
            None => false,
            Some(root) if root.kind == BboxKind::Page => root.bbox[2] != 0 && root.bbox[3] != 0,
            Some(_) => true,
        }
    }

    /// Whether the node at `index` has children.
    pub(crate) fn has_children(&self, index: usize) -> bool {
        match (self.boxes.get(index), self.boxes.get(index + 1)) {
            (Some(node), Some(next)) => next.depth > node.depth,
            _ => false,
        }
    }

    /// Plain text: words separated by spaces, paragraphs by a blank line.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for bbox in &self.boxes {
            if !out.is_empty() && bbox.kind == BboxKind::Para {
                out.push_str("\n\n");
            }
            if let Some(text) = &bbox.text {
                out.push_str(text);
                out.push(' ');
            }
        }
        TRAILING_SPACES.replace_all(&out, "").into_owned()
    }

    /// Re-derive the tree for the page region `(x, y, width, height)`.
    ///
    /// Every node is intersected with the crop rectangle. Nodes left with
    /// zero area are dropped together with their descendants, survivors are
    /// translated by `(-x, -y)`. The root always becomes
    /// `(0, 0, width, height)`.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Self {
        let right = x.saturating_add(width);
        let bottom = y.saturating_add(height);
        let mut boxes = Vec::with_capacity(self.boxes.len());
        let mut dropped_depth: Option<u32> = None;

        for (i, node) in self.boxes.iter().enumerate() {
            if let Some(depth) = dropped_depth {
                if node.depth > depth {
                    continue;
                }
                dropped_depth = None;
            }

            if i == 0 {
                let mut root = node.clone();
                root.bbox = [0, 0, width, height];
                boxes.push(root);
                continue;
            }

            let cropped = crop_axis(node.bbox[0], node.bbox[2], x, right)
                .zip(crop_axis(node.bbox[1], node.bbox[3], y, bottom));
            match cropped {
                Some(((x1, x2), (y1, y2))) => {
                    let mut kept = node.clone();
                    kept.bbox = [x1, y1, x2, y2];
                    boxes.push(kept);
                }
                None => dropped_depth = Some(node.depth),
            }
        }

        Self { boxes }
    }

    /// Follow a clockwise rotation of the page by `quarter_turns` * 90
    /// degrees. `width` and `height` are the page size before rotating.
    pub fn rotate_quarter(&self, quarter_turns: u32, width: u32, height: u32) -> Self {
        let turn = |[x1, y1, x2, y2]: Rect| -> Rect {
            match quarter_turns % 4 {
                1 => [height.saturating_sub(y2), x1, height.saturating_sub(y1), x2],
                2 => [
                    width.saturating_sub(x2),
                    height.saturating_sub(y2),
                    width.saturating_sub(x1),
                    height.saturating_sub(y1),
                ],
                3 => [y1, width.saturating_sub(x2), y2, width.saturating_sub(x1)],
                _ => [x1, y1, x2, y2],
            }
        };
        Self {
            boxes: self
                .boxes
                .iter()
                .map(|node| Bbox {
                    bbox: turn(node.bbox),
                    ..node.clone()
                })
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a BboxTree {
    type Item = &'a Bbox;
    type IntoIter = std::slice::Iter<'a, Bbox>;

    fn into_iter(self) -> Self::IntoIter {
        self.boxes.iter()
    }
}

/// Intersect `[t1, t2)` with `[c1, c2)` and shift by `-c1`. `None` when the
/// overlap is empty.
fn crop_axis(t1: u32, t2: u32, c1: u32, c2: u32) -> Option<(u32, u32)> {
    let lo = t1.max(c1);
    let hi = t2.min(c2);
    (lo < hi).then(|| (lo - c1, hi - c1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BboxTree {
        BboxTree::from_boxes(vec![
            Bbox::new(BboxKind::Page, [0, 0, 70, 46], 0),
            Bbox::new(BboxKind::Line, [1, 0, 69, 46], 1),
            Bbox::new(BboxKind::Word, [1, 0, 9, 46], 2).with_text("left"),
            Bbox::new(BboxKind::Word, [10, 0, 45, 46], 2).with_text("middle"),
            Bbox::new(BboxKind::Word, [46, 0, 69, 46], 2).with_text("right"),
        ])
    }

    #[test]
    fn full_page_crop_is_identity() {
        let tree = sample();
        assert_eq!(tree.crop(0, 0, 70, 46), tree);
    }

    #[test]
    fn word_is_clipped_and_translated() {
        let tree = BboxTree::from_boxes(vec![
            Bbox::new(BboxKind::Page, [0, 0, 210, 297], 0),
            Bbox::new(BboxKind::Word, [5, 5, 15, 15], 1).with_text("word"),
        ]);
        let cropped = tree.crop(10, 10, 50, 50);
        assert_eq!(cropped.boxes()[0].bbox, [0, 0, 50, 50]);
        assert_eq!(cropped.boxes()[1].bbox, [0, 0, 5, 5]);
    }

    #[test]
    fn split_left_half_keeps_overlapping_words() {
        let left = sample().crop(0, 0, 35, 46);
        let words: Vec<_> = left
            .iter()
            .filter(|b| b.kind == BboxKind::Word)
            .map(|b| (b.text.as_deref().unwrap_or(""), b.bbox))
            .collect();
        assert_eq!(words, vec![("left", [1, 0, 9, 46]), ("middle", [10, 0, 35, 46])]);
    }

    #[test]
    fn split_right_half_translates() {
        let right = sample().crop(35, 0, 35, 46);
        let words: Vec<_> = right
            .iter()
            .filter(|b| b.kind == BboxKind::Word)
            .map(|b| (b.text.as_deref().unwrap_or(""), b.bbox))
            .collect();
        assert_eq!(words, vec![("middle", [0, 0, 10, 46]), ("right", [11, 0, 34, 46])]);
    }

    #[test]
    fn touching_box_is_dropped() {
        let tree = BboxTree::from_boxes(vec![
            Bbox::new(BboxKind::Page, [0, 0, 100, 100], 0),
            Bbox::new(BboxKind::Word, [50, 0, 60, 10], 1).with_text("edge"),
        ]);
        assert_eq!(tree.crop(0, 0, 50, 100).len(), 1);
    }

    #[test]
    fn dropped_parent_takes_children_along() {
        let tree = BboxTree::from_boxes(vec![
            Bbox::new(BboxKind::Page, [0, 0, 100, 100], 0),
            Bbox::new(BboxKind::Line, [0, 60, 100, 70], 1),
            Bbox::new(BboxKind::Word, [0, 60, 10, 70], 2).with_text("gone"),
            Bbox::new(BboxKind::Line, [0, 10, 100, 20], 1),
            Bbox::new(BboxKind::Word, [0, 10, 10, 20], 2).with_text("kept"),
        ]);
        let cropped = tree.crop(0, 0, 100, 50);
        let texts: Vec<_> = cropped.iter().filter_map(|b| b.text.as_deref()).collect();
        assert_eq!(texts, vec!["kept"]);
        assert_eq!(cropped.len(), 3);
    }

    #[test]
    fn root_survives_crop_outside_everything() {
        let tree = BboxTree::from_text("The quick brown fox", 422, 61);
        let cropped = tree.crop(0, 40, 200, 30);
        assert_eq!(cropped.len(), 1);
        assert_eq!(cropped.boxes()[0].bbox, [0, 0, 200, 30]);
    }

    #[test]
    fn cropped_leaves_never_grow() {
        let tree = sample();
        for (x, y, w, h) in [(3, 3, 20, 20), (30, 5, 40, 41), (0, 20, 70, 10)] {
            let cropped = tree.crop(x, y, w, h);
            for b in cropped.iter().skip(1) {
                assert!(b.bbox[2] <= w && b.bbox[3] <= h, "{:?} escapes {w}x{h}", b.bbox);
                let source = tree
                    .iter()
                    .find(|s| s.text.is_some() && s.text == b.text)
                    .map(|s| (s.width(), s.height()));
                if let Some((sw, sh)) = source {
                    assert!(b.width() <= sw && b.height() <= sh);
                }
            }
        }
    }

    #[test]
    fn text_export_separates_paragraphs() {
        let tree = BboxTree::from_boxes(vec![
            Bbox::new(BboxKind::Page, [0, 0, 10, 10], 0),
            Bbox::new(BboxKind::Para, [0, 0, 10, 5], 1),
            Bbox::new(BboxKind::Word, [0, 0, 5, 5], 2).with_text("The"),
            Bbox::new(BboxKind::Word, [5, 0, 10, 5], 2).with_text("quick"),
            Bbox::new(BboxKind::Para, [0, 5, 10, 10], 1),
            Bbox::new(BboxKind::Word, [0, 5, 5, 10], 2).with_text("fox"),
        ]);
        assert_eq!(tree.to_text(), "The quick\n\nfox");
    }

    #[test]
    fn validity() {
        let mut tree = BboxTree::from_text("The quick brown fox", 422, 61);
        assert!(tree.valid());
        tree.boxes_mut()[0].bbox[3] = 0;
        assert!(!tree.valid());
        tree.boxes_mut()[0].kind = BboxKind::Word;
        assert!(tree.valid());
        assert!(!BboxTree::new().valid());
    }

    #[test]
    fn json_shape() {
        let tree = BboxTree::from_text("The quick brown fox", 422, 61);
        let json = tree.to_json().expect("json");
        assert_eq!(
            json,
            r#"[{"type":"page","bbox":[0,0,422,61],"text":"The quick brown fox","depth":0}]"#
        );
        assert_eq!(BboxTree::from_json(&json).expect("parse"), tree);
    }

    #[test]
    fn quarter_turns_follow_the_image() {
        let tree = BboxTree::from_boxes(vec![
            Bbox::new(BboxKind::Page, [0, 0, 100, 50], 0),
            Bbox::new(BboxKind::Word, [10, 5, 30, 15], 1).with_text("word"),
        ]);
        let cw = tree.rotate_quarter(1, 100, 50);
        assert_eq!(cw.boxes()[0].bbox, [0, 0, 50, 100]);
        assert_eq!(cw.boxes()[1].bbox, [35, 10, 45, 30]);
        assert_eq!(tree.rotate_quarter(2, 100, 50).boxes()[1].bbox, [70, 35, 90, 45]);
        assert_eq!(tree.rotate_quarter(3, 100, 50).boxes()[1].bbox, [5, 70, 15, 90]);
        assert_eq!(cw.rotate_quarter(3, 50, 100), tree);
    }
}
