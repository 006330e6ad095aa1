// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// djvused text and annotation layers. DjVu puts the origin at the bottom-left,
// so every y coordinate is flipped against the page height.

use std::sync::LazyLock;

use regex::Regex;
use scanpaper_core::error::{Result, ScanpaperError};

use super::bbox::{Bbox, BboxKind, BboxTree};

/// Highlight colour used for annotation map areas.
pub const ANNOTATION_COLOR: &str = "cccc00";

static DJVU_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\(+)(\w+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)(.*?)(\)*)$").expect("static regex")
});
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*"(.*)"\s*$"#).expect("static regex"));
static MAPAREA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\(maparea\s+".*"\s+"(.*)"\s+\(rect\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\)\s+\(hilite\s+#[A-Fa-f\d]{6}\)\s+\(xor\)\)$"#,
    )
    .expect("static regex")
});
static LEADING_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z]+)").expect("static regex"));

fn escape_text(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn unescape_text(text: &str) -> String {
    text.replace("\\\"", "\"").replace("\\\\", "\\")
}

fn parse_u32(s: &str) -> Result<u32> {
    s.parse()
        .map_err(|e| ScanpaperError::TextLayer(format!("bad coordinate {s:?}: {e}")))
}

impl BboxTree {
    /// Write the tree as a djvused `txt` expression.
    ///
    /// djvu only allows text on leaves, so text on a node with children is
    /// dropped.
    pub fn to_djvu_txt(&self) -> String {
        let mut out = String::new();
        let mut prev_depth: Option<i64> = None;
        let mut height = 0u32;

        for (i, bbox) in self.iter().enumerate() {
            let depth = i64::from(bbox.depth);
            if let Some(prev) = prev_depth.as_mut() {
                while *prev >= depth {
                    *prev -= 1;
                    out.push(')');
                }
            }
            prev_depth = Some(depth);

            let kind = match bbox.kind {
                BboxKind::Page | BboxKind::Column | BboxKind::Para | BboxKind::Line | BboxKind::Word => {
                    bbox.kind.as_str().to_string()
                }
                // djvu has no header/footer/caption zones
                _ => bbox
                    .id
                    .as_deref()
                    .and_then(|id| LEADING_WORD.captures(id))
                    .map(|c| c[1].to_string())
                    .unwrap_or_else(|| "line".to_string()),
            };
            if bbox.kind == BboxKind::Page {
                height = bbox.bbox[3];
            }

            let [x1, y1, x2, y2] = bbox.bbox;
            if bbox.depth != 0 {
                out.push('\n');
            }
            out.push_str(&" ".repeat(bbox.depth as usize * 2));
            out.push_str(&format!(
                "({kind} {x1} {} {x2} {}",
                height.saturating_sub(y2),
                height.saturating_sub(y1)
            ));
            if let Some(text) = &bbox.text {
                if !self.has_children(i) {
                    out.push_str(&format!(" \"{}\"", escape_text(text)));
                }
            }
        }

        if let Some(mut prev) = prev_depth {
            while prev >= 0 {
                prev -= 1;
                out.push(')');
            }
            out.push('\n');
        }
        out
    }

    /// Parse a djvused `txt` expression, one zone per line.
    pub fn from_djvu_txt(djvu: &str) -> Result<Self> {
        let mut boxes = Vec::new();
        let mut height = 0u32;
        let mut depth: i64 = 0;

        for line in djvu.lines().filter(|l| !l.is_empty()) {
            let caps = DJVU_LINE
                .captures(line)
                .ok_or_else(|| ScanpaperError::TextLayer(format!("error parsing djvu line '{line}'")))?;

            depth += caps[1].len() as i64;
            let kind = BboxKind::parse(&caps[2]).ok_or_else(|| {
                ScanpaperError::TextLayer(format!("unknown djvu zone '{}'", &caps[2]))
            })?;
            let (x1, y1, x2, y2) = (
                parse_u32(&caps[3])?,
                parse_u32(&caps[4])?,
                parse_u32(&caps[5])?,
                parse_u32(&caps[6])?,
            );
            if kind == BboxKind::Page {
                height = y2;
            }

            let mut bbox = Bbox::new(
                kind,
                [x1, height.saturating_sub(y2), x2, height.saturating_sub(y1)],
                u32::try_from(depth - 1).unwrap_or(0),
            );
            if let Some(text) = QUOTED.captures(&caps[7]) {
                bbox.text = Some(unescape_text(&text[1]));
            }
            depth -= caps[8].len() as i64;
            boxes.push(bbox);
        }

        Ok(Self::from_boxes(boxes))
    }

    /// Write every text-bearing node as a highlighted djvused map area.
    pub fn to_djvu_ann(&self) -> String {
        let mut out = String::new();
        let mut height = 0u32;
        for bbox in self.iter() {
            if bbox.kind == BboxKind::Page {
                height = bbox.bbox[3];
            }
            if let Some(text) = &bbox.text {
                let [x1, y1, x2, y2] = bbox.bbox;
                out.push_str(&format!(
                    "(maparea \"\" \"{}\" (rect {x1} {} {} {}) (hilite #{ANNOTATION_COLOR}) (xor))\n",
                    escape_text(text),
                    height.saturating_sub(y2),
                    x2.saturating_sub(x1),
                    y2.saturating_sub(y1),
                ));
            }
        }
        out
    }

    /// Parse djvused map areas into a page of word annotations.
    pub fn from_djvu_ann(djvu: &str, width: u32, height: u32) -> Result<Self> {
        let mut boxes = vec![Bbox::new(BboxKind::Page, [0, 0, width, height], 0)];
        for line in djvu.lines().filter(|l| !l.is_empty()) {
            let caps = MAPAREA.captures(line).ok_or_else(|| {
                ScanpaperError::TextLayer(format!("error parsing djvu annotation '{line}'"))
            })?;
            let (x, y, w, h) = (
                parse_u32(&caps[2])?,
                parse_u32(&caps[3])?,
                parse_u32(&caps[4])?,
                parse_u32(&caps[5])?,
            );
            boxes.push(
                Bbox::new(
                    BboxKind::Word,
                    [x, height.saturating_sub(y + h), x + w, height.saturating_sub(y)],
                    1,
                )
                .with_text(unescape_text(&caps[1])),
            );
        }
        Ok(Self::from_boxes(boxes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &str = "(page 0 0 2236 3185
  (column 157 3011 1725 3105
    (para 157 3014 1725 3101
      (line 157 3014 1725 3101
        (word 157 3030 241 3095 \"28\")
        (word 533 3033 645 3099 \"LA\")))))
";

    #[test]
    fn simple_text_page() {
        let tree = BboxTree::from_text("The quick brown fox", 422, 61);
        assert_eq!(tree.to_djvu_txt(), "(page 0 0 422 61 \"The quick brown fox\")\n");
    }

    #[test]
    fn nested_round_trip() {
        let tree = BboxTree::from_djvu_txt(NESTED).expect("parse");
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.boxes()[1].bbox, [157, 80, 1725, 174]);
        assert_eq!(tree.boxes()[4].depth, 4);
        assert_eq!(tree.boxes()[5].text.as_deref(), Some("LA"));
        assert_eq!(tree.to_djvu_txt(), NESTED);
    }

    #[test]
    fn text_on_parent_is_not_written() {
        let mut tree = BboxTree::from_boxes(vec![
            Bbox::new(BboxKind::Page, [0, 0, 422, 61], 0).with_text("to be ignored"),
            Bbox::new(BboxKind::Line, [1, 15, 420, 60], 1).with_text("The quick brown fox"),
        ]);
        let expected = "(page 0 0 422 61\n  (line 1 1 420 46 \"The quick brown fox\"))\n";
        assert_eq!(tree.to_djvu_txt(), expected);
        tree.boxes_mut()[0].text = None;
        assert_eq!(tree.to_djvu_txt(), expected);
    }

    #[test]
    fn empty_tree_is_empty_string() {
        assert_eq!(BboxTree::new().to_djvu_txt(), "");
    }

    #[test]
    fn annotation_round_trip() {
        let tree = BboxTree::from_boxes(vec![
            Bbox::new(BboxKind::Page, [0, 0, 100, 200], 0),
            Bbox::new(BboxKind::Word, [10, 20, 30, 50], 1).with_text("say \"hi\""),
        ]);
        let ann = tree.to_djvu_ann();
        assert_eq!(
            ann,
            "(maparea \"\" \"say \\\"hi\\\"\" (rect 10 150 20 30) (hilite #cccc00) (xor))\n"
        );
        let back = BboxTree::from_djvu_ann(&ann, 100, 200).expect("parse");
        assert_eq!(back, tree);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(BboxTree::from_djvu_txt("not djvu").is_err());
        assert!(BboxTree::from_djvu_ann("(maparea broken", 10, 10).is_err());
    }
}
