// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// hOCR import and export for the bounding-box tree.
//
// Import walks the markup with quick-xml in lenient mode (OCR engines emit
// HTML 4 as often as XHTML), keeps every element carrying both an `ocr_*`
// class and a `title` with a non-degenerate bbox, and prunes branches that
// end without any text. Export writes the same shape back.

use std::sync::LazyLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use scanpaper_core::error::{Result, ScanpaperError};
use tracing::{debug, instrument};

use super::bbox::{Bbox, BboxKind, BboxTree, TextStyle};

/// Version advertised in the `ocr-system` meta tag.
const OCR_SYSTEM: &str = concat!("scanpaper ", env!("CARGO_PKG_VERSION"));

/// Elements that never have a closing tag in HTML 4.
const VOID_ELEMENTS: &[&[u8]] = &[b"meta", b"br", b"img", b"link", b"hr", b"input"];

static BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<body[^>]*>.*</body>").expect("static regex"));
static TITLE_BBOX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bbbox\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)").expect("static regex"));
static TITLE_TEXTANGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\btextangle\s+(\d+)").expect("static regex"));
static TITLE_WCONF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bx_wconf\s+(-?\d+)").expect("static regex"));
static TITLE_BASELINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bbaseline\s+((?:-?\d+(?:\.\d+)?\s+)*-?\d+(?:\.\d+)?)").expect("static regex")
});

/// Document preamble written by [`BboxTree::to_hocr`].
pub fn hocr_header() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN"
 "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="en" lang="en">
 <head>
  <meta http-equiv="Content-Type" content="text/html;charset=utf-8" />
  <meta name='ocr-system' content='{OCR_SYSTEM}' />
  <meta name='ocr-capabilities' content='ocr_page ocr_carea ocr_par ocr_line ocr_word'/>
 </head>
 <body>"#
    )
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// A node under construction. Fields stay optional until the walk is done.
#[derive(Debug, Default)]
struct Draft {
    kind: Option<BboxKind>,
    bbox: Option<[u32; 4]>,
    id: Option<String>,
    text: Option<String>,
    confidence: Option<i32>,
    baseline: Option<Vec<f64>>,
    textangle: Option<u32>,
    style: Vec<TextStyle>,
    children: Vec<usize>,
}

impl Draft {
    /// Copy over every property `other` has and `self` lacks.
    fn absorb(&mut self, other: Draft) {
        self.bbox = self.bbox.or(other.bbox);
        self.confidence = self.confidence.or(other.confidence);
        self.textangle = self.textangle.or(other.textangle);
        if self.baseline.is_none() {
            self.baseline = other.baseline;
        }
        if self.text.is_none() {
            self.text = other.text;
        }
    }
}

/// Arena-backed hOCR walker.
struct HocrWalker {
    nodes: Vec<Draft>,
    pages: Vec<usize>,
    /// One entry per open element: the node it contributes to, if any.
    stack: Vec<Option<usize>>,
}

impl HocrWalker {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            pages: Vec::new(),
            stack: Vec::new(),
        }
    }

    fn top(&self) -> Option<usize> {
        self.stack.last().copied().flatten()
    }

    fn open(&mut self, element: &BytesStart<'_>) {
        let mut class = None;
        let mut title = None;
        let mut id = None;
        for attr in element.attributes().with_checks(false).flatten() {
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            match attr.key.as_ref() {
                b"class" => class = Some(value),
                b"title" => title = Some(value),
                b"id" => id = Some(value),
                _ => {}
            }
        }

        let current = match (class, title) {
            (Some(class), Some(title)) => {
                let mut draft = parse_title(&title);
                draft.kind = parse_class(&class);
                self.place(draft, id)
            }
            _ => self.top(),
        };

        if let Some(index) = current {
            match element.local_name().as_ref() {
                b"strong" => self.nodes[index].style.push(TextStyle::Strong),
                b"em" => self.nodes[index].style.push(TextStyle::Em),
                _ => {}
            }
        }

        self.stack.push(current);
    }

    /// Decide which node a classed element maps to, creating it if needed.
    fn place(&mut self, draft: Draft, id: Option<String>) -> Option<usize> {
        let parent = self.top();
        let Some(kind) = draft.kind else {
            // unknown class, e.g. ocr_cinfo: belongs to the enclosing node
            return parent;
        };

        // xocr_word inside ocrx_word: merge into the outer word
        if kind == BboxKind::Word {
            if let Some(p) = parent.filter(|&p| self.nodes[p].kind == Some(BboxKind::Word)) {
                self.nodes[p].absorb(draft);
                return Some(p);
            }
        }

        let index = self.nodes.len();
        let has_bbox = draft.bbox.is_some();
        self.nodes.push(Draft { id, ..draft });

        if kind == BboxKind::Page {
            self.pages.push(index);
        } else if let (Some(p), true) = (parent, has_bbox) {
            self.nodes[p].children.push(index);
        }
        Some(index)
    }

    fn close(&mut self) {
        self.stack.pop();
    }

    fn text(&mut self, text: &str) {
        let trimmed = text.trim_end();
        if trimmed.is_empty() {
            return;
        }
        if let Some(index) = self.top() {
            self.nodes[index].text = Some(trimmed.to_string());
        }
    }

    /// Drop childless nodes without text, bottom-up. Returns whether `index`
    /// survives.
    fn prune(&mut self, index: usize) -> bool {
        let children = std::mem::take(&mut self.nodes[index].children);
        let kept: Vec<usize> = children.into_iter().filter(|&c| self.prune(c)).collect();
        let keep = !kept.is_empty() || self.nodes[index].text.is_some();
        self.nodes[index].children = kept;
        keep
    }

    fn flatten(&mut self, index: usize, depth: u32, out: &mut Vec<Bbox>) {
        let draft = std::mem::take(&mut self.nodes[index]);
        out.push(Bbox {
            kind: draft.kind.unwrap_or(BboxKind::Page),
            bbox: draft.bbox.unwrap_or_default(),
            id: draft.id,
            text: draft.text,
            confidence: draft.confidence,
            baseline: draft.baseline,
            textangle: draft.textangle,
            style: draft.style,
            depth,
        });
        for child in draft.children {
            self.flatten(child, depth + 1, out);
        }
    }
}

fn parse_title(title: &str) -> Draft {
    let mut draft = Draft::default();

    if let Some(caps) = TITLE_BBOX.captures(title) {
        let coords: Vec<u32> = (1..=4)
            .filter_map(|i| caps.get(i).and_then(|m| m.as_str().parse().ok()))
            .collect();
        if let [x1, y1, x2, y2] = coords[..] {
            // degenerate boxes carry no position
            if x1 != x2 && y1 != y2 {
                draft.bbox = Some([x1, y1, x2, y2]);
            }
        }
    }
    draft.textangle = TITLE_TEXTANGLE
        .captures(title)
        .and_then(|c| c[1].parse().ok());
    draft.confidence = TITLE_WCONF.captures(title).and_then(|c| c[1].parse().ok());
    draft.baseline = TITLE_BASELINE.captures(title).map(|c| {
        let mut values: Vec<f64> = c[1]
            .split_whitespace()
            .filter_map(|v| v.parse().ok())
            .collect();
        if values.len() < 2 {
            values.insert(0, 0.0);
        }
        values
    });
    draft
}

/// `ocr_line` → line, `ocrx_word` → word, `ocr_carea` → column.
fn parse_class(class: &str) -> Option<BboxKind> {
    let mut parts = class.split('_');
    let (Some(_), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };
    BboxKind::parse(name)
}

impl BboxTree {
    /// Parse hOCR. Only the first page is kept; markup without a `<body>`
    /// yields an empty tree.
    #[instrument(skip_all, fields(len = hocr.len()))]
    pub fn from_hocr(hocr: &str) -> Result<Self> {
        if !BODY.is_match(hocr) {
            debug!("no body in hOCR");
            return Ok(Self::new());
        }

        let mut reader = Reader::from_str(hocr);
        reader.check_end_names(false);
        let mut walker = HocrWalker::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(element)) => {
                    let void = VOID_ELEMENTS.contains(&element.local_name().as_ref());
                    walker.open(&element);
                    if void {
                        walker.close();
                    }
                }
                Ok(Event::Empty(element)) => {
                    walker.open(&element);
                    walker.close();
                }
                Ok(Event::End(element)) => {
                    if !VOID_ELEMENTS.contains(&element.local_name().as_ref()) {
                        walker.close();
                    }
                }
                Ok(Event::Text(text)) => {
                    let decoded = text
                        .unescape()
                        .map(|t| t.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                    walker.text(&decoded);
                }
                Ok(Event::CData(data)) => {
                    walker.text(&String::from_utf8_lossy(&data));
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(ScanpaperError::TextLayer(format!(
                        "hOCR parse error at {}: {e}",
                        reader.buffer_position()
                    )));
                }
            }
        }

        let pages: Vec<usize> = walker.pages.clone();
        let Some(&first) = pages.iter().find(|&&p| walker.prune(p)) else {
            debug!("hOCR contained no text");
            return Ok(Self::new());
        };

        let mut boxes = Vec::new();
        walker.flatten(first, 0, &mut boxes);
        debug!(nodes = boxes.len(), "hOCR imported");
        Ok(Self::from_boxes(boxes))
    }

    /// Write the tree as an hOCR document.
    pub fn to_hocr(&self) -> String {
        let mut out = hocr_header();
        out.push('\n');
        // (tag, depth) of every element still open
        let mut open: Vec<(&'static str, u32)> = Vec::new();

        for bbox in self.iter() {
            if open.last().is_some_and(|&(_, d)| d >= bbox.depth) {
                close_tags(&mut out, &mut open, bbox.depth);
            } else if !open.is_empty() {
                out.push('\n');
            }

            let (tag, class) = match bbox.kind {
                BboxKind::Page => ("div", "ocr_page"),
                BboxKind::Column => ("div", "ocr_carea"),
                BboxKind::Para => ("p", "ocr_par"),
                BboxKind::Line => ("span", "ocr_line"),
                BboxKind::Word => ("span", "ocrx_word"),
                BboxKind::Header => ("span", "ocr_header"),
                BboxKind::Footer => ("span", "ocr_footer"),
                BboxKind::Caption => ("span", "ocr_caption"),
            };

            let [x1, y1, x2, y2] = bbox.bbox;
            out.push_str(&" ".repeat(2 + bbox.depth as usize));
            out.push_str(&format!("<{tag} class='{class}'"));
            if let Some(id) = &bbox.id {
                out.push_str(&format!(" id='{}'", quick_xml::escape::escape(id.as_str())));
            }
            out.push_str(&format!(" title='bbox {x1} {y1} {x2} {y2}"));
            if let Some(baseline) = &bbox.baseline {
                let coeffs: Vec<String> = baseline.iter().map(|v| format_number(*v)).collect();
                out.push_str(&format!("; baseline {}", coeffs.join(" ")));
            }
            if let Some(angle) = bbox.textangle {
                out.push_str(&format!("; textangle {angle}"));
            }
            if let Some(confidence) = bbox.confidence {
                out.push_str(&format!("; x_wconf {confidence}"));
            }
            out.push_str("'>");

            if let Some(text) = &bbox.text {
                for style in &bbox.style {
                    out.push_str(&format!("<{}>", style.tag()));
                }
                out.push_str(&quick_xml::escape::partial_escape(text.as_str()));
                for style in bbox.style.iter().rev() {
                    out.push_str(&format!("</{}>", style.tag()));
                }
            }
            open.push((tag, bbox.depth));
        }

        close_tags(&mut out, &mut open, 0);
        out.push_str(" </body>\n</html>\n");
        out
    }
}

/// Close every open element deeper than or level with `depth`. The first
/// closing tag follows the element's content on the same line.
fn close_tags(out: &mut String, open: &mut Vec<(&'static str, u32)>, depth: u32) {
    let mut first = true;
    while let Some(&(tag, d)) = open.last() {
        if d < depth {
            break;
        }
        if !first {
            out.push_str(&" ".repeat(2 + d as usize));
        }
        out.push_str(&format!("</{tag}>\n"));
        open.pop();
        first = false;
    }
}

/// Integers without a fractional part, everything else as the shortest
/// round-tripping decimal.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
