//! Positioned text extraction from content streams.
//!
//! Walks the page operators tracking the text matrix and the active font
//! size, turning show operators into positioned spans. Spans are clustered
//! into lines by baseline proximity, and lines into blocks by vertical
//! gaps. String bytes are decoded as Latin-1 (UTF-16BE when a BOM is
//! present), which covers the standard-font templates this engine targets.

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};

use crate::geometry::{number, Rect};
use crate::metrics;

/// One run of shown text with its device-space position.
#[derive(Debug, Clone)]
pub struct TextSpan {
    pub text: String,
    /// Baseline start.
    pub x: f64,
    /// Baseline height.
    pub y: f64,
    /// Effective font size in points.
    pub size: f64,
    /// Index of the show operator in the page's decoded content stream.
    pub op_index: usize,
}

impl TextSpan {
    #[must_use]
    pub fn width(&self) -> f64 {
        metrics::text_width(&self.text, self.size)
    }

    /// Approximate glyph box around the baseline.
    #[must_use]
    pub fn bbox(&self) -> Rect {
        Rect::new(
            self.x,
            self.y - 0.21 * self.size,
            self.x + self.width(),
            self.y + 0.72 * self.size,
        )
    }
}

/// Spans sharing a baseline, ordered left to right.
#[derive(Debug, Clone)]
pub struct TextLine {
    pub spans: Vec<TextSpan>,
    pub bbox: Rect,
}

impl TextLine {
    /// Visible text with single spaces where span gaps suggest them.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        let mut last_end: Option<f64> = None;
        for span in &self.spans {
            if let Some(end) = last_end {
                if span.x - end > span.size * 0.2 && !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            out.push_str(&span.text);
            last_end = Some(span.x + span.width());
        }
        out
    }

    fn dominant_size(&self) -> f64 {
        self.spans
            .iter()
            .map(|s| s.size)
            .fold(0.0, f64::max)
            .max(1.0)
    }
}

/// Consecutive lines separated by at most a line-height of vertical gap.
#[derive(Debug)]
pub struct TextBlock {
    pub line_indices: Vec<usize>,
    pub bbox: Rect,
}

/// Strip all whitespace; the normal form used for placeholder matching.
#[must_use]
pub fn normalize(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[derive(Clone, Copy)]
struct Matrix {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
}

impl Matrix {
    const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    /// `T(tx, ty) × self`, the `Td` update rule.
    fn pre_translate(self, tx: f64, ty: f64) -> Self {
        Self {
            e: tx * self.a + ty * self.c + self.e,
            f: tx * self.b + ty * self.d + self.f,
            ..self
        }
    }
}

/// Extract positioned spans from one page.
pub fn extract_spans(doc: &Document, page_id: ObjectId) -> Result<Vec<TextSpan>, lopdf::Error> {
    let data = doc.get_page_content(page_id)?;
    let content = Content::decode(&data)?;

    let mut spans = Vec::new();
    let mut tm = Matrix::IDENTITY;
    let mut tlm = Matrix::IDENTITY;
    let mut size = 0.0f64;
    let mut leading = 0.0f64;

    for (op_index, op) in content.operations.iter().enumerate() {
        let operands = &op.operands;
        match op.operator.as_str() {
            "BT" => {
                tm = Matrix::IDENTITY;
                tlm = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(s) = operands.get(1).and_then(number) {
                    size = s;
                }
            }
            "TL" => {
                if let Some(l) = operands.first().and_then(number) {
                    leading = l;
                }
            }
            "Td" | "TD" => {
                let tx = operands.first().and_then(number).unwrap_or(0.0);
                let ty = operands.get(1).and_then(number).unwrap_or(0.0);
                if op.operator == "TD" {
                    leading = -ty;
                }
                tlm = tlm.pre_translate(tx, ty);
                tm = tlm;
            }
            "T*" => {
                tlm = tlm.pre_translate(0.0, -leading);
                tm = tlm;
            }
            "Tm" => {
                if operands.len() == 6 {
                    let v: Vec<f64> = operands.iter().filter_map(number).collect();
                    if v.len() == 6 {
                        tlm = Matrix {
                            a: v[0],
                            b: v[1],
                            c: v[2],
                            d: v[3],
                            e: v[4],
                            f: v[5],
                        };
                        tm = tlm;
                    }
                }
            }
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    show_text(&mut spans, &mut tm, size, bytes, op_index);
                }
            }
            "'" => {
                tlm = tlm.pre_translate(0.0, -leading);
                tm = tlm;
                if let Some(Object::String(bytes, _)) = operands.first() {
                    show_text(&mut spans, &mut tm, size, bytes, op_index);
                }
            }
            "\"" => {
                tlm = tlm.pre_translate(0.0, -leading);
                tm = tlm;
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    show_text(&mut spans, &mut tm, size, bytes, op_index);
                }
            }
            "TJ" => {
                if let Some(Object::Array(elements)) = operands.first() {
                    for element in elements {
                        match element {
                            Object::String(bytes, _) => {
                                show_text(&mut spans, &mut tm, size, bytes, op_index);
                            }
                            other => {
                                if let Some(adjust) = number(other) {
                                    let shift = -adjust / 1000.0 * size;
                                    tm.e += shift * tm.a;
                                    tm.f += shift * tm.b;
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(spans)
}

fn show_text(
    spans: &mut Vec<TextSpan>,
    tm: &mut Matrix,
    size: f64,
    bytes: &[u8],
    op_index: usize,
) {
    let text = decode_pdf_string(bytes);
    if text.is_empty() {
        return;
    }
    let scale = tm.a.hypot(tm.b);
    let scale = if scale > 0.0 { scale } else { 1.0 };
    let vertical = tm.d.hypot(tm.c);
    let effective_size = size * if vertical > 0.0 { vertical } else { 1.0 };
    let width = metrics::text_width(&text, size) * scale;
    spans.push(TextSpan {
        text,
        x: tm.e,
        y: tm.f,
        size: effective_size.max(1.0),
        op_index,
    });
    tm.e += width * sign(tm.a);
    if scale > 0.0 {
        tm.f += width / scale * tm.b;
    }
}

fn sign(v: f64) -> f64 {
    if v < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Decode PDF string bytes: UTF-16BE with a BOM, Latin-1 otherwise.
#[must_use]
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Cluster spans into baseline-ordered lines (top of page first).
#[must_use]
pub fn cluster_lines(mut spans: Vec<TextSpan>) -> Vec<TextLine> {
    spans.sort_by(|a, b| {
        b.y.partial_cmp(&a.y)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut lines: Vec<TextLine> = Vec::new();
    for span in spans {
        let matched = lines
            .iter_mut()
            .find(|line| (line.spans[0].y - span.y).abs() <= 2.0);
        match matched {
            Some(line) => {
                line.bbox = line.bbox.union(&span.bbox());
                line.spans.push(span);
            }
            None => {
                let bbox = span.bbox();
                lines.push(TextLine {
                    spans: vec![span],
                    bbox,
                });
            }
        }
    }
    for line in &mut lines {
        line.spans.sort_by(|a, b| {
            a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    lines
}

/// Group non-skipped lines into blocks by vertical proximity.
///
/// `skip[i]` excludes a line from every block (already consumed by the
/// line-level pass).
#[must_use]
pub fn cluster_blocks(lines: &[TextLine], skip: &[bool]) -> Vec<TextBlock> {
    let mut blocks: Vec<TextBlock> = Vec::new();
    let mut current: Option<TextBlock> = None;
    let mut prev_bottom = 0.0f64;

    for (idx, line) in lines.iter().enumerate() {
        if skip.get(idx).copied().unwrap_or(false) {
            continue;
        }
        let gap_limit = line.dominant_size() * 1.6;
        let starts_new = match &current {
            None => true,
            Some(_) => prev_bottom - line.bbox.y1 > gap_limit,
        };
        if starts_new {
            if let Some(done) = current.take() {
                blocks.push(done);
            }
            current = Some(TextBlock {
                line_indices: vec![idx],
                bbox: line.bbox,
            });
        } else if let Some(block) = &mut current {
            block.line_indices.push(idx);
            block.bbox = block.bbox.union(&line.bbox);
        }
        prev_bottom = line.bbox.y0;
    }
    if let Some(done) = current {
        blocks.push(done);
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, x: f64, y: f64) -> TextSpan {
        TextSpan {
            text: text.to_string(),
            x,
            y,
            size: 12.0,
            op_index: 0,
        }
    }

    #[test]
    fn latin1_and_utf16_strings_decode() {
        assert_eq!(decode_pdf_string(b"Hello"), "Hello");
        assert_eq!(decode_pdf_string(&[0xE9]), "é");
        let utf16 = [0xFE, 0xFF, 0x00, 0x41, 0x00, 0x42];
        assert_eq!(decode_pdf_string(&utf16), "AB");
    }

    #[test]
    fn lines_cluster_by_baseline() {
        let spans = vec![
            span("world", 60.0, 700.0),
            span("hello", 10.0, 700.5),
            span("below", 10.0, 650.0),
        ];
        let lines = cluster_lines(spans);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text(), "hello world");
        assert_eq!(lines[1].text(), "below");
    }

    #[test]
    fn blocks_split_on_large_gaps() {
        let spans = vec![
            span("title", 10.0, 700.0),
            span("body one", 10.0, 686.0),
            span("footer", 10.0, 100.0),
        ];
        let lines = cluster_lines(spans);
        let skip = vec![false; lines.len()];
        let blocks = cluster_blocks(&lines, &skip);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].line_indices, vec![0, 1]);
        assert_eq!(blocks[1].line_indices, vec![2]);
    }

    #[test]
    fn consumed_lines_are_excluded_from_blocks() {
        let spans = vec![span("a", 10.0, 700.0), span("b", 10.0, 686.0)];
        let lines = cluster_lines(spans);
        let blocks = cluster_blocks(&lines, &[true, false]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].line_indices, vec![1]);
    }

    #[test]
    fn normalize_strips_all_whitespace() {
        assert_eq!(normalize(" {{ nombre }} \n"), "{{nombre}}");
    }
}
