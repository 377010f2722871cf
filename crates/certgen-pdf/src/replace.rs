//! Placeholder replacement: redact matched regions and rewrite them.
//!
//! Two passes per page, mirroring how certificate templates are laid out:
//! a line-level pass for placeholders sitting on their own line (names,
//! signatures), then a block-level pass over remaining paragraphs. Matched
//! regions are white-filled and rewritten centered in Helvetica; 18 pt for
//! participant-name keys, 14 pt otherwise, shrinking down to 6 pt when the
//! replacement does not fit.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, StringFormat};

use certgen_core::ports::RenderError;
use certgen_core::request::Placeholder;

use crate::geometry::{self, num, Rect};
use crate::metrics;
use crate::text::{self, normalize};

const MIN_FONT_SIZE: f64 = 6.0;
const NAME_KEY_MARKER: &str = "nombre_participante";

struct PlannedWrite {
    rect: Rect,
    text: String,
    size: f64,
}

/// Replace `{{key}}` tokens in `template` and return the rewritten PDF.
pub fn render(template: &[u8], placeholders: &[Placeholder]) -> Result<Vec<u8>, RenderError> {
    let mut doc =
        Document::load_mem(template).map_err(|e| RenderError::invalid_pdf(e.to_string()))?;

    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    let mut total = 0usize;
    for page_id in pages {
        total += replace_on_page(&mut doc, page_id, placeholders)
            .map_err(|e| RenderError::engine(e.to_string()))?;
    }
    tracing::debug!(replacements = total, "placeholder replacement finished");

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| RenderError::engine(e.to_string()))?;
    Ok(out)
}

fn replace_on_page(
    doc: &mut Document,
    page_id: ObjectId,
    placeholders: &[Placeholder],
) -> Result<usize, lopdf::Error> {
    let spans = text::extract_spans(doc, page_id)?;
    if spans.is_empty() {
        return Ok(0);
    }
    let lines = text::cluster_lines(spans);
    let mut consumed = vec![false; lines.len()];
    let mut redactions: Vec<Rect> = Vec::new();
    let mut writes: Vec<PlannedWrite> = Vec::new();
    let mut count = 0usize;

    // Line pass: the first line containing the token is replaced by the
    // bare value.
    for ph in placeholders {
        if ph.key.trim().is_empty() {
            continue;
        }
        let token_norm = normalize(&ph.token());
        for (idx, line) in lines.iter().enumerate() {
            if consumed[idx] || !normalize(&line.text()).contains(&token_norm) {
                continue;
            }
            let is_name = ph.key.to_lowercase().contains(NAME_KEY_MARKER);
            let (pad, size) = if is_name { (4.0, 18.0) } else { (2.0, 14.0) };
            let rect = line.bbox.padded(pad);
            redactions.push(rect);
            writes.push(PlannedWrite {
                rect,
                text: ph.value.trim().to_string(),
                size,
            });
            consumed[idx] = true;
            count += 1;
            break;
        }
    }

    // Block pass: paragraphs whose normalized text still embeds a token
    // (typically split across lines or show operators).
    let blocks = text::cluster_blocks(&lines, &consumed);
    for block in blocks {
        let block_text = block
            .line_indices
            .iter()
            .map(|&i| lines[i].text())
            .collect::<Vec<_>>()
            .join("\n");
        let block_norm = normalize(&block_text);
        let matched = placeholders.iter().any(|ph| {
            !ph.key.trim().is_empty() && block_norm.contains(&normalize(&ph.token()))
        });
        if !matched {
            continue;
        }
        let rect = block.bbox.padded(3.0);
        redactions.push(rect);
        writes.push(PlannedWrite {
            rect,
            text: substitute_tokens(&block_text, placeholders),
            size: 14.0,
        });
        for idx in block.line_indices {
            consumed[idx] = true;
        }
        count += 1;
    }

    if redactions.is_empty() {
        return Ok(0);
    }

    // Redaction removes the matched text, it does not merely paint over
    // it: the show operators behind every consumed line are blanked before
    // the white fill and the rewritten text are appended.
    let blanked: std::collections::HashSet<usize> = lines
        .iter()
        .zip(&consumed)
        .filter(|(_, used)| **used)
        .flat_map(|(line, _)| line.spans.iter().map(|span| span.op_index))
        .collect();

    let font = ensure_helvetica(doc, page_id)?;
    let mut ops: Vec<Operation> = Vec::new();
    for rect in &redactions {
        ops.extend(redact_ops(rect));
    }
    for write in &writes {
        ops.extend(write_ops(&font, write));
    }

    let data = doc.get_page_content(page_id)?;
    let mut content = Content::decode(&data)?;
    for idx in blanked {
        if let Some(op) = content.operations.get_mut(idx) {
            blank_show_operator(op);
        }
    }
    content.operations.extend(ops);
    let encoded = content.encode()?;
    doc.change_page_content(page_id, encoded)?;
    Ok(count)
}

/// Empty the string operands of a show operator, keeping its positioning
/// side effects (`'` and `"` still advance the line matrix).
fn blank_show_operator(op: &mut Operation) {
    let empty = || Object::String(Vec::new(), StringFormat::Literal);
    match op.operator.as_str() {
        "Tj" | "'" => {
            if let Some(operand) = op.operands.first_mut() {
                *operand = empty();
            }
        }
        "\"" => {
            if let Some(operand) = op.operands.get_mut(2) {
                *operand = empty();
            }
        }
        "TJ" => {
            if let Some(Object::Array(elements)) = op.operands.first_mut() {
                for element in elements.iter_mut() {
                    if matches!(element, Object::String(..)) {
                        *element = empty();
                    }
                }
            }
        }
        _ => {}
    }
}

fn substitute_tokens(text: &str, placeholders: &[Placeholder]) -> String {
    let mut out = text.to_string();
    for ph in placeholders {
        if ph.key.trim().is_empty() {
            continue;
        }
        out = out.replace(&ph.token(), &ph.value);
    }
    out
}

/// Register a WinAnsi Helvetica on the page and return its resource name.
fn ensure_helvetica(doc: &mut Document, page_id: ObjectId) -> Result<String, lopdf::Error> {
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    geometry::add_page_resource(doc, page_id, "Font", "HvF", Object::Reference(font_id))
}

/// White-fill a rectangle.
fn redact_ops(rect: &Rect) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("rg", vec![num(1.0), num(1.0), num(1.0)]),
        Operation::new(
            "re",
            vec![
                num(rect.x0),
                num(rect.y0),
                num(rect.width()),
                num(rect.height()),
            ],
        ),
        Operation::new("f", vec![]),
        Operation::new("Q", vec![]),
    ]
}

/// Centered text in `rect`, shrinking below the requested size when needed.
fn write_ops(font: &str, write: &PlannedWrite) -> Vec<Operation> {
    let lines: Vec<&str> = write.text.split('\n').collect();
    let mut size = write.size;
    while size > MIN_FONT_SIZE {
        let widest = lines
            .iter()
            .map(|line| metrics::text_width(line, size))
            .fold(0.0f64, f64::max);
        #[allow(clippy::cast_precision_loss)]
        let total_height = size * 1.2 * lines.len() as f64;
        if widest <= write.rect.width() && total_height <= write.rect.height().max(size * 1.2) {
            break;
        }
        size -= 1.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let total_height = size * 1.2 * lines.len() as f64;
    let top = write.rect.y1 - (write.rect.height() - total_height).max(0.0) / 2.0;

    let mut ops = vec![
        Operation::new("q", vec![]),
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![Object::Name(font.as_bytes().to_vec()), num(size)],
        ),
        Operation::new("rg", vec![num(0.0), num(0.0), num(0.0)]),
    ];
    for (i, line) in lines.iter().enumerate() {
        let line_width = metrics::text_width(line, size);
        let x = write.rect.x0 + (write.rect.width() - line_width).max(0.0) / 2.0;
        #[allow(clippy::cast_precision_loss)]
        let baseline = top - size * 0.85 - size * 1.2 * i as f64;
        ops.push(Operation::new(
            "Tm",
            vec![num(1.0), num(0.0), num(0.0), num(1.0), num(x), num(baseline)],
        ));
        ops.push(Operation::new(
            "Tj",
            vec![Object::String(encode_win_ansi(line), StringFormat::Literal)],
        ));
    }
    ops.push(Operation::new("ET", vec![]));
    ops.push(Operation::new("Q", vec![]));
    ops
}

/// Map text to WinAnsi bytes; characters outside Latin-1 become `?`.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(c as u32).unwrap_or(b'?'))
        .collect()
}
