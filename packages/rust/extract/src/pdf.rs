//! PDF text layer with line positions.
//!
//! Content streams are walked operator by operator so every text run keeps
//! the point it was drawn at. Runs sharing a baseline are joined into one
//! [`TextLine`], which lets [`split_blocks`](crate::split_blocks) cut blocks
//! on vertical gaps and lets captions be paired with the figures printed on
//! the same row.

use std::collections::BTreeMap;

use filingdesk_shared::{Bbox, FilingDeskError, Result};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Encoding, Object, ObjectId};
use tracing::{debug, warn};

use crate::reader::{DocumentReader, PageText, TextLine, is_pdf};

/// A4 portrait, used when neither the page nor its parents carry a MediaBox.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 595.0, 842.0];

/// Baselines closer than this fraction of the font size share a line.
const SAME_LINE_TOLERANCE: f32 = 0.3;

/// Average glyph advance as a fraction of the font size. lopdf exposes no
/// font metrics, so run widths are estimated.
const AVG_GLYPH_WIDTH: f32 = 0.5;

/// Horizontal gap, in font sizes, above which adjacent runs get a space.
const WORD_GAP: f32 = 0.2;

/// TJ adjustments below this (thousandths of an em) read as a word break.
const TJ_SPACE_THRESHOLD: f32 = -100.0;

/// Parent chain depth at which MediaBox lookup gives up.
const MAX_PAGE_TREE_DEPTH: usize = 32;

/// Reads the text layer of a PDF with `lopdf`.
pub struct PdfReader;

impl DocumentReader for PdfReader {
    fn detect(&self, bytes: &[u8]) -> bool {
        is_pdf(bytes)
    }

    fn read_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>> {
        let doc = Document::load_mem(bytes)
            .map_err(|e| FilingDeskError::parse(format!("invalid PDF: {e}")))?;

        let pages = doc.get_pages();
        debug!(pages = pages.len(), "loaded PDF");

        let mut out = Vec::with_capacity(pages.len());
        for (&number, &page_id) in &pages {
            let index = number.saturating_sub(1);
            // A single undecodable page (odd fonts, inline images) should not
            // sink the rest of the document.
            let page = match read_page(&doc, page_id) {
                Ok(lines) => PageText::from_lines(index, lines),
                Err(e) => {
                    warn!(page = number, error = %e, "page text extraction failed");
                    PageText::plain(index, "")
                }
            };
            out.push(page);
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "pdf"
    }
}

/// One `Tj`/`TJ` worth of text at its starting point, in user space.
#[derive(Debug, Clone)]
struct Run {
    x: f32,
    y: f32,
    size: f32,
    text: String,
}

impl Run {
    fn end_x(&self) -> f32 {
        self.x + self.text.chars().count() as f32 * self.size * AVG_GLYPH_WIDTH
    }
}

fn read_page(doc: &Document, page_id: ObjectId) -> lopdf::Result<Vec<TextLine>> {
    let encodings = doc
        .get_page_fonts(page_id)?
        .into_iter()
        .map(|(name, font)| font.get_font_encoding(doc).map(|encoding| (name, encoding)))
        .collect::<lopdf::Result<BTreeMap<Vec<u8>, Encoding>>>()?;

    let content = Content::decode(&doc.get_page_content(page_id)?)?;
    let runs = collect_runs(&content.operations, &encodings)?;
    Ok(group_lines(runs, media_box(doc, page_id)))
}

/// Text state needed to place runs. Rotation and skew in `Tm` are ignored.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    line_x: f32,
    line_y: f32,
    x: f32,
    y: f32,
    scale_x: f32,
    scale_y: f32,
    leading: f32,
    size: f32,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            line_x: 0.0,
            line_y: 0.0,
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            leading: 0.0,
            size: 0.0,
        }
    }
}

impl Cursor {
    fn begin_text(&mut self) {
        *self = Self {
            leading: self.leading,
            size: self.size,
            ..Self::default()
        };
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_x += tx * self.scale_x;
        self.line_y += ty * self.scale_y;
        self.x = self.line_x;
        self.y = self.line_y;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    fn font_size(&self) -> f32 {
        (self.size * self.scale_y.abs()).max(1.0)
    }
}

fn collect_runs(
    operations: &[Operation],
    encodings: &BTreeMap<Vec<u8>, Encoding>,
) -> lopdf::Result<Vec<Run>> {
    let mut cursor = Cursor::default();
    let mut encoding: Option<&Encoding> = None;
    let mut runs = Vec::new();

    for op in operations {
        let operand = |i: usize| op.operands.get(i).and_then(|o| o.as_float().ok()).unwrap_or(0.0);
        let shown = match op.operator.as_str() {
            "BT" => {
                cursor.begin_text();
                None
            }
            "Tf" => {
                encoding = op
                    .operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .and_then(|name| encodings.get(name));
                cursor.size = operand(1);
                None
            }
            "TL" => {
                cursor.leading = operand(0);
                None
            }
            "Td" => {
                cursor.move_line(operand(0), operand(1));
                None
            }
            "TD" => {
                cursor.leading = -operand(1);
                cursor.move_line(operand(0), operand(1));
                None
            }
            "Tm" => {
                cursor.scale_x = operand(0);
                cursor.scale_y = operand(3);
                cursor.line_x = operand(4);
                cursor.line_y = operand(5);
                cursor.x = cursor.line_x;
                cursor.y = cursor.line_y;
                None
            }
            "T*" => {
                cursor.next_line();
                None
            }
            "Tj" | "TJ" => op.operands.first(),
            "'" => {
                cursor.next_line();
                op.operands.first()
            }
            "\"" => {
                cursor.next_line();
                op.operands.get(2)
            }
            _ => None,
        };

        let Some(shown) = shown else { continue };
        let Some(encoding) = encoding else {
            debug!(operator = %op.operator, "text shown without a known font");
            continue;
        };

        let mut text = String::new();
        decode_shown(encoding, shown, &mut text)?;
        if text.is_empty() {
            continue;
        }
        let run = Run {
            x: cursor.x,
            y: cursor.y,
            size: cursor.font_size(),
            text,
        };
        cursor.x = run.end_x();
        runs.push(run);
    }

    Ok(runs)
}

fn decode_shown(encoding: &Encoding, object: &Object, out: &mut String) -> lopdf::Result<()> {
    match object {
        Object::String(bytes, _) => out.push_str(&Document::decode_text(encoding, bytes)?),
        Object::Array(items) => {
            for item in items {
                match item {
                    Object::Integer(_) | Object::Real(_) => {
                        if item.as_float()? < TJ_SPACE_THRESHOLD && !out.ends_with(' ') {
                            out.push(' ');
                        }
                    }
                    other => decode_shown(encoding, other, out)?,
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Join runs into lines, top to bottom, with bboxes normalized to the page.
fn group_lines(mut runs: Vec<Run>, media: [f32; 4]) -> Vec<TextLine> {
    runs.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

    let mut rows: Vec<Vec<Run>> = Vec::new();
    for run in runs {
        match rows.last_mut() {
            Some(row) if (row[0].y - run.y).abs() <= SAME_LINE_TOLERANCE * row[0].size.max(run.size) => {
                row.push(run)
            }
            _ => rows.push(vec![run]),
        }
    }

    rows.into_iter()
        .filter_map(|mut row| {
            row.sort_by(|a, b| a.x.total_cmp(&b.x));
            let text = join_runs(&row);
            if text.trim().is_empty() {
                return None;
            }
            Some(TextLine {
                text,
                bbox: line_bbox(&row, media),
            })
        })
        .collect()
}

fn join_runs(row: &[Run]) -> String {
    let mut text = String::new();
    let mut prev: Option<&Run> = None;
    for run in row {
        if let Some(prev) = prev {
            let gap = run.x - prev.end_x();
            if gap > WORD_GAP * run.size && !text.ends_with(' ') && !run.text.starts_with(' ') {
                text.push(' ');
            }
        }
        text.push_str(&run.text);
        prev = Some(run);
    }
    text.trim().to_string()
}

/// Row extent as `[x0, y0, x1, y1]` in 0..1 page units, origin top-left.
fn line_bbox(row: &[Run], media: [f32; 4]) -> Bbox {
    let [mx0, my0, mx1, my1] = media;
    let width = (mx1 - mx0).max(1.0);
    let height = (my1 - my0).max(1.0);

    let x0 = row.iter().map(|r| r.x).fold(f32::INFINITY, f32::min);
    let x1 = row.iter().map(Run::end_x).fold(f32::NEG_INFINITY, f32::max);
    let baseline = row.iter().map(|r| r.y).fold(f32::INFINITY, f32::min);
    let top = row
        .iter()
        .map(|r| r.y + r.size)
        .fold(f32::NEG_INFINITY, f32::max);

    let norm = |v: f32| f64::from(v).clamp(0.0, 1.0);
    [
        norm((x0 - mx0) / width),
        norm((my1 - top) / height),
        norm((x1 - mx0) / width),
        norm((my1 - baseline) / height),
    ]
}

/// The page's MediaBox, inherited through the page tree when absent.
fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let mut id = page_id;
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        let Ok(dict) = doc.get_dictionary(id) else { break };
        if let Ok(values) = dict.get(b"MediaBox").and_then(Object::as_array) {
            let nums: Vec<f32> = values.iter().filter_map(|v| v.as_float().ok()).collect();
            if let [x0, y0, x1, y1] = nums[..] {
                return [x0, y0, x1, y1];
            }
        }
        match dict.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => id = parent,
            Err(_) => break,
        }
    }
    DEFAULT_MEDIA_BOX
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Small generated PDFs for reader and extraction tests.

    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, StringFormat, dictionary};

    /// A text item drawn at `(x, y)` in points, origin bottom-left.
    pub type Item<'a> = (i64, i64, &'a str);

    /// Font encoding used for a fixture page.
    #[derive(Debug, Clone, Copy)]
    pub enum PageFont {
        WinAnsi,
        /// Identity-H without a ToUnicode map: lopdf cannot decode it.
        IdentityNoCmap,
    }

    /// Build an A4 PDF, one page per entry, 10pt text placed with `Td`.
    pub fn pdf(pages: &[(PageFont, &[Item])]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for (font, items) in pages {
            let font_dict = match font {
                PageFont::WinAnsi => dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                    "Encoding" => "WinAnsiEncoding",
                },
                PageFont::IdentityNoCmap => dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type0",
                    "BaseFont" => "NotoSans",
                    "Encoding" => "Identity-H",
                },
            };

            let mut operations = vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), Object::Integer(10)]),
            ];
            let (mut x, mut y) = (0, 0);
            for &(ix, iy, text) in *items {
                operations.push(Operation::new(
                    "Td",
                    vec![Object::Integer(ix - x), Object::Integer(iy - y)],
                ));
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::String(text.as_bytes().to_vec(), StringFormat::Literal)],
                ));
                (x, y) = (ix, iy);
            }
            operations.push(Operation::new("ET", vec![]));

            let content = Content { operations }.encode().unwrap();
            let content_id = doc.add_object(lopdf::Stream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_dict },
                },
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => Object::Integer(count),
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(595),
                    Object::Integer(842),
                ],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }
}
