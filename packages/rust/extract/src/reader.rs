//! Document readers: turn uploaded bytes into per-page text and text blocks.
//!
//! Readers are tried in registry order; the first whose `detect` accepts the
//! bytes handles the document.

use filingdesk_shared::{Bbox, FilingDeskError, Result};
use tracing::debug;

use crate::pdf::PdfReader;

/// Leading bytes of every PDF file.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Page separator understood by [`PlainTextReader`].
const FORM_FEED: char = '\u{0C}';

/// A positioned line of page text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    /// `[x0, y0, x1, y1]` in 0..1 page units, origin top-left.
    pub bbox: Bbox,
}

/// Text of a single page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// 0-based page index.
    pub page: u32,
    pub text: String,
    /// Positioned lines, top to bottom. Empty for readers without layout.
    pub lines: Vec<TextLine>,
}

impl PageText {
    /// A page with text but no layout.
    pub fn plain(page: u32, text: impl Into<String>) -> Self {
        Self {
            page,
            text: text.into(),
            lines: Vec::new(),
        }
    }

    /// A page built from positioned lines; `text` is the lines joined by `\n`.
    pub fn from_lines(page: u32, lines: Vec<TextLine>) -> Self {
        let text = lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self { page, text, lines }
    }
}

/// A run of consecutive lines on a page, separated from its neighbours by
/// whitespace.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    /// 0-based page index.
    pub page: u32,
    /// Normalized extent. Pages without layout use
    /// `[0, first_line / lines, 1, end_line / lines]`.
    pub bbox: Bbox,
    pub text: String,
}

/// Turns raw document bytes into page text.
pub trait DocumentReader: Send + Sync {
    /// Returns `true` if this reader can handle the bytes.
    fn detect(&self, bytes: &[u8]) -> bool;

    /// Extract the text of every page, in page order.
    fn read_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>>;

    /// Human-readable reader name for tracing.
    fn name(&self) -> &str;
}

/// True if the bytes start with the PDF header.
pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

// ---------------------------------------------------------------------------
// Plain text
// ---------------------------------------------------------------------------

/// Reads UTF-8 text exports, with form feeds separating pages.
pub struct PlainTextReader;

impl DocumentReader for PlainTextReader {
    fn detect(&self, bytes: &[u8]) -> bool {
        !is_pdf(bytes) && std::str::from_utf8(bytes).is_ok()
    }

    fn read_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| FilingDeskError::parse(format!("text export is not UTF-8: {e}")))?;

        Ok(text
            .split(FORM_FEED)
            .enumerate()
            .map(|(i, page)| PageText::plain(i as u32, page))
            .collect())
    }

    fn name(&self) -> &str {
        "text"
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered readers in priority order.
pub struct ReaderRegistry {
    readers: Vec<Box<dyn DocumentReader>>,
}

impl ReaderRegistry {
    /// Create a registry with the built-in readers (PDF first).
    pub fn new() -> Self {
        Self {
            readers: vec![Box::new(PdfReader), Box::new(PlainTextReader)],
        }
    }

    /// Find the reader for the given bytes.
    pub fn detect(&self, bytes: &[u8]) -> Option<&dyn DocumentReader> {
        self.readers
            .iter()
            .find(|r| r.detect(bytes))
            .map(|r| r.as_ref())
    }

    /// Detect and read in one step.
    pub fn read_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>> {
        let reader = self
            .detect(bytes)
            .ok_or_else(|| FilingDeskError::parse("unsupported document format"))?;
        debug!(reader = reader.name(), bytes = bytes.len(), "reading document");
        reader.read_pages(bytes)
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Vertical gap, in line heights, that separates two positioned blocks.
const BLOCK_GAP_LINES: f64 = 1.0;

/// Split a page into blocks.
///
/// Positioned pages break where the gap between consecutive lines exceeds
/// the height of the line above; plain pages break at blank lines.
pub fn split_blocks(page: &PageText) -> Vec<TextBlock> {
    if !page.lines.is_empty() {
        return split_positioned(page.page, &page.lines);
    }

    let lines: Vec<&str> = page.text.lines().collect();
    let total = lines.len().max(1) as f64;

    let mut blocks = Vec::new();
    let mut start: Option<usize> = None;

    for (i, line) in lines.iter().enumerate() {
        match (line.trim().is_empty(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                blocks.push(make_block(page.page, &lines[s..i], s, i, total));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        blocks.push(make_block(page.page, &lines[s..], s, lines.len(), total));
    }

    blocks
}

fn split_positioned(page: u32, lines: &[TextLine]) -> Vec<TextBlock> {
    let mut groups: Vec<&[TextLine]> = Vec::new();
    let mut start = 0;
    for i in 1..lines.len() {
        let above = &lines[i - 1];
        let height = above.bbox[3] - above.bbox[1];
        let gap = lines[i].bbox[1] - above.bbox[3];
        if gap > height * BLOCK_GAP_LINES {
            groups.push(&lines[start..i]);
            start = i;
        }
    }
    if start < lines.len() {
        groups.push(&lines[start..]);
    }

    groups
        .into_iter()
        .map(|group| {
            let x0 = group.iter().map(|l| l.bbox[0]).fold(1.0, f64::min);
            let x1 = group.iter().map(|l| l.bbox[2]).fold(0.0, f64::max);
            let y0 = group.iter().map(|l| l.bbox[1]).fold(1.0, f64::min);
            let y1 = group.iter().map(|l| l.bbox[3]).fold(0.0, f64::max);
            TextBlock {
                page,
                bbox: [x0, y0, x1, y1],
                text: group
                    .iter()
                    .map(|l| l.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            }
        })
        .collect()
}

fn make_block(page: u32, lines: &[&str], start: usize, end: usize, total: f64) -> TextBlock {
    TextBlock {
        page,
        bbox: [0.0, start as f64 / total, 1.0, end as f64 / total],
        text: lines.join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::{PageFont, pdf};

    #[test]
    fn splits_blocks_on_blank_lines() {
        let page = PageText::plain(
            2,
            "Balance sheet\n\nTotal assets 1.000\nFixed assets 500\n\n\nNotes",
        );
        let blocks = split_blocks(&page);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].text, "Balance sheet");
        assert_eq!(blocks[1].text, "Total assets 1.000\nFixed assets 500");
        assert_eq!(blocks[1].page, 2);
        assert_eq!(blocks[1].bbox, [0.0, 2.0 / 7.0, 1.0, 4.0 / 7.0]);
        assert_eq!(blocks[2].bbox[3], 1.0);
    }

    fn line(text: &str, top: f64, bottom: f64) -> TextLine {
        TextLine {
            text: text.into(),
            bbox: [0.1, top, 0.6, bottom],
        }
    }

    #[test]
    fn positioned_lines_split_on_vertical_gaps() {
        let page = PageText::from_lines(
            1,
            vec![
                line("BALANCE SHEET", 0.05, 0.06),
                line("Total assets 1.000.000", 0.10, 0.11),
                line("Subscribed capital 250.000", 0.112, 0.122),
                line("Notes", 0.30, 0.31),
            ],
        );
        let blocks = split_blocks(&page);

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1].text, "Total assets 1.000.000\nSubscribed capital 250.000");
        assert_eq!(blocks[1].bbox, [0.1, 0.10, 0.6, 0.122]);
        assert_eq!(blocks[2].page, 1);
        assert_eq!(page.text.lines().count(), 4);
    }

    #[test]
    fn pdf_pages_split_into_positioned_blocks() {
        let bytes = pdf(&[(
            PageFont::WinAnsi,
            &[
                (50, 800, "BALANCE SHEET"),
                (50, 770, "Total assets"),
                (300, 770, "1.000.000"),
                (50, 758, "Subscribed capital"),
                (300, 758, "250.000"),
                (50, 720, "Total equity and liabilities"),
                (300, 720, "1.000.000"),
            ],
        )]);
        let pages = ReaderRegistry::new().read_pages(&bytes).unwrap();
        let blocks = split_blocks(&pages[0]);

        let texts: Vec<&str> = blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "BALANCE SHEET",
                "Total assets 1.000.000\nSubscribed capital 250.000",
                "Total equity and liabilities 1.000.000",
            ]
        );
        assert!((blocks[1].bbox[0] - 50.0 / 595.0).abs() < 1e-6);
        assert!((blocks[1].bbox[1] - 62.0 / 842.0).abs() < 1e-6);
        assert!((blocks[1].bbox[3] - 84.0 / 842.0).abs() < 1e-6);
        assert!(blocks[0].bbox[3] < blocks[1].bbox[1]);
    }

    #[test]
    fn empty_page_has_no_blocks() {
        let page = PageText::plain(0, "  \n\n");
        assert!(split_blocks(&page).is_empty());
    }

    #[test]
    fn registry_picks_reader_by_content() {
        let registry = ReaderRegistry::new();
        assert_eq!(registry.detect(b"%PDF-1.7\n...").map(|r| r.name()), Some("pdf"));
        assert_eq!(registry.detect(b"Total assets").map(|r| r.name()), Some("text"));
        assert!(registry.detect(&[0xff, 0xfe, 0x00, 0x9f]).is_none());
    }

    #[test]
    fn plain_text_pages_split_on_form_feed() {
        let pages = PlainTextReader
            .read_pages("cover\u{0C}Total assets 12.500".as_bytes())
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].page, 1);
        assert_eq!(pages[1].text, "Total assets 12.500");
    }

    #[test]
    fn broken_pdf_is_a_parse_error() {
        let err = ReaderRegistry::new()
            .read_pages(b"%PDF-1.4 truncated")
            .unwrap_err();
        assert!(matches!(err, FilingDeskError::Parse { .. }));
    }

    #[test]
    fn unsupported_bytes_are_rejected() {
        let err = ReaderRegistry::new().read_pages(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(err.to_string().contains("unsupported document format"));
    }
}
