//! Statement extraction from filed annual accounts.
//!
//! This crate provides:
//! - [`reader`]: the reader registry, plain-text exports and block splitting
//! - [`pdf`]: the PDF text layer, with line positions
//! - [`captions`]: caption catalog and [`extract`]

pub mod captions;
pub mod pdf;
pub mod reader;

pub use captions::{CaptionMatch, CaptionRule, amounts, caption_rules, extract, find_first, parse_amount};
pub use pdf::PdfReader;
pub use reader::{
    DocumentReader, PageText, PlainTextReader, ReaderRegistry, TextBlock, TextLine, is_pdf,
    split_blocks,
};

use filingdesk_shared::{Extraction, Result};

/// Read a document with the default readers and run the caption catalog.
pub fn extract_document(bytes: &[u8]) -> Result<Extraction> {
    let pages = ReaderRegistry::new().read_pages(bytes)?;
    Ok(extract(&pages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_export_end_to_end() {
        let doc = "Cover page\u{0C}Bilan\n\nTotal du bilan 45.000,00 40.000,00\n\nTotal des capitaux propres et du passif 45.000,00";
        let extraction = extract_document(doc.as_bytes()).expect("extract");

        assert_eq!(extraction.anchors.len(), 2);
        assert!(extraction.anchors.iter().all(|a| a.page == 2));
        let values: Vec<Option<f64>> = extraction.lines.iter().map(|l| l.value).collect();
        assert_eq!(values, vec![Some(45_000.0), Some(40_000.0), Some(45_000.0)]);
    }
}
