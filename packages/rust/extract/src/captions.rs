//! Caption catalog and amount parsing for balance-sheet totals.
//!
//! Luxembourg annual accounts are filed in English, French, or German, so each
//! caption carries one pattern per language. Amounts use the continental
//! format: `.`, space, or no-break space between thousands and `,` before the
//! decimals.

use std::sync::LazyLock;

use filingdesk_shared::{
    Anchor, Extraction, LineStatus, Period, Side, StatementLine, StatementType,
};
use regex::Regex;
use tracing::debug;

use crate::reader::{PageText, TextBlock, split_blocks};

/// Longest snippet carried on an anchor.
const MAX_SNIPPET_CHARS: usize = 200;

/// Reporting currency for all extracted lines.
const UNIT: &str = "EUR";

/// A caption the extractor looks for.
#[derive(Debug)]
pub struct CaptionRule {
    pub key: &'static str,
    /// Normalized caption stored on the line.
    pub caption: &'static str,
    pub statement_type: StatementType,
    pub side: Side,
    pub patterns: Vec<Regex>,
}

fn rule(
    key: &'static str,
    caption: &'static str,
    side: Side,
    patterns: &[&str],
) -> CaptionRule {
    CaptionRule {
        key,
        caption,
        statement_type: StatementType::BalanceSheet,
        side,
        patterns: patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).expect("valid caption regex"))
            .collect(),
    }
}

static RULES: LazyLock<Vec<CaptionRule>> = LazyLock::new(|| {
    vec![
        rule(
            "total_assets",
            "Total Assets",
            Side::Assets,
            &[
                r"Total\s+assets",
                r"Total\s+du\s+bilan",
                r"Summe\s+der\s+Aktiva",
            ],
        ),
        rule(
            "total_equity_liabilities",
            "Total Equity and Liabilities",
            Side::Liabilities,
            &[
                r"Total\s+equity\s+and\s+liabilities",
                r"Total\s+des\s+capitaux\s+propres.*passif",
                r"Summe\s+des\s+Eigenkapitals.*Passiva",
            ],
        ),
    ]
});

/// An amount starting a token, with one thousands separator used throughout.
/// The end of the token is checked in [`amounts`], since the regex crate has
/// no lookahead.
static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\s)(-)?(\()?(\d{1,3}(?:\.\d{3})+(?:,\d+)?|\d{1,3}(?:[ \x{A0}\x{202F}]\d{3})+(?:,\d+)?|\d+(?:,\d+)?)(\))?",
    )
    .expect("valid regex")
});

/// The built-in caption catalog.
pub fn caption_rules() -> &'static [CaptionRule] {
    &RULES
}

/// A block that matched one of a rule's patterns.
#[derive(Debug, Clone, Copy)]
pub struct CaptionMatch<'a> {
    pub block: &'a TextBlock,
    /// Byte offset in `block.text` just past the matched caption.
    pub end: usize,
}

/// First block, in document order, matching any of `patterns`.
pub fn find_first<'a>(blocks: &'a [TextBlock], patterns: &[Regex]) -> Option<CaptionMatch<'a>> {
    blocks.iter().find_map(|block| {
        patterns
            .iter()
            .find_map(|p| p.find(&block.text))
            .map(|m| CaptionMatch {
                block,
                end: m.end(),
            })
    })
}

/// Parse one continental-format amount (`1.234.567,89`, `1 234`, `-12,5`).
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.' && *c != '\u{A0}' && *c != '\u{202F}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    cleaned.parse().ok()
}

/// True if an amount may end at byte `end` of `text`.
fn ends_token(text: &str, end: usize) -> bool {
    text[end..]
        .chars()
        .next()
        .is_none_or(|c| c.is_whitespace() || matches!(c, ')' | ',' | ';' | ':'))
}

/// All amounts in `text`, in order.
///
/// An amount must stand as its own token, so dates (`31.12.2024`) and
/// register numbers (`B123456`) yield nothing. Bare numbers shorter than
/// three digits (note references) and bare four-digit years are skipped.
pub fn amounts(text: &str) -> Vec<f64> {
    AMOUNT_RE
        .captures_iter(text)
        .filter_map(|caps| {
            if !ends_token(text, caps.get(0)?.end()) {
                return None;
            }
            let digits = &caps[3];
            let bare = digits.chars().all(|c| c.is_ascii_digit());
            if bare && digits.len() < 3 {
                return None;
            }
            if bare && digits.len() == 4 && (1900..=2100).contains(&digits.parse::<u32>().ok()?) {
                return None;
            }
            let value = parse_amount(digits)?;
            let negative = caps.get(1).is_some() || (caps.get(2).is_some() && caps.get(4).is_some());
            Some(if negative { -value } else { value })
        })
        .collect()
}

/// Run the built-in caption catalog over a document's pages.
///
/// For every caption:
/// - amounts after the caption on its own line give the current period and,
///   when present, the previous period (`extracted`);
/// - otherwise the last amount on the page is used (`ambiguous`);
/// - a caption with no amount anywhere yields a `not_found` line that still
///   carries its anchor;
/// - a caption absent from the document yields an unanchored `not_found` line.
pub fn extract(pages: &[PageText]) -> Extraction {
    let blocks: Vec<TextBlock> = pages.iter().flat_map(split_blocks).collect();
    let mut extraction = Extraction::default();

    for rule in caption_rules() {
        let Some(found) = find_first(&blocks, &rule.patterns) else {
            debug!(key = rule.key, "caption not found");
            extraction
                .lines
                .push(line(rule, Period::Current, None, LineStatus::NotFound, Vec::new()));
            continue;
        };

        let block = found.block;
        let anchor_idx = extraction.anchors.len();
        extraction.anchors.push(Anchor {
            source_type: "text".into(),
            page: block.page + 1,
            bbox: block.bbox,
            snippet: block.text.chars().take(MAX_SNIPPET_CHARS).collect(),
        });

        let row = block.text[found.end..].split('\n').next().unwrap_or_default();
        match amounts(row).as_slice() {
            [current, rest @ ..] => {
                extraction.lines.push(line(
                    rule,
                    Period::Current,
                    Some(*current),
                    LineStatus::Extracted,
                    vec![anchor_idx],
                ));
                if let Some(previous) = rest.first() {
                    extraction.lines.push(line(
                        rule,
                        Period::Previous,
                        Some(*previous),
                        LineStatus::Extracted,
                        vec![anchor_idx],
                    ));
                }
            }
            [] => {
                let page_value = pages
                    .iter()
                    .find(|p| p.page == block.page)
                    .and_then(|p| amounts(&p.text).last().copied());
                let status = if page_value.is_some() {
                    LineStatus::Ambiguous
                } else {
                    LineStatus::NotFound
                };
                extraction.lines.push(line(
                    rule,
                    Period::Current,
                    page_value,
                    status,
                    vec![anchor_idx],
                ));
            }
        }

        debug!(key = rule.key, page = block.page + 1, "caption matched");
    }

    extraction
}

fn line(
    rule: &CaptionRule,
    period: Period,
    value: Option<f64>,
    status: LineStatus,
    anchor_indices: Vec<usize>,
) -> StatementLine {
    StatementLine {
        statement_type: rule.statement_type,
        ref_code: None,
        caption: rule.caption.to_string(),
        side: Some(rule.side),
        period,
        value,
        unit: UNIT.to_string(),
        status,
        anchor_indices,
    }
}
