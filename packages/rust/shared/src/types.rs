//! Domain types for filings, extraction jobs and statements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::UploadMetadata;

// ---------------------------------------------------------------------------
// FilingId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for filing identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilingId(pub Uuid);

impl FilingId {
    /// Generate a new time-sortable filing identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for FilingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FilingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for FilingId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Filing
// ---------------------------------------------------------------------------

/// An uploaded filing document and the metadata it was submitted with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filing {
    pub id: String,
    /// User who submitted the filing; all reads are scoped by this.
    pub owner_id: String,
    /// Object path inside the storage bucket (`<bucket>/<owner>/<id>/<file>`).
    pub storage_path: String,
    pub file_name: String,
    /// SHA-256 of the uploaded PDF, hex-encoded.
    pub file_hash: String,
    pub metadata: UploadMetadata,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Lifecycle of an extraction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// True for states a job never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// A queued unit of extraction work for one filing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub filing_id: String,
    pub storage_path: String,
    /// Extraction ruleset override; `None` uses the built-in caption catalog.
    pub ruleset_id: Option<String>,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// Financial statement a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    BalanceSheet,
    Pnl,
}

impl StatementType {
    pub const ALL: [StatementType; 2] = [Self::BalanceSheet, Self::Pnl];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BalanceSheet => "balance_sheet",
            Self::Pnl => "pnl",
        }
    }
}

impl std::str::FromStr for StatementType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "balance_sheet" => Ok(Self::BalanceSheet),
            "pnl" => Ok(Self::Pnl),
            other => Err(format!("unknown statement type '{other}'")),
        }
    }
}

/// Which side of a statement a line sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Assets,
    Liabilities,
    Equity,
    Revenue,
    Expense,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assets => "assets",
            Self::Liabilities => "liabilities",
            Self::Equity => "equity",
            Self::Revenue => "revenue",
            Self::Expense => "expense",
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "assets" => Ok(Self::Assets),
            "liabilities" => Ok(Self::Liabilities),
            "equity" => Ok(Self::Equity),
            "revenue" => Ok(Self::Revenue),
            "expense" => Ok(Self::Expense),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

/// Reporting period of a line. Stored as 0 (current) / 1 (previous).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Current,
    Previous,
}

impl Period {
    pub fn as_index(self) -> i64 {
        match self {
            Self::Current => 0,
            Self::Previous => 1,
        }
    }

    pub fn from_index(index: i64) -> Self {
        if index == 0 {
            Self::Current
        } else {
            Self::Previous
        }
    }
}

/// Outcome of extracting a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    #[default]
    Extracted,
    NotFound,
    Ambiguous,
}

impl LineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extracted => "extracted",
            Self::NotFound => "not_found",
            Self::Ambiguous => "ambiguous",
        }
    }
}

impl std::str::FromStr for LineStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "extracted" => Ok(Self::Extracted),
            "not_found" => Ok(Self::NotFound),
            "ambiguous" => Ok(Self::Ambiguous),
            other => Err(format!("unknown line status '{other}'")),
        }
    }
}

/// Box on a page as `[x0, y0, x1, y1]`.
pub type Bbox = [f64; 4];

/// Where an extracted datum came from in the source PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Always `"text"` for text-layer extraction.
    pub source_type: String,
    /// 1-based page number.
    pub page: u32,
    pub bbox: Bbox,
    pub snippet: String,
}

/// An extracted statement line before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementLine {
    pub statement_type: StatementType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_code: Option<String>,
    pub caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    pub period: Period,
    pub value: Option<f64>,
    /// Always `"EUR"`.
    pub unit: String,
    #[serde(default)]
    pub status: LineStatus,
    /// Indices into [`Extraction::anchors`].
    #[serde(default)]
    pub anchor_indices: Vec<usize>,
}

/// Result of running the extractor over a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub anchors: Vec<Anchor>,
    pub lines: Vec<StatementLine>,
}

/// A persisted statement line together with its resolved anchors.
#[derive(Debug, Clone, Serialize)]
pub struct StoredLine {
    pub id: String,
    pub line: StatementLine,
    pub anchors: Vec<Anchor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filing_id_roundtrip() {
        let id = FilingId::new();
        let parsed: FilingId = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_status_strings() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("done".parse::<JobStatus>().is_err());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn period_index() {
        assert_eq!(Period::Current.as_index(), 0);
        assert_eq!(Period::from_index(1), Period::Previous);
    }

    #[test]
    fn statement_line_json_shape() {
        let line = StatementLine {
            statement_type: StatementType::BalanceSheet,
            ref_code: None,
            caption: "Total Assets".into(),
            side: Some(Side::Assets),
            period: Period::Current,
            value: Some(1250.5),
            unit: "EUR".into(),
            status: LineStatus::Extracted,
            anchor_indices: vec![0],
        };
        let json = serde_json::to_value(&line).expect("serialize");
        assert_eq!(json["statement_type"], "balance_sheet");
        assert_eq!(json["side"], "assets");
        assert_eq!(json["period"], "current");
        assert!(json.get("ref_code").is_none());
    }
}
