//! Upload metadata schema and the static reference data it validates against.
//!
//! Every field is optional so the extractor can fill gaps from the document
//! itself. The only structural rule is the RCS number pattern; coded fields
//! must also name an entry in the reference tables below.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FilingDeskError, Result};

/// Number of fiscal years offered for selection.
const FISCAL_YEAR_OPTIONS: i32 = 10;

/// Oldest fiscal year accepted, relative to the current year.
const FISCAL_YEAR_LOOKBACK: i32 = 15;

static RCS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][0-9]+$").expect("valid regex"));

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

/// A Luxembourg legal form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LegalForm {
    pub code: &'static str,
    pub label: &'static str,
}

/// A country a parent company may be domiciled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Country {
    /// ISO 3166-1 alpha-2 code.
    pub code: &'static str,
    pub name: &'static str,
}

const LEGAL_FORMS: &[LegalForm] = &[
    LegalForm { code: "SA", label: "Société anonyme" },
    LegalForm { code: "SARL", label: "Société à responsabilité limitée" },
    LegalForm { code: "SARL-S", label: "Société à responsabilité limitée simplifiée" },
    LegalForm { code: "SCA", label: "Société en commandite par actions" },
    LegalForm { code: "SCS", label: "Société en commandite simple" },
    LegalForm { code: "SCSP", label: "Société en commandite spéciale" },
    LegalForm { code: "SNC", label: "Société en nom collectif" },
    LegalForm { code: "SE", label: "Société européenne" },
    LegalForm { code: "SC", label: "Société civile" },
    LegalForm { code: "SCOOP", label: "Société coopérative" },
    LegalForm { code: "ASBL", label: "Association sans but lucratif" },
    LegalForm { code: "FDT", label: "Fondation" },
    LegalForm { code: "GIE", label: "Groupement d'intérêt économique" },
];

const COUNTRIES: &[Country] = &[
    Country { code: "LU", name: "Luxembourg" },
    Country { code: "BE", name: "Belgium" },
    Country { code: "FR", name: "France" },
    Country { code: "DE", name: "Germany" },
    Country { code: "NL", name: "Netherlands" },
    Country { code: "IE", name: "Ireland" },
    Country { code: "GB", name: "United Kingdom" },
    Country { code: "CH", name: "Switzerland" },
    Country { code: "IT", name: "Italy" },
    Country { code: "ES", name: "Spain" },
    Country { code: "PT", name: "Portugal" },
    Country { code: "AT", name: "Austria" },
    Country { code: "DK", name: "Denmark" },
    Country { code: "SE", name: "Sweden" },
    Country { code: "NO", name: "Norway" },
    Country { code: "FI", name: "Finland" },
    Country { code: "PL", name: "Poland" },
    Country { code: "CY", name: "Cyprus" },
    Country { code: "MT", name: "Malta" },
    Country { code: "JE", name: "Jersey" },
    Country { code: "GG", name: "Guernsey" },
    Country { code: "US", name: "United States" },
    Country { code: "CA", name: "Canada" },
    Country { code: "KY", name: "Cayman Islands" },
    Country { code: "VG", name: "British Virgin Islands" },
    Country { code: "BM", name: "Bermuda" },
    Country { code: "SG", name: "Singapore" },
    Country { code: "HK", name: "Hong Kong" },
    Country { code: "JP", name: "Japan" },
    Country { code: "CN", name: "China" },
];

/// All supported legal forms, in display order.
pub fn legal_forms() -> &'static [LegalForm] {
    LEGAL_FORMS
}

/// All supported parent-company countries, Luxembourg first.
pub fn countries() -> &'static [Country] {
    COUNTRIES
}

/// Look up a legal form by code (case-insensitive).
pub fn legal_form(code: &str) -> Option<&'static LegalForm> {
    LEGAL_FORMS.iter().find(|f| f.code.eq_ignore_ascii_case(code))
}

/// Look up a country by ISO code (case-insensitive).
pub fn country(code: &str) -> Option<&'static Country> {
    COUNTRIES.iter().find(|c| c.code.eq_ignore_ascii_case(code))
}

/// Fiscal years offered for selection: the ten years before `current_year`,
/// most recent first.
pub fn fiscal_year_options(current_year: i32) -> Vec<i32> {
    (1..=FISCAL_YEAR_OPTIONS).map(|n| current_year - n).collect()
}

/// Check an RCS number against the registry pattern (letter prefix + digits).
pub fn is_valid_rcs_number(value: &str) -> bool {
    RCS_RE.is_match(value)
}

// ---------------------------------------------------------------------------
// UploadMetadata
// ---------------------------------------------------------------------------

/// A single schema violation, keyed by the offending field's wire name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataIssue {
    pub field: &'static str,
    pub message: String,
}

impl MetadataIssue {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Optional metadata supplied alongside an uploaded filing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rcs_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiscal_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_form: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_country: Option<String>,
}

impl UploadMetadata {
    /// Trim text fields and drop empty ones; coded fields are upper-cased.
    pub fn normalized(self) -> Self {
        Self {
            rcs_number: clean(self.rcs_number).map(|s| s.to_ascii_uppercase()),
            company_name: clean(self.company_name),
            fiscal_year: self.fiscal_year,
            legal_form: clean(self.legal_form).map(|s| s.to_ascii_uppercase()),
            parent_company_name: clean(self.parent_company_name),
            parent_country: clean(self.parent_country).map(|s| s.to_ascii_uppercase()),
        }
    }

    /// Validate against the schema, collecting every violation.
    ///
    /// Expects normalized input; call [`UploadMetadata::normalized`] first.
    pub fn validate(&self, current_year: i32) -> Result<()> {
        let mut issues = Vec::new();

        if let Some(rcs) = self.rcs_number.as_ref().filter(|s| !is_valid_rcs_number(s)) {
            issues.push(MetadataIssue::new(
                "rcsNumber",
                format!("'{rcs}' must be a letter followed by digits (e.g. B123456)"),
            ));
        }

        if let Some(year) = self.fiscal_year {
            let oldest = current_year - FISCAL_YEAR_LOOKBACK;
            if year < oldest || year > current_year {
                issues.push(MetadataIssue::new(
                    "fiscalYear",
                    format!("{year} is outside {oldest}..={current_year}"),
                ));
            }
        }

        if let Some(code) = self.legal_form.as_ref().filter(|c| legal_form(c).is_none()) {
            issues.push(MetadataIssue::new(
                "legalForm",
                format!("unknown legal form '{code}'"),
            ));
        }

        if let Some(code) = self.parent_country.as_ref().filter(|c| country(c).is_none()) {
            issues.push(MetadataIssue::new(
                "parentCountry",
                format!("unknown country code '{code}'"),
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(FilingDeskError::InvalidMetadata { issues })
        }
    }

    /// True when no field was supplied.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
