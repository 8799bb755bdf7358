//! SQL migration definitions for the FilingDesk database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: filing, job, statement, statement_line, anchor, datum_anchor",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Uploaded filings
CREATE TABLE IF NOT EXISTS filing (
    id                  TEXT PRIMARY KEY,
    owner_id            TEXT NOT NULL,
    storage_path        TEXT NOT NULL,
    file_name           TEXT NOT NULL,
    file_hash           TEXT NOT NULL,
    rcs_number          TEXT,
    company_name        TEXT,
    fiscal_year         INTEGER,
    legal_form          TEXT,
    parent_company_name TEXT,
    parent_country      TEXT,
    created_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_filing_owner ON filing(owner_id, created_at);

-- Extraction job queue
CREATE TABLE IF NOT EXISTS job (
    id           TEXT PRIMARY KEY,
    filing_id    TEXT NOT NULL REFERENCES filing(id) ON DELETE CASCADE,
    storage_path TEXT NOT NULL,
    ruleset_id   TEXT,
    status       TEXT NOT NULL DEFAULT 'queued'
                 CHECK (status IN ('queued', 'processing', 'succeeded', 'failed')),
    error        TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_status ON job(status, created_at);
CREATE INDEX IF NOT EXISTS idx_job_filing ON job(filing_id);

-- One statement per (filing, type)
CREATE TABLE IF NOT EXISTS statement (
    id        TEXT PRIMARY KEY,
    filing_id TEXT NOT NULL REFERENCES filing(id) ON DELETE CASCADE,
    type      TEXT NOT NULL CHECK (type IN ('balance_sheet', 'pnl')),
    language  TEXT NOT NULL,
    currency  TEXT NOT NULL,
    UNIQUE(filing_id, type)
);

-- Extracted lines
CREATE TABLE IF NOT EXISTS statement_line (
    id           TEXT PRIMARY KEY,
    statement_id TEXT NOT NULL REFERENCES statement(id) ON DELETE CASCADE,
    ref_code     TEXT,
    caption      TEXT NOT NULL,
    side         TEXT,
    period       INTEGER NOT NULL,
    value        REAL,
    unit         TEXT NOT NULL,
    status       TEXT NOT NULL,
    position     INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_statement_line_statement ON statement_line(statement_id);

-- Source locations in the PDF
CREATE TABLE IF NOT EXISTS anchor (
    id          TEXT PRIMARY KEY,
    filing_id   TEXT NOT NULL REFERENCES filing(id) ON DELETE CASCADE,
    source_type TEXT NOT NULL,
    page        INTEGER NOT NULL,
    bbox        TEXT NOT NULL,
    snippet     TEXT NOT NULL,
    file_hash   TEXT
);

CREATE INDEX IF NOT EXISTS idx_anchor_filing ON anchor(filing_id);

-- Datum to anchor links
CREATE TABLE IF NOT EXISTS datum_anchor (
    datum_table TEXT NOT NULL,
    datum_id    TEXT NOT NULL,
    anchor_id   TEXT NOT NULL REFERENCES anchor(id) ON DELETE CASCADE,
    PRIMARY KEY (datum_table, datum_id, anchor_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
