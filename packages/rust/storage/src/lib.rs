//! libSQL storage layer for filings, the job queue and extracted statements.
//!
//! The [`Storage`] struct wraps a local libSQL database. All filing reads are
//! scoped by owner; a filing that belongs to someone else is reported the same
//! way as one that does not exist.
//!
//! **Access rules:**
//! - CLI submit / worker: read-write via [`Storage::open`]
//! - Reporting tools: read-only via [`Storage::open_readonly`]

mod migrations;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use filingdesk_shared::{
    Anchor, Bbox, Extraction, Filing, FilingDeskError, Job, JobStatus, LineStatus, Period,
    Result, StatementLine, StatementType, StoredLine, UploadMetadata,
};
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// Longest anchor snippet kept in the database.
const MAX_SNIPPET_CHARS: usize = 800;

/// `datum_table` value for statement lines.
const STATEMENT_LINE_TABLE: &str = "statement_line";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Submission count for one owner inside a rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionWindow {
    pub count: u32,
    /// Creation time of the oldest submission still inside the window.
    pub oldest: Option<DateTime<Utc>>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FilingDeskError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        FilingDeskError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(FilingDeskError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Filing operations
    // -----------------------------------------------------------------------

    /// Insert a new filing record.
    pub async fn insert_filing(&self, filing: &Filing) -> Result<()> {
        self.check_writable()?;
        let meta = &filing.metadata;
        self.conn
            .execute(
                "INSERT INTO filing (id, owner_id, storage_path, file_name, file_hash,
                                     rcs_number, company_name, fiscal_year, legal_form,
                                     parent_company_name, parent_country, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    filing.id.as_str(),
                    filing.owner_id.as_str(),
                    filing.storage_path.as_str(),
                    filing.file_name.as_str(),
                    filing.file_hash.as_str(),
                    meta.rcs_number.as_deref(),
                    meta.company_name.as_deref(),
                    meta.fiscal_year.map(i64::from),
                    meta.legal_form.as_deref(),
                    meta.parent_company_name.as_deref(),
                    meta.parent_country.as_deref(),
                    timestamp(&filing.created_at),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a filing visible to `owner_id`.
    pub async fn get_filing(&self, owner_id: &str, filing_id: &str) -> Result<Option<Filing>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, owner_id, storage_path, file_name, file_hash, rcs_number,
                        company_name, fiscal_year, legal_form, parent_company_name,
                        parent_country, created_at
                 FROM filing WHERE id = ?1 AND owner_id = ?2",
                params![filing_id, owner_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_filing(&row)?)),
            None => Ok(None),
        }
    }

    /// List all filings owned by `owner_id`, newest first.
    pub async fn list_filings(&self, owner_id: &str) -> Result<Vec<Filing>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, owner_id, storage_path, file_name, file_hash, rcs_number,
                        company_name, fiscal_year, legal_form, parent_company_name,
                        parent_country, created_at
                 FROM filing WHERE owner_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
                params![owner_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_filing(&row)?);
        }
        Ok(results)
    }

    /// Count `owner_id`'s filings created at or after `since`.
    pub async fn submissions_since(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
    ) -> Result<SubmissionWindow> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*), MIN(created_at) FROM filing
                 WHERE owner_id = ?1 AND created_at >= ?2",
                params![owner_id, timestamp(&since)],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let count = row.get::<u32>(0).map_err(db_err)?;
                let oldest = match row.get::<String>(1).ok() {
                    Some(s) => Some(parse_timestamp(&s)?),
                    None => None,
                };
                Ok(SubmissionWindow { count, oldest })
            }
            None => Ok(SubmissionWindow {
                count: 0,
                oldest: None,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Job queue
    // -----------------------------------------------------------------------

    /// Queue an extraction job for a filing. Returns the generated job ID.
    pub async fn enqueue_job(
        &self,
        filing_id: &str,
        storage_path: &str,
        ruleset_id: Option<&str>,
    ) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = timestamp(&Utc::now());
        self.conn
            .execute(
                "INSERT INTO job (id, filing_id, storage_path, ruleset_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'queued', ?5, ?5)",
                params![id.as_str(), filing_id, storage_path, ruleset_id, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Atomically move the oldest queued job to `processing` and return it.
    ///
    /// The select and update run as one statement, so concurrent workers can
    /// never claim the same job.
    pub async fn claim_next_job(&self) -> Result<Option<Job>> {
        self.check_writable()?;
        let now = timestamp(&Utc::now());
        let mut rows = self
            .conn
            .query(
                "UPDATE job SET status = 'processing', updated_at = ?1
                 WHERE id = (SELECT id FROM job WHERE status = 'queued'
                             ORDER BY created_at, rowid LIMIT 1)
                   AND status = 'queued'
                 RETURNING id, filing_id, storage_path, ruleset_id, status, error,
                           created_at, updated_at",
                params![now.as_str()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    /// Record a job's new status and (for failures) its error message.
    pub async fn mark_job(&self, job_id: &str, status: JobStatus, error: Option<&str>) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(&Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE job SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), error, now.as_str(), job_id],
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(FilingDeskError::NotFound(format!("job {job_id}")));
        }
        Ok(())
    }

    /// Return `processing` jobs untouched since `cutoff` to the queue.
    ///
    /// A worker that dies, or cannot record a job's outcome, leaves the job
    /// in `processing`; this makes it claimable again. Returns the number of
    /// jobs requeued.
    pub async fn requeue_stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_writable()?;
        let now = timestamp(&Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE job SET status = 'queued', updated_at = ?1
                 WHERE status = 'processing' AND updated_at < ?2",
                params![now.as_str(), timestamp(&cutoff).as_str()],
            )
            .await
            .map_err(db_err)?;
        if changed > 0 {
            tracing::warn!(jobs = changed, "requeued stale jobs");
        }
        Ok(changed)
    }

    /// Get a job by ID.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, filing_id, storage_path, ruleset_id, status, error, created_at, updated_at
                 FROM job WHERE id = ?1",
                params![job_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    /// Get the most recent job for a filing.
    pub async fn latest_job_for_filing(&self, filing_id: &str) -> Result<Option<Job>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, filing_id, storage_path, ruleset_id, status, error, created_at, updated_at
                 FROM job WHERE filing_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![filing_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Statements and extracted lines
    // -----------------------------------------------------------------------

    /// Create the balance-sheet and P&L statements for a filing if missing.
    pub async fn ensure_statements(&self, filing_id: &str) -> Result<()> {
        self.check_writable()?;
        for kind in StatementType::ALL {
            let id = Uuid::now_v7().to_string();
            self.conn
                .execute(
                    "INSERT INTO statement (id, filing_id, type, language, currency)
                     VALUES (?1, ?2, ?3, 'en', 'EUR')
                     ON CONFLICT(filing_id, type) DO NOTHING",
                    params![id.as_str(), filing_id, kind.as_str()],
                )
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    /// Look up statement IDs for a filing, keyed by type.
    async fn statement_ids(&self, filing_id: &str) -> Result<HashMap<StatementType, String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT type, id FROM statement WHERE filing_id = ?1",
                params![filing_id],
            )
            .await
            .map_err(db_err)?;

        let mut ids = HashMap::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let kind: String = row.get(0).map_err(db_err)?;
            let id: String = row.get(1).map_err(db_err)?;
            let kind = kind.parse::<StatementType>().map_err(FilingDeskError::Storage)?;
            ids.insert(kind, id);
        }
        Ok(ids)
    }

    /// Persist an extraction with its anchors and line links.
    ///
    /// Runs in a single transaction. Statements must already exist (see
    /// [`Storage::ensure_statements`]). Returns the number of lines written.
    pub async fn insert_extraction(
        &self,
        filing_id: &str,
        file_hash: Option<&str>,
        extraction: &Extraction,
    ) -> Result<usize> {
        self.check_writable()?;

        for line in &extraction.lines {
            if let Some(&bad) = line
                .anchor_indices
                .iter()
                .find(|&&i| i >= extraction.anchors.len())
            {
                return Err(FilingDeskError::Storage(format!(
                    "line '{}' references anchor #{bad} but only {} anchors were extracted",
                    line.caption,
                    extraction.anchors.len()
                )));
            }
        }

        let statements = self.statement_ids(filing_id).await?;

        let tx = self.conn.transaction().await.map_err(db_err)?;
        match write_extraction(&tx, filing_id, file_hash, extraction, &statements).await {
            Ok(()) => {
                tx.commit().await.map_err(db_err)?;
                tracing::debug!(
                    filing_id,
                    anchors = extraction.anchors.len(),
                    lines = extraction.lines.len(),
                    "stored extraction"
                );
                Ok(extraction.lines.len())
            }
            Err(e) => {
                tx.rollback().await.map_err(db_err)?;
                Err(e)
            }
        }
    }

    /// List a filing's extracted lines with their anchors, in statement order.
    pub async fn list_statement_lines(&self, filing_id: &str) -> Result<Vec<StoredLine>> {
        let mut rows = self
            .conn
            .query(
                "SELECT l.id, s.type, l.ref_code, l.caption, l.side, l.period, l.value,
                        l.unit, l.status
                 FROM statement_line l
                 JOIN statement s ON s.id = l.statement_id
                 WHERE s.filing_id = ?1
                 ORDER BY s.type, l.position",
                params![filing_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let id: String = row.get(0).map_err(db_err)?;
            let kind: String = row.get(1).map_err(db_err)?;
            let side = match row.get::<String>(4).ok() {
                Some(s) => Some(s.parse().map_err(FilingDeskError::Storage)?),
                None => None,
            };
            let status: String = row.get(8).map_err(db_err)?;
            let line = StatementLine {
                statement_type: kind.parse().map_err(FilingDeskError::Storage)?,
                ref_code: row.get::<String>(2).ok(),
                caption: row.get(3).map_err(db_err)?,
                side,
                period: Period::from_index(row.get::<i64>(5).map_err(db_err)?),
                value: row.get::<f64>(6).ok(),
                unit: row.get(7).map_err(db_err)?,
                status: status.parse::<LineStatus>().map_err(FilingDeskError::Storage)?,
                anchor_indices: Vec::new(),
            };
            results.push((id, line));
        }

        let mut stored = Vec::with_capacity(results.len());
        for (id, mut line) in results {
            let anchors = self.anchors_for(STATEMENT_LINE_TABLE, &id).await?;
            line.anchor_indices = (0..anchors.len()).collect();
            stored.push(StoredLine { id, line, anchors });
        }
        Ok(stored)
    }

    /// Anchors linked to a datum.
    async fn anchors_for(&self, datum_table: &str, datum_id: &str) -> Result<Vec<Anchor>> {
        let mut rows = self
            .conn
            .query(
                "SELECT a.source_type, a.page, a.bbox, a.snippet
                 FROM datum_anchor d
                 JOIN anchor a ON a.id = d.anchor_id
                 WHERE d.datum_table = ?1 AND d.datum_id = ?2
                 ORDER BY a.page",
                params![datum_table, datum_id],
            )
            .await
            .map_err(db_err)?;

        let mut anchors = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let bbox_json: String = row.get(2).map_err(db_err)?;
            let bbox: Bbox = serde_json::from_str(&bbox_json)
                .map_err(|e| FilingDeskError::Storage(format!("invalid bbox: {e}")))?;
            anchors.push(Anchor {
                source_type: row.get(0).map_err(db_err)?,
                page: row.get(1).map_err(db_err)?,
                bbox,
                snippet: row.get(3).map_err(db_err)?,
            });
        }
        Ok(anchors)
    }
}

/// Insert rows for an extraction on an open transaction.
async fn write_extraction(
    conn: &Connection,
    filing_id: &str,
    file_hash: Option<&str>,
    extraction: &Extraction,
    statements: &HashMap<StatementType, String>,
) -> Result<()> {
    let mut anchor_ids = Vec::with_capacity(extraction.anchors.len());
    for anchor in &extraction.anchors {
        let id = Uuid::now_v7().to_string();
        let bbox = serde_json::to_string(&anchor.bbox)
            .map_err(|e| FilingDeskError::Storage(format!("bbox encode failed: {e}")))?;
        let snippet: String = anchor.snippet.chars().take(MAX_SNIPPET_CHARS).collect();
        conn.execute(
            "INSERT INTO anchor (id, filing_id, source_type, page, bbox, snippet, file_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.as_str(),
                filing_id,
                anchor.source_type.as_str(),
                anchor.page,
                bbox,
                snippet,
                file_hash,
            ],
        )
        .await
        .map_err(db_err)?;
        anchor_ids.push(id);
    }

    for (position, line) in extraction.lines.iter().enumerate() {
        let statement_id = statements.get(&line.statement_type).ok_or_else(|| {
            FilingDeskError::Storage(format!(
                "no {} statement for filing {filing_id}",
                line.statement_type.as_str()
            ))
        })?;

        let id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO statement_line (id, statement_id, ref_code, caption, side, period,
                                         value, unit, status, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id.as_str(),
                statement_id.as_str(),
                line.ref_code.as_deref(),
                line.caption.as_str(),
                line.side.map(|s| s.as_str()),
                line.period.as_index(),
                line.value,
                line.unit.as_str(),
                line.status.as_str(),
                position as i64,
            ],
        )
        .await
        .map_err(db_err)?;

        for &idx in &line.anchor_indices {
            conn.execute(
                "INSERT INTO datum_anchor (datum_table, datum_id, anchor_id) VALUES (?1, ?2, ?3)",
                params![STATEMENT_LINE_TABLE, id.as_str(), anchor_ids[idx].as_str()],
            )
            .await
            .map_err(db_err)?;
        }
    }

    Ok(())
}

fn db_err(e: libsql::Error) -> FilingDeskError {
    FilingDeskError::Storage(e.to_string())
}

/// Fixed-width UTC timestamp so text ordering matches time ordering.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FilingDeskError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`Filing`].
fn row_to_filing(row: &libsql::Row) -> Result<Filing> {
    Ok(Filing {
        id: row.get(0).map_err(db_err)?,
        owner_id: row.get(1).map_err(db_err)?,
        storage_path: row.get(2).map_err(db_err)?,
        file_name: row.get(3).map_err(db_err)?,
        file_hash: row.get(4).map_err(db_err)?,
        metadata: UploadMetadata {
            rcs_number: row.get::<String>(5).ok(),
            company_name: row.get::<String>(6).ok(),
            fiscal_year: row.get::<i64>(7).ok().map(|v| v as i32),
            legal_form: row.get::<String>(8).ok(),
            parent_company_name: row.get::<String>(9).ok(),
            parent_country: row.get::<String>(10).ok(),
        },
        created_at: parse_timestamp(&row.get::<String>(11).map_err(db_err)?)?,
    })
}

/// Convert a database row to a [`Job`].
fn row_to_job(row: &libsql::Row) -> Result<Job> {
    let status: String = row.get(4).map_err(db_err)?;
    Ok(Job {
        id: row.get(0).map_err(db_err)?,
        filing_id: row.get(1).map_err(db_err)?,
        storage_path: row.get(2).map_err(db_err)?,
        ruleset_id: row.get::<String>(3).ok(),
        status: status.parse().map_err(FilingDeskError::Storage)?,
        error: row.get::<String>(5).ok(),
        created_at: parse_timestamp(&row.get::<String>(6).map_err(db_err)?)?,
        updated_at: parse_timestamp(&row.get::<String>(7).map_err(db_err)?)?,
    })
}
