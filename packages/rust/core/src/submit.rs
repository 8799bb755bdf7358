//! Filing submission: validate → rate limit → upload → record → enqueue.

use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use filingdesk_bucket::BucketClient;
use filingdesk_extract::is_pdf;
use filingdesk_shared::{Filing, FilingDeskError, FilingId, Result, UploadMetadata};
use filingdesk_storage::Storage;

use crate::limiter::SubmissionLimiter;

/// Content type recorded for uploaded filings.
const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A user's request to file a document.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Acting user; empty means unauthenticated.
    pub owner_id: String,
    pub file_path: PathBuf,
    pub metadata: UploadMetadata,
    pub ruleset_id: Option<String>,
}

/// What a successful submission created.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub filing_id: FilingId,
    pub job_id: String,
    pub storage_path: String,
    pub file_hash: String,
    pub bytes: usize,
}

/// Submit a filing on behalf of `request.owner_id`.
#[instrument(skip_all, fields(owner = %request.owner_id, file = %request.file_path.display()))]
pub async fn submit_filing(
    storage: &Storage,
    bucket: &BucketClient,
    limiter: &SubmissionLimiter,
    request: SubmitRequest,
) -> Result<SubmitReceipt> {
    let owner = request.owner_id.trim();
    if owner.is_empty() {
        return Err(FilingDeskError::Unauthorized(
            "no acting user; pass --user or set FILINGDESK_USER".into(),
        ));
    }

    let now = Utc::now();
    let metadata = request.metadata.normalized();
    metadata.validate(now.year())?;

    limiter.check(storage, owner, now).await?;

    let bytes = tokio::fs::read(&request.file_path)
        .await
        .map_err(|e| FilingDeskError::io(&request.file_path, e))?;
    if !is_pdf(&bytes) {
        return Err(FilingDeskError::validation(format!(
            "{} is not a PDF document",
            request.file_path.display()
        )));
    }

    let file_hash = sha256_hex(&bytes);
    let file_name = object_file_name(&request.file_path);
    let filing_id = FilingId::new();
    let size = bytes.len();

    let object_path = format!("{owner}/{filing_id}/{file_name}");
    let storage_path = bucket.upload(&object_path, bytes, PDF_CONTENT_TYPE).await?;

    let filing = Filing {
        id: filing_id.to_string(),
        owner_id: owner.to_string(),
        storage_path: storage_path.clone(),
        file_name,
        file_hash: file_hash.clone(),
        metadata,
        created_at: now,
    };
    storage.insert_filing(&filing).await?;

    let job_id = storage
        .enqueue_job(&filing.id, &storage_path, request.ruleset_id.as_deref())
        .await?;

    info!(%filing_id, %job_id, bytes = size, "filing submitted");

    Ok(SubmitReceipt {
        filing_id,
        job_id,
        storage_path,
        file_hash,
        bytes: size,
    })
}

/// SHA-256 of `bytes`, hex-encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Object-store-safe file name derived from the local path.
fn object_file_name(path: &Path) -> String {
    let raw = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches(|c| c == '.' || c == '_').is_empty() {
        "filing.pdf".to_string()
    } else {
        cleaned
    }
}
