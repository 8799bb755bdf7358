//! Extraction worker: claim → download → read → extract → persist.

use std::future::Future;

use chrono::{TimeDelta, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use filingdesk_bucket::BucketClient;
use filingdesk_extract::{ReaderRegistry, extract};
use filingdesk_shared::{Job, JobStatus, Result, WorkerConfig};
use filingdesk_storage::Storage;

use crate::submit::sha256_hex;

/// Result of processing one claimed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub filing_id: String,
    pub status: JobStatus,
    /// Statement lines written; `0` for failed jobs.
    pub lines: usize,
    pub error: Option<String>,
}

/// Counters for a [`Worker::run`] session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub succeeded: usize,
    pub failed: usize,
}

/// Processes queued extraction jobs.
pub struct Worker<'a> {
    storage: &'a Storage,
    bucket: &'a BucketClient,
    readers: ReaderRegistry,
    config: WorkerConfig,
}

impl<'a> Worker<'a> {
    pub fn new(storage: &'a Storage, bucket: &'a BucketClient, config: WorkerConfig) -> Self {
        Self {
            storage,
            bucket,
            readers: ReaderRegistry::new(),
            config,
        }
    }

    /// Claim and process at most one job.
    ///
    /// Returns `Ok(None)` when the queue is empty. Failures after the claim
    /// are recorded on the job rather than returned.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>> {
        let Some(job) = self.storage.claim_next_job().await? else {
            return Ok(None);
        };

        let outcome = match self.process(&job).await {
            Ok(lines) => {
                info!(job_id = %job.id, filing_id = %job.filing_id, lines, "job succeeded");
                JobOutcome {
                    job_id: job.id,
                    filing_id: job.filing_id,
                    status: JobStatus::Succeeded,
                    lines,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                error!(job_id = %job.id, filing_id = %job.filing_id, error = %message, "job failed");
                JobOutcome {
                    job_id: job.id,
                    filing_id: job.filing_id,
                    status: JobStatus::Failed,
                    lines: 0,
                    error: Some(message),
                }
            }
        };

        self.record(&outcome).await;
        Ok(Some(outcome))
    }

    /// Persist a job's terminal status.
    ///
    /// A failed write leaves the job in `processing` until
    /// [`Storage::requeue_stale_jobs`] picks it up; the outcome itself is
    /// still reported to the caller.
    async fn record(&self, outcome: &JobOutcome) {
        if let Err(e) = self
            .storage
            .mark_job(&outcome.job_id, outcome.status, outcome.error.as_deref())
            .await
        {
            error!(
                job_id = %outcome.job_id,
                status = outcome.status.as_str(),
                error = %e,
                "could not record job outcome"
            );
        }
    }

    /// Return jobs stuck in `processing` longer than `stale_after` to the queue.
    async fn requeue_stale(&self) {
        let cutoff = TimeDelta::from_std(self.config.stale_after)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else { return };
        if let Err(e) = self.storage.requeue_stale_jobs(cutoff).await {
            warn!(error = %e, "stale job requeue failed");
        }
    }

    #[instrument(skip_all, fields(job_id = %job.id, filing_id = %job.filing_id))]
    async fn process(&self, job: &Job) -> Result<usize> {
        self.storage.ensure_statements(&job.filing_id).await?;

        let bytes = self.bucket.download(&job.storage_path).await?;
        let file_hash = sha256_hex(&bytes);

        let pages = self.readers.read_pages(&bytes)?;
        let extraction = extract(&pages);

        self.storage
            .insert_extraction(&job.filing_id, Some(&file_hash), &extraction)
            .await
    }

    /// Process jobs until `shutdown` resolves.
    ///
    /// Shutdown is observed between jobs and while idle, never in the middle
    /// of a job, so a claimed job always reaches a terminal status.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<WorkerStats> {
        tokio::pin!(shutdown);
        let mut stats = WorkerStats::default();
        info!(poll_secs = self.config.poll_interval.as_secs(), "worker started");
        self.requeue_stale().await;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = std::future::ready(()) => {}
            }

            let idle = match self.run_once().await {
                Ok(Some(outcome)) => {
                    match outcome.status {
                        JobStatus::Succeeded => stats.succeeded += 1,
                        _ => stats.failed += 1,
                    }
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!(error = %e, "queue poll failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!(succeeded = stats.succeeded, failed = stats.failed, "worker stopped");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::*;
    use filingdesk_shared::{BucketConfig, Filing, LineStatus, Period, UploadMetadata};
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};
    use url::Url;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ACCOUNTS: &str = "Annual accounts 2024\u{0C}BALANCE SHEET\n\n\
        Total assets 1.234.567,89 1.100.000,00\n\n\
        Total equity and liabilities 1.234.567,89 1.100.000,00";

    /// One-page A4 PDF drawing each `(x, y, text)` item with 10pt Helvetica.
    fn accounts_pdf(items: &[(i64, i64, &str)]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), Object::Integer(10)]),
        ];
        for &(x, y, text) in items {
            operations.push(Operation::new(
                "Tm",
                [1, 0, 0, 1, x, y].into_iter().map(Object::Integer).collect(),
            ));
            operations.push(Operation::new("Tj", vec![Object::string_literal(text)]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations }.encode().unwrap();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
            "Resources" => dictionary! {
                "Font" => dictionary! {
                    "F1" => dictionary! {
                        "Type" => "Font",
                        "Subtype" => "Type1",
                        "BaseFont" => "Helvetica",
                        "Encoding" => "WinAnsiEncoding",
                    },
                },
            },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => Object::Integer(1),
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

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("fd_worker_{}.db", Uuid::now_v7()))
    }

    async fn setup() -> (MockServer, Storage, BucketClient) {
        setup_at(&temp_db()).await
    }

    async fn setup_at(db: &Path) -> (MockServer, Storage, BucketClient) {
        let server = MockServer::start().await;
        let storage = Storage::open(db).await.unwrap();
        let bucket = BucketClient::new(&BucketConfig {
            project_url: Url::parse(&server.uri()).unwrap(),
            bucket: "filings".into(),
            service_key: "key".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        (server, storage, bucket)
    }

    async fn queue_filing(storage: &Storage, object: &str) -> (String, String) {
        let id = Uuid::now_v7().to_string();
        let storage_path = format!("filings/alice/{id}/{object}");
        storage
            .insert_filing(&Filing {
                id: id.clone(),
                owner_id: "alice".into(),
                storage_path: storage_path.clone(),
                file_name: object.into(),
                file_hash: "h".into(),
                metadata: UploadMetadata::default(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let job_id = storage.enqueue_job(&id, &storage_path, None).await.unwrap();
        (id, job_id)
    }

    fn worker<'a>(storage: &'a Storage, bucket: &'a BucketClient) -> Worker<'a> {
        Worker::new(
            storage,
            bucket,
            WorkerConfig {
                poll_interval: Duration::from_millis(20),
                stale_after: Duration::from_secs(600),
            },
        )
    }

    #[tokio::test]
    async fn empty_queue_returns_none() {
        let (_server, storage, bucket) = setup().await;
        assert!(worker(&storage, &bucket).run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn processes_job_and_stores_lines() {
        let (server, storage, bucket) = setup().await;
        let (filing_id, job_id) = queue_filing(&storage, "accounts.txt").await;

        Mock::given(method("GET"))
            .and(path(format!("/storage/v1/object/filings/alice/{filing_id}/accounts.txt")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(ACCOUNTS.as_bytes()))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = worker(&storage, &bucket)
            .run_once()
            .await
            .unwrap()
            .expect("a job was queued");
        assert_eq!(outcome.job_id, job_id);
        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert_eq!(outcome.lines, 4);

        let job = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);

        let lines = storage.list_statement_lines(&filing_id).await.unwrap();
        let current_assets = lines
            .iter()
            .find(|l| l.line.caption == "Total Assets" && l.line.period == Period::Current)
            .expect("current total assets");
        assert_eq!(current_assets.line.value, Some(1_234_567.89));
        assert_eq!(current_assets.line.status, LineStatus::Extracted);
        assert_eq!(current_assets.anchors.len(), 1);
        assert_eq!(current_assets.anchors[0].page, 2);
    }

    #[tokio::test]
    async fn processes_laid_out_pdf() {
        let (server, storage, bucket) = setup().await;
        let (filing_id, _) = queue_filing(&storage, "accounts.pdf").await;

        let pdf = accounts_pdf(&[
            (50, 800, "BALANCE SHEET"),
            (50, 770, "Total assets"),
            (300, 770, "1.000.000"),
            (50, 758, "Subscribed capital"),
            (300, 758, "250.000"),
            (50, 720, "Total equity and liabilities"),
            (300, 720, "1.000.000"),
            (400, 720, "900.000"),
        ]);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf))
            .mount(&server)
            .await;

        let outcome = worker(&storage, &bucket).run_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert_eq!(outcome.lines, 3);

        let lines = storage.list_statement_lines(&filing_id).await.unwrap();
        let assets: Vec<_> = lines
            .iter()
            .filter(|l| l.line.caption == "Total Assets")
            .collect();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].line.value, Some(1_000_000.0));
        assert_eq!(assets[0].anchors[0].page, 1);
        assert!(assets[0].anchors[0].bbox[1] > 0.0);
        assert!(assets[0].anchors[0].bbox[3] < 0.2);
    }

    #[tokio::test]
    async fn download_failure_marks_job_failed() {
        let (server, storage, bucket) = setup().await;
        let (_, job_id) = queue_filing(&storage, "missing.pdf").await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = worker(&storage, &bucket).run_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.error.as_deref().unwrap_or_default().contains("404"));

        let job = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn unreadable_document_marks_job_failed() {
        let (server, storage, bucket) = setup().await;
        let (_, job_id) = queue_filing(&storage, "broken.pdf").await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 truncated".to_vec()))
            .mount(&server)
            .await;

        let outcome = worker(&storage, &bucket).run_once().await.unwrap().unwrap();
        assert_eq!(outcome.status, JobStatus::Failed);
        let job = storage.get_job(&job_id).await.unwrap().unwrap();
        assert!(job.error.unwrap().contains("invalid PDF"));
    }

    #[tokio::test]
    async fn run_drains_queue_until_shutdown() {
        let (server, storage, bucket) = setup().await;
        queue_filing(&storage, "a.txt").await;
        queue_filing(&storage, "b.txt").await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(ACCOUNTS.as_bytes()))
            .mount(&server)
            .await;

        let worker = worker(&storage, &bucket);
        let stats = worker
            .run(tokio::time::sleep(Duration::from_millis(300)))
            .await
            .unwrap();

        assert_eq!(stats, WorkerStats { succeeded: 2, failed: 0 });
        assert!(storage.claim_next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn outcome_is_reported_when_it_cannot_be_recorded() {
        let db = temp_db();
        let (server, storage, bucket) = setup_at(&db).await;
        let (_, job_id) = queue_filing(&storage, "accounts.txt").await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(ACCOUNTS.as_bytes())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        // A second connection removes the job while its download is in flight.
        let other = libsql::Builder::new_local(&db).build().await.unwrap();
        let conn = other.connect().unwrap();
        let worker = worker(&storage, &bucket);
        let (outcome, _) = tokio::join!(worker.run_once(), async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            conn.execute("DELETE FROM job WHERE id = ?1", libsql::params![job_id.as_str()])
                .await
                .unwrap();
        });

        let outcome = outcome.unwrap().expect("claimed job is reported");
        assert_eq!(outcome.job_id, job_id);
        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert!(storage.get_job(&job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_requeues_stale_jobs_first() {
        let (server, storage, bucket) = setup().await;
        let (_, job_id) = queue_filing(&storage, "a.txt").await;
        storage.claim_next_job().await.unwrap().expect("claimed");

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(ACCOUNTS.as_bytes()))
            .mount(&server)
            .await;

        let worker = Worker::new(
            &storage,
            &bucket,
            WorkerConfig {
                poll_interval: Duration::from_millis(20),
                stale_after: Duration::ZERO,
            },
        );
        let stats = worker
            .run(tokio::time::sleep(Duration::from_millis(300)))
            .await
            .unwrap();

        assert_eq!(stats, WorkerStats { succeeded: 1, failed: 0 });
        let job = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn resolved_shutdown_stops_before_claiming() {
        let (_server, storage, bucket) = setup().await;
        let (_, job_id) = queue_filing(&storage, "a.txt").await;

        let stats = worker(&storage, &bucket)
            .run(std::future::ready(()))
            .await
            .unwrap();

        assert_eq!(stats, WorkerStats::default());
        let job = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }
}
