//! Per-user submission rate limit.
//!
//! The budget is a fixed number of filings per sliding window, counted from
//! the filings table itself so the limit holds across CLI invocations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use filingdesk_shared::{FilingDeskError, LimitsConfig, Result};
use filingdesk_storage::Storage;

/// Caps how many filings one user may submit per window.
#[derive(Debug, Clone)]
pub struct SubmissionLimiter {
    /// `0` disables the limit.
    max_per_window: u32,
    window: Duration,
}

impl SubmissionLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
        }
    }

    /// Reject when `owner_id` already used the whole budget in the window
    /// ending at `now`.
    pub async fn check(&self, storage: &Storage, owner_id: &str, now: DateTime<Utc>) -> Result<()> {
        if self.max_per_window == 0 {
            return Ok(());
        }

        let window = chrono::Duration::seconds(self.window.as_secs() as i64);
        let used = storage.submissions_since(owner_id, now - window).await?;
        debug!(owner_id, used = used.count, max = self.max_per_window, "submission budget");

        if used.count < self.max_per_window {
            return Ok(());
        }

        // The slot frees up when the oldest submission leaves the window.
        let retry_after_secs = used
            .oldest
            .map(|oldest| (oldest + window - now).num_seconds().max(1) as u64)
            .unwrap_or(self.window.as_secs());

        Err(FilingDeskError::RateLimited { retry_after_secs })
    }
}

impl From<&LimitsConfig> for SubmissionLimiter {
    fn from(config: &LimitsConfig) -> Self {
        Self::new(
            config.uploads_per_window,
            Duration::from_secs(config.window_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filingdesk_shared::{Filing, UploadMetadata};
    use uuid::Uuid;

    async fn storage_with_filings(owner: &str, count: usize) -> Storage {
        let tmp = std::env::temp_dir().join(format!("fd_limiter_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.expect("open test db");
        for _ in 0..count {
            let id = Uuid::now_v7().to_string();
            storage
                .insert_filing(&Filing {
                    storage_path: format!("filings/{owner}/{id}/a.pdf"),
                    id,
                    owner_id: owner.into(),
                    file_name: "a.pdf".into(),
                    file_hash: "h".into(),
                    metadata: UploadMetadata::default(),
                    created_at: Utc::now(),
                })
                .await
                .expect("insert filing");
        }
        storage
    }

    #[tokio::test]
    async fn allows_under_budget() {
        let storage = storage_with_filings("alice", 2).await;
        let limiter = SubmissionLimiter::new(3, Duration::from_secs(3600));
        assert!(limiter.check(&storage, "alice", Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_when_budget_spent() {
        let storage = storage_with_filings("alice", 3).await;
        let limiter = SubmissionLimiter::new(3, Duration::from_secs(3600));

        let err = limiter
            .check(&storage, "alice", Utc::now())
            .await
            .unwrap_err();
        match err {
            FilingDeskError::RateLimited { retry_after_secs } => {
                assert!(retry_after_secs > 3500 && retry_after_secs <= 3600);
            }
            other => panic!("expected rate limit, got {other}"),
        }

        // Other users have their own budget.
        assert!(limiter.check(&storage, "bob", Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn window_expiry_restores_budget() {
        let storage = storage_with_filings("alice", 3).await;
        let limiter = SubmissionLimiter::new(3, Duration::from_secs(60));
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert!(limiter.check(&storage, "alice", later).await.is_ok());
    }

    #[tokio::test]
    async fn zero_disables_limit() {
        let storage = storage_with_filings("alice", 5).await;
        let limiter = SubmissionLimiter::from(&LimitsConfig {
            uploads_per_window: 0,
            window_secs: 60,
        });
        assert!(limiter.check(&storage, "alice", Utc::now()).await.is_ok());
    }
}
