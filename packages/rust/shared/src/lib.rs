//! Shared types, errors and configuration for FilingDesk.
//!
//! This crate is the foundation depended on by all other FilingDesk crates.
//! It provides:
//! - [`FilingDeskError`]: the unified error type
//! - Domain types ([`Filing`], [`Job`], [`StatementLine`], [`Anchor`])
//! - The upload metadata schema and its reference data ([`metadata`])
//! - Configuration ([`AppConfig`], [`BucketConfig`], config loading)

pub mod config;
pub mod error;
pub mod metadata;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AccountConfig, AppConfig, BackendConfig, BucketConfig, DatabaseConfig, LimitsConfig,
    WorkerConfig, WorkerSettings, apply_env_overrides, config_dir, config_file_path,
    database_path, init_config, load_config, load_config_from, resolve_service_key,
};
pub use error::{FilingDeskError, Result};
pub use metadata::{MetadataIssue, UploadMetadata};
pub use types::{
    Anchor, Bbox, Extraction, Filing, FilingId, Job, JobStatus, LineStatus, Period, Side,
    StatementLine, StatementType, StoredLine,
};
