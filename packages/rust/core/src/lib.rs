//! Filing workflows for FilingDesk.
//!
//! This crate ties storage, the object bucket and extraction together into
//! the two end-to-end flows: submitting a filing and working the extraction
//! queue.

pub mod limiter;
pub mod submit;
pub mod worker;

pub use limiter::SubmissionLimiter;
pub use submit::{SubmitReceipt, SubmitRequest, sha256_hex, submit_filing};
pub use worker::{JobOutcome, Worker, WorkerStats};
