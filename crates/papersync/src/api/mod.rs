//! Remote boundary: the document pipeline and the billing provider.
//!
//! Both collaborators are opaque server-side systems; the client only issues
//! reads and triggers. The traits here are the seam the sync logic is driven
//! through, so tests can substitute scripted fakes for the real endpoints.

pub mod client;
pub mod error;
pub mod types;

pub use client::ApiClient;
pub use error::{ApiError, CODE_NO_EXTRACTABLE_TEXT};
pub use types::{
    JobFailure, JobSnapshot, JobStatus, PlanTier, SubscriptionSnapshot, SubscriptionStatus,
    TriggerReceipt,
};

use async_trait::async_trait;

use crate::chunks::Chunk;

/// Read and trigger surface of the server-side document pipeline.
#[async_trait]
pub trait ProcessingApi: Send + Sync {
    /// Fetches the current snapshot of one job.
    async fn fetch_job(&self, job_id: &str) -> error::Result<JobSnapshot>;

    /// Fetches every chunk extracted for a job. Order is not guaranteed.
    async fn fetch_chunks(&self, job_id: &str) -> error::Result<Vec<Chunk>>;

    /// Asks the pipeline to start processing through the job queue.
    async fn trigger_processing(&self, job_id: &str) -> error::Result<TriggerReceipt>;

    /// Runs processing synchronously, returning the finished snapshot in a
    /// single round trip.
    async fn trigger_processing_direct(&self, job_id: &str) -> error::Result<JobSnapshot>;
}

/// Subscription read surface of the billing provider.
#[async_trait]
pub trait BillingApi: Send + Sync {
    /// Fetches the authoritative subscription state for the workspace.
    async fn fetch_subscription(&self) -> error::Result<SubscriptionSnapshot>;
}
