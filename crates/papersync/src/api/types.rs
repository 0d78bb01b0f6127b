//! Wire types observed at the pipeline and billing boundaries.
//!
//! Jobs and chunks are created and owned by the server-side pipeline; the
//! client only ever sees snapshots of them. Everything here derives serde
//! with the camelCase field names the API speaks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunks::Chunk;

/// Lifecycle status of a document-processing job.
///
/// UPLOADED and PROCESSING are non-terminal; PROCESSED and FAILED are
/// terminal. FAILED may move back to PROCESSING through an explicit
/// re-trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Uploaded,
    Processing,
    Processed,
    Failed,
}

impl JobStatus {
    /// True for statuses from which no further transition is expected
    /// without an explicit re-trigger.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Processed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Uploaded => write!(f, "UPLOADED"),
            JobStatus::Processing => write!(f, "PROCESSING"),
            JobStatus::Processed => write!(f, "PROCESSED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Structured failure attached to a FAILED job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    /// Machine-readable code, when the pipeline provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

/// One observed state of a processing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    /// Present only when status is FAILED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    /// Present only when status is PROCESSED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chunk_count: u32,
    /// Partial chunk preview the server may include while PROCESSING.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<Chunk>>,
}

impl JobSnapshot {
    /// Minimal snapshot for a job in the given status.
    pub fn new(id: &str, status: JobStatus) -> Self {
        Self {
            id: id.to_string(),
            status,
            error: None,
            processed_at: None,
            chunk_count: 0,
            chunks: None,
        }
    }

    /// Snapshot of a successfully processed job.
    pub fn processed(id: &str, chunk_count: u32) -> Self {
        Self {
            processed_at: Some(Utc::now()),
            chunk_count,
            ..Self::new(id, JobStatus::Processed)
        }
    }

    /// Snapshot of a failed job.
    pub fn failed(id: &str, code: Option<&str>, message: &str) -> Self {
        Self {
            error: Some(JobFailure {
                code: code.map(|c| c.to_string()),
                message: message.to_string(),
            }),
            ..Self::new(id, JobStatus::Failed)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Acknowledgement returned when queued processing is requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerReceipt {
    pub job_id: String,
    /// Job status once the trigger was accepted, normally PROCESSING.
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Provider-reported subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionStatus::Active => write!(f, "ACTIVE"),
            SubscriptionStatus::Trialing => write!(f, "TRIALING"),
            SubscriptionStatus::PastDue => write!(f, "PAST_DUE"),
            SubscriptionStatus::Canceled => write!(f, "CANCELED"),
            SubscriptionStatus::Incomplete => write!(f, "INCOMPLETE"),
        }
    }
}

/// Plan the workspace is subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Pro,
    Lab,
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanTier::Free => write!(f, "free"),
            PlanTier::Pro => write!(f, "pro"),
            PlanTier::Lab => write!(f, "lab"),
        }
    }
}

/// One observed state of the workspace subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSnapshot {
    pub status: SubscriptionStatus,
    pub plan: PlanTier,
    #[serde(default)]
    pub seats: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_subscription_id: Option<String>,
}

impl SubscriptionSnapshot {
    /// True when any field that represents the effective plan differs from
    /// `other`. Informational fields (trial end, provider id) are ignored:
    /// a checkout or portal action always changes at least one of the
    /// compared fields once the provider has caught up.
    pub fn differs_from(&self, other: &SubscriptionSnapshot) -> bool {
        self.status != other.status
            || self.plan != other.plan
            || self.seats != other.seats
            || self.current_period_end != other.current_period_end
            || self.cancel_at_period_end != other.cancel_at_period_end
    }
}
