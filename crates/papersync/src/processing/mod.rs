//! Document-processing job tracking.
//!
//! `ProcessingTracker` drives the remote extraction pipeline for one client
//! session: idempotent trigger operations, one polling session per running
//! job, a snapshot cache the UI reads, and broadcast progress events. A
//! session exists exactly while a job is being processed; it closes itself
//! on PROCESSED or FAILED and a failed job is only retried by an explicit
//! new trigger.

pub mod cache;

pub use cache::JobCache;

use std::fmt;
use std::sync::{Arc, OnceLock};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::api::error::CODE_NO_EXTRACTABLE_TEXT;
use crate::api::types::{JobFailure, JobSnapshot, JobStatus};
use crate::api::{ApiError, ProcessingApi};
use crate::chunks::{self, Chunk};
use crate::config::ProcessingPollConfig;
use crate::poll::{PollConfig, PollEvent, PollHandle, StatusPoller};

/// Guidance shown when a document has no text layer.
const NO_TEXT_GUIDANCE: &str = "No selectable text was found in this document. \
If it is a scanned PDF, run OCR on it first, or upload a version that \
contains a text layer.";

/// Guidance shown for transient infrastructure failures.
const TRANSIENT_GUIDANCE: &str =
    "The processing service did not respond. Check your connection and try again.";

/// Errors surfaced by processing operations.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// The source document has no extractable text. Retrying cannot help.
    #[error("document contains no extractable text: {detail}")]
    NoExtractableText { detail: String },

    /// The remote call failed.
    #[error("processing service call failed: {0}")]
    Api(ApiError),
}

impl From<ApiError> for ProcessingError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Rejected { ref code, ref message } if code == CODE_NO_EXTRACTABLE_TEXT => {
                ProcessingError::NoExtractableText {
                    detail: message.clone(),
                }
            }
            other => ProcessingError::Api(other),
        }
    }
}

impl ProcessingError {
    /// True when retrying cannot change the outcome.
    pub fn is_permanent(&self) -> bool {
        match self {
            ProcessingError::NoExtractableText { .. } => true,
            ProcessingError::Api(e) => !e.is_transient(),
        }
    }

    /// Actionable message for the user: what to fix for permanent failures,
    /// "try again" for transient ones.
    pub fn user_guidance(&self) -> String {
        match self {
            ProcessingError::NoExtractableText { .. } => NO_TEXT_GUIDANCE.to_string(),
            ProcessingError::Api(e) if e.is_transient() => TRANSIENT_GUIDANCE.to_string(),
            ProcessingError::Api(e) => {
                format!("Processing failed: {}. Contact support if this keeps happening.", e)
            }
        }
    }
}

/// Whether a failed job can plausibly succeed on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Permanent,
    Transient,
}

impl FailureKind {
    /// Classifies the structured failure a FAILED job carries.
    pub fn of(failure: &JobFailure) -> FailureKind {
        match failure.code.as_deref() {
            Some(CODE_NO_EXTRACTABLE_TEXT) => FailureKind::Permanent,
            Some(_) => FailureKind::Transient,
            None if failure.message.to_lowercase().contains("no extractable text") => {
                FailureKind::Permanent
            }
            None => FailureKind::Transient,
        }
    }
}

/// Coarse job state for view rendering, derived from the cached snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Idle,
    InProgress,
    Succeeded,
    FailedPermanent,
    FailedTransient,
}

impl ProcessingState {
    fn from_snapshot(snapshot: &JobSnapshot) -> ProcessingState {
        match snapshot.status {
            JobStatus::Uploaded => ProcessingState::Idle,
            JobStatus::Processing => ProcessingState::InProgress,
            JobStatus::Processed => ProcessingState::Succeeded,
            JobStatus::Failed => match snapshot.error.as_ref().map(FailureKind::of) {
                Some(FailureKind::Permanent) => ProcessingState::FailedPermanent,
                _ => ProcessingState::FailedTransient,
            },
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingState::Idle => write!(f, "idle"),
            ProcessingState::InProgress => write!(f, "in progress"),
            ProcessingState::Succeeded => write!(f, "succeeded"),
            ProcessingState::FailedPermanent => write!(f, "failed (permanent)"),
            ProcessingState::FailedTransient => write!(f, "failed (transient)"),
        }
    }
}

/// Result of an idempotent trigger request.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// Queued path: the pipeline was asked to start and a polling session
    /// is now watching the job.
    Started,
    /// Direct path: the pipeline ran to completion within this call.
    Finished(JobSnapshot),
    /// The job is already being processed; no second run was started.
    AlreadyProcessing,
    /// The job already finished successfully; nothing to do.
    AlreadyProcessed,
}

/// Progress events published while jobs are tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProcessingEvent {
    /// A fresh non-terminal snapshot was observed for a tracked job.
    StatusChanged {
        job_id: String,
        status: JobStatus,
        attempt: u32,
    },
    /// The job finished; chunks are ready to fetch.
    Completed { job_id: String, snapshot: JobSnapshot },
    /// The job failed; `kind` says whether retrying can help.
    Failed {
        job_id: String,
        kind: FailureKind,
        guidance: String,
    },
    /// The watch window closed without a terminal status. The job may still
    /// finish server-side; it is not marked failed locally.
    TimedOut { job_id: String, attempts: u32 },
}

/// Broadcasts processing events to any number of observers.
#[derive(Clone)]
pub struct ProcessingBroadcaster {
    sender: Arc<broadcast::Sender<ProcessingEvent>>,
}

impl ProcessingBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: ProcessingEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessingEvent> {
        self.sender.subscribe()
    }
}

impl Default for ProcessingBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Builds the terminal event for a finished job snapshot.
fn terminal_event(snapshot: JobSnapshot) -> ProcessingEvent {
    if snapshot.status == JobStatus::Processed {
        return ProcessingEvent::Completed {
            job_id: snapshot.id.clone(),
            snapshot,
        };
    }
    let (kind, guidance) = match snapshot.error.as_ref() {
        Some(failure) => {
            let kind = FailureKind::of(failure);
            let guidance = match kind {
                FailureKind::Permanent => NO_TEXT_GUIDANCE.to_string(),
                FailureKind::Transient => {
                    format!("Processing failed: {}. Try again in a moment.", failure.message)
                }
            };
            (kind, guidance)
        }
        None => (
            FailureKind::Transient,
            "Processing failed for an unknown reason. Try again in a moment.".to_string(),
        ),
    };
    ProcessingEvent::Failed {
        job_id: snapshot.id,
        kind,
        guidance,
    }
}

/// Tracks document-processing jobs for one client session.
///
/// Dropping the tracker cancels every active polling session.
pub struct ProcessingTracker {
    api: Arc<dyn ProcessingApi>,
    poller: StatusPoller<JobSnapshot>,
    cache: Arc<JobCache>,
    broadcaster: ProcessingBroadcaster,
    poll_config: PollConfig,
}

impl ProcessingTracker {
    pub fn new(api: Arc<dyn ProcessingApi>, config: &ProcessingPollConfig) -> Self {
        Self::with_poll_config(api, config.poll_config())
    }

    pub fn with_poll_config(api: Arc<dyn ProcessingApi>, poll_config: PollConfig) -> Self {
        Self {
            api,
            poller: StatusPoller::new(),
            cache: Arc::new(JobCache::new()),
            broadcaster: ProcessingBroadcaster::default(),
            poll_config,
        }
    }

    /// Subscribes to processing events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessingEvent> {
        self.broadcaster.subscribe()
    }

    /// Cached snapshot for a job, without a remote round trip.
    pub fn cached(&self, job_id: &str) -> Option<JobSnapshot> {
        self.cache.get(job_id)
    }

    /// Derived view state for a job. Unknown jobs are idle.
    pub fn state(&self, job_id: &str) -> ProcessingState {
        self.cached(job_id)
            .map(|snapshot| ProcessingState::from_snapshot(&snapshot))
            .unwrap_or(ProcessingState::Idle)
    }

    /// Handle of the active polling session for a job, if any.
    pub fn active_session(&self, job_id: &str) -> Option<PollHandle<JobSnapshot>> {
        self.poller.get(job_id)
    }

    /// Cancels the polling session for a job, if one is active. Used on
    /// view teardown when the result is no longer wanted.
    pub fn stop_tracking(&self, job_id: &str) {
        self.poller.stop(job_id);
    }

    /// Fetches the current job snapshot and applies it to the cache.
    pub async fn get_status(&self, job_id: &str) -> Result<JobSnapshot, ProcessingError> {
        let seq = self.cache.next_read_seq();
        let snapshot = self
            .api
            .fetch_job(job_id)
            .await
            .map_err(ProcessingError::from)?;
        if self.cache.apply(snapshot.clone(), seq) {
            Ok(snapshot)
        } else {
            // This read lost to a newer one; answer with what the cache kept.
            Ok(self.cache.get(job_id).unwrap_or(snapshot))
        }
    }

    /// Idempotent queued trigger.
    ///
    /// Opens the polling session before anything else so that a concurrent
    /// trigger for the same job joins it instead of starting a second
    /// pipeline run.
    pub async fn trigger(&self, job_id: &str) -> Result<TriggerOutcome, ProcessingError> {
        let (handle, created) = self.open_session(job_id);
        if !created {
            debug!("Job {} already has an active poll session", job_id);
            return Ok(TriggerOutcome::AlreadyProcessing);
        }

        let snapshot = match self.get_status(job_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                handle.stop();
                return Err(e);
            }
        };

        match snapshot.status {
            JobStatus::Processing => {
                // Someone else started it; keep watching.
                Ok(TriggerOutcome::AlreadyProcessing)
            }
            JobStatus::Processed => {
                handle.stop();
                Ok(TriggerOutcome::AlreadyProcessed)
            }
            JobStatus::Uploaded | JobStatus::Failed => {
                match self.api.trigger_processing(job_id).await {
                    Ok(receipt) => {
                        // The receipt is the freshest status we have; without
                        // this the cache would say FAILED until the first tick.
                        let seq = self.cache.next_read_seq();
                        self.cache.apply(JobSnapshot::new(job_id, receipt.status), seq);
                        info!(
                            "Processing requested for job {} (status {})",
                            job_id, receipt.status
                        );
                        Ok(TriggerOutcome::Started)
                    }
                    Err(e) => {
                        handle.stop();
                        Err(ProcessingError::from(e))
                    }
                }
            }
        }
    }

    /// Synchronous trigger: one round trip, no polling session.
    ///
    /// Shares the trigger taxonomy: an already running job reports a benign
    /// conflict and a finished one reports nothing to do.
    pub async fn trigger_direct(&self, job_id: &str) -> Result<TriggerOutcome, ProcessingError> {
        if self.poller.get(job_id).is_some() {
            debug!("Job {} already has an active poll session", job_id);
            return Ok(TriggerOutcome::AlreadyProcessing);
        }

        let snapshot = self.get_status(job_id).await?;
        match snapshot.status {
            JobStatus::Processing => Ok(TriggerOutcome::AlreadyProcessing),
            JobStatus::Processed => Ok(TriggerOutcome::AlreadyProcessed),
            JobStatus::Uploaded | JobStatus::Failed => {
                let result = self
                    .api
                    .trigger_processing_direct(job_id)
                    .await
                    .map_err(ProcessingError::from)?;
                // The result postdates any status read issued while the run
                // was in flight, so it gets its stamp on completion.
                let seq = self.cache.next_read_seq();
                self.cache.apply(result.clone(), seq);
                info!(
                    "Direct processing finished for job {} (status {})",
                    job_id, result.status
                );
                self.broadcaster.send(terminal_event(result.clone()));
                Ok(TriggerOutcome::Finished(result))
            }
        }
    }

    /// Ensures a polling session exists for a job believed to be running,
    /// e.g. when a view reloads while processing is underway. The session
    /// closes itself on the first tick if the job is already terminal.
    pub fn watch(&self, job_id: &str) -> PollHandle<JobSnapshot> {
        let (handle, _) = self.open_session(job_id);
        handle
    }

    /// Fetches every chunk for a job, sorted into reading order.
    pub async fn chunks_in_reading_order(
        &self,
        job_id: &str,
    ) -> Result<Vec<Chunk>, ProcessingError> {
        let mut fetched = self
            .api
            .fetch_chunks(job_id)
            .await
            .map_err(ProcessingError::from)?;
        chunks::sort_reading_order(&mut fetched);
        Ok(fetched)
    }

    /// Fetches a job's chunks and reassembles the continuous text.
    pub async fn reconstructed_text(&self, job_id: &str) -> Result<String, ProcessingError> {
        let fetched = self
            .api
            .fetch_chunks(job_id)
            .await
            .map_err(ProcessingError::from)?;
        Ok(chunks::reconstruct(&fetched))
    }

    fn open_session(&self, job_id: &str) -> (PollHandle<JobSnapshot>, bool) {
        let api = Arc::clone(&self.api);
        let cache = Arc::clone(&self.cache);
        let id = job_id.to_string();
        // Filled in right after the session exists, so the query can consult
        // its own session's phase.
        let session: Arc<OnceLock<PollHandle<JobSnapshot>>> = Arc::new(OnceLock::new());
        let query = {
            let session = Arc::clone(&session);
            move || {
                let api = Arc::clone(&api);
                let cache = Arc::clone(&cache);
                let id = id.clone();
                let session = Arc::clone(&session);
                async move {
                    let seq = cache.next_read_seq();
                    let snapshot = api.fetch_job(&id).await?;
                    // A response resolving after the session stopped must not
                    // reach the cache.
                    if session.get().map(|h| h.is_active()).unwrap_or(false) {
                        cache.apply(snapshot.clone(), seq);
                    }
                    Ok::<_, ApiError>(snapshot)
                }
            }
        };

        let (handle, created) = self.poller.start(
            job_id,
            self.poll_config,
            query,
            |snapshot: &JobSnapshot| snapshot.is_terminal(),
        );
        if created {
            let _ = session.set(handle.clone());
            self.spawn_listener(&handle);
        }
        (handle, created)
    }

    /// Forwards one session's poll events as processing events.
    fn spawn_listener(&self, handle: &PollHandle<JobSnapshot>) {
        let broadcaster = self.broadcaster.clone();
        let job_id = handle.key().to_string();
        let mut rx = handle.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(PollEvent::Tick { attempt, status }) => {
                        broadcaster.send(ProcessingEvent::StatusChanged {
                            job_id: job_id.clone(),
                            status: status.status,
                            attempt,
                        });
                    }
                    Ok(PollEvent::TickError { attempt, error }) => {
                        debug!(
                            "Status query for job {} failed on attempt {}: {}",
                            job_id, attempt, error
                        );
                    }
                    Ok(PollEvent::Complete { status }) => {
                        broadcaster.send(terminal_event(status));
                        break;
                    }
                    Ok(PollEvent::TimedOut { attempts }) => {
                        broadcaster.send(ProcessingEvent::TimedOut {
                            job_id: job_id.clone(),
                            attempts,
                        });
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "Processing listener for job {} lagged by {} events",
                            job_id, skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: Option<&str>, message: &str) -> JobFailure {
        JobFailure {
            code: code.map(|c| c.to_string()),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_failure_kind_from_known_code() {
        let f = failure(Some(CODE_NO_EXTRACTABLE_TEXT), "scanned image only");
        assert_eq!(FailureKind::of(&f), FailureKind::Permanent);
    }

    #[test]
    fn test_failure_kind_from_unknown_code_is_transient() {
        let f = failure(Some("PIPELINE_CRASH"), "worker died");
        assert_eq!(FailureKind::of(&f), FailureKind::Transient);
    }

    #[test]
    fn test_failure_kind_sniffs_message_without_code() {
        let f = failure(None, "No extractable text in upload");
        assert_eq!(FailureKind::of(&f), FailureKind::Permanent);

        let f = failure(None, "internal error");
        assert_eq!(FailureKind::of(&f), FailureKind::Transient);
    }

    #[test]
    fn test_processing_error_classification() {
        let rejected = ApiError::Rejected {
            code: CODE_NO_EXTRACTABLE_TEXT.to_string(),
            message: "image-only pdf".to_string(),
        };
        let err = ProcessingError::from(rejected);
        assert!(matches!(err, ProcessingError::NoExtractableText { .. }));
        assert!(err.is_permanent());
        assert!(err.user_guidance().contains("OCR"));

        let transport = ProcessingError::from(ApiError::Transport("timeout".to_string()));
        assert!(!transport.is_permanent());
        assert!(transport.user_guidance().contains("try again"));
    }

    #[test]
    fn test_permanent_api_error_guidance_mentions_support() {
        let err = ProcessingError::from(ApiError::Status {
            status: 404,
            message: "no such job".to_string(),
        });
        assert!(err.is_permanent());
        assert!(err.user_guidance().contains("support"));
    }

    #[test]
    fn test_state_from_snapshots() {
        let uploaded = JobSnapshot::new("j", JobStatus::Uploaded);
        assert_eq!(ProcessingState::from_snapshot(&uploaded), ProcessingState::Idle);

        let processing = JobSnapshot::new("j", JobStatus::Processing);
        assert_eq!(
            ProcessingState::from_snapshot(&processing),
            ProcessingState::InProgress
        );

        let processed = JobSnapshot::processed("j", 4);
        assert_eq!(
            ProcessingState::from_snapshot(&processed),
            ProcessingState::Succeeded
        );

        let permanent = JobSnapshot::failed("j", Some(CODE_NO_EXTRACTABLE_TEXT), "nope");
        assert_eq!(
            ProcessingState::from_snapshot(&permanent),
            ProcessingState::FailedPermanent
        );

        let transient = JobSnapshot::failed("j", None, "worker crashed");
        assert_eq!(
            ProcessingState::from_snapshot(&transient),
            ProcessingState::FailedTransient
        );
    }

    #[test]
    fn test_terminal_event_for_processed_job() {
        let snapshot = JobSnapshot::processed("job-1", 7);
        match terminal_event(snapshot) {
            ProcessingEvent::Completed { job_id, snapshot } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(snapshot.chunk_count, 7);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_terminal_event_for_failed_job_carries_guidance() {
        let snapshot = JobSnapshot::failed("job-1", Some(CODE_NO_EXTRACTABLE_TEXT), "no text");
        match terminal_event(snapshot) {
            ProcessingEvent::Failed { kind, guidance, .. } => {
                assert_eq!(kind, FailureKind::Permanent);
                assert!(guidance.contains("OCR"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_terminal_event_for_failure_without_detail() {
        let snapshot = JobSnapshot::new("job-1", JobStatus::Failed);
        match terminal_event(snapshot) {
            ProcessingEvent::Failed { kind, .. } => assert_eq!(kind, FailureKind::Transient),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = ProcessingBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(ProcessingEvent::StatusChanged {
            job_id: "job-1".to_string(),
            status: JobStatus::Processing,
            attempt: 2,
        });

        match rx.try_recv().unwrap() {
            ProcessingEvent::StatusChanged { job_id, attempt, .. } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(attempt, 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ProcessingEvent::TimedOut {
            job_id: "job-9".to_string(),
            attempts: 150,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"timedOut\""));
        assert!(json.contains("\"jobId\":\"job-9\""));
    }
}
