//! Scripted API fakes that replay queued responses.
//!
//! Each endpoint holds its own response queue. Responses are consumed in
//! order; the final entry is sticky so a polling session can keep querying
//! after its script runs out without the test caring about exact counts.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use papersync::api::error::Result as ApiResult;
use papersync::api::types::{
    JobSnapshot, JobStatus, PlanTier, SubscriptionSnapshot, SubscriptionStatus, TriggerReceipt,
};
use papersync::api::{ApiError, BillingApi, ProcessingApi};
use papersync::chunks::Chunk;
use papersync::poll::PollConfig;

type Script<T> = Mutex<VecDeque<ApiResult<T>>>;

fn script<T>(steps: Vec<ApiResult<T>>) -> Script<T> {
    Mutex::new(VecDeque::from(steps))
}

/// Pops the next scripted response, keeping the final entry sticky.
fn next_scripted<T: Clone>(steps: &Script<T>) -> ApiResult<T> {
    let mut guard = steps.lock().unwrap();
    if guard.len() > 1 {
        guard.pop_front().unwrap()
    } else {
        guard
            .front()
            .cloned()
            .unwrap_or_else(|| Err(ApiError::Transport("script exhausted".to_string())))
    }
}

/// Processing API fake driven by per-endpoint scripts.
pub struct ScriptedProcessingApi {
    jobs: Script<JobSnapshot>,
    chunks: Script<Vec<Chunk>>,
    triggers: Script<TriggerReceipt>,
    direct: Script<JobSnapshot>,
    job_calls: AtomicU32,
    chunk_calls: AtomicU32,
    trigger_calls: AtomicU32,
    direct_calls: AtomicU32,
}

impl ScriptedProcessingApi {
    pub fn new() -> Self {
        Self {
            jobs: script(vec![]),
            chunks: script(vec![]),
            triggers: script(vec![]),
            direct: script(vec![]),
            job_calls: AtomicU32::new(0),
            chunk_calls: AtomicU32::new(0),
            trigger_calls: AtomicU32::new(0),
            direct_calls: AtomicU32::new(0),
        }
    }

    /// Queue responses for `fetch_job`.
    pub fn with_jobs(self, steps: Vec<ApiResult<JobSnapshot>>) -> Self {
        *self.jobs.lock().unwrap() = VecDeque::from(steps);
        self
    }

    /// Queue responses for `fetch_chunks`.
    pub fn with_chunks(self, steps: Vec<ApiResult<Vec<Chunk>>>) -> Self {
        *self.chunks.lock().unwrap() = VecDeque::from(steps);
        self
    }

    /// Queue responses for `trigger_processing`.
    pub fn with_triggers(self, steps: Vec<ApiResult<TriggerReceipt>>) -> Self {
        *self.triggers.lock().unwrap() = VecDeque::from(steps);
        self
    }

    /// Queue responses for `trigger_processing_direct`.
    pub fn with_direct(self, steps: Vec<ApiResult<JobSnapshot>>) -> Self {
        *self.direct.lock().unwrap() = VecDeque::from(steps);
        self
    }

    pub fn job_fetches(&self) -> u32 {
        self.job_calls.load(Ordering::SeqCst)
    }

    pub fn chunk_fetches(&self) -> u32 {
        self.chunk_calls.load(Ordering::SeqCst)
    }

    pub fn triggers_requested(&self) -> u32 {
        self.trigger_calls.load(Ordering::SeqCst)
    }

    pub fn direct_triggers(&self) -> u32 {
        self.direct_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessingApi for ScriptedProcessingApi {
    async fn fetch_job(&self, _job_id: &str) -> ApiResult<JobSnapshot> {
        self.job_calls.fetch_add(1, Ordering::SeqCst);
        next_scripted(&self.jobs)
    }

    async fn fetch_chunks(&self, _job_id: &str) -> ApiResult<Vec<Chunk>> {
        self.chunk_calls.fetch_add(1, Ordering::SeqCst);
        next_scripted(&self.chunks)
    }

    async fn trigger_processing(&self, _job_id: &str) -> ApiResult<TriggerReceipt> {
        self.trigger_calls.fetch_add(1, Ordering::SeqCst);
        next_scripted(&self.triggers)
    }

    async fn trigger_processing_direct(&self, _job_id: &str) -> ApiResult<JobSnapshot> {
        self.direct_calls.fetch_add(1, Ordering::SeqCst);
        next_scripted(&self.direct)
    }
}

/// Billing API fake driven by a subscription script.
pub struct ScriptedBillingApi {
    subscriptions: Script<SubscriptionSnapshot>,
    calls: AtomicU32,
}

impl ScriptedBillingApi {
    pub fn new(steps: Vec<ApiResult<SubscriptionSnapshot>>) -> Self {
        Self {
            subscriptions: script(steps),
            calls: AtomicU32::new(0),
        }
    }

    pub fn fetches(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingApi for ScriptedBillingApi {
    async fn fetch_subscription(&self) -> ApiResult<SubscriptionSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        next_scripted(&self.subscriptions)
    }
}

/// Receipt the pipeline returns when a queued trigger is accepted.
pub fn receipt(job_id: &str) -> TriggerReceipt {
    TriggerReceipt {
        job_id: job_id.to_string(),
        status: JobStatus::Processing,
        message: None,
    }
}

/// Chunk with a fixed creation time so ordering tests are reproducible.
pub fn chunk(id: &str, idx: u32, page: Option<u32>, content: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        idx,
        page,
        token_count: None,
        content: content.to_string(),
        created_at: Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap(),
    }
}

/// Subscription snapshot with only the compared fields set.
pub fn subscription(
    status: SubscriptionStatus,
    plan: PlanTier,
    seats: u32,
) -> SubscriptionSnapshot {
    SubscriptionSnapshot {
        status,
        plan,
        seats,
        current_period_end: None,
        trial_end: None,
        cancel_at_period_end: false,
        provider_subscription_id: None,
    }
}

pub fn poll_every_100ms(max_attempts: u32) -> PollConfig {
    PollConfig::new(Duration::from_millis(100), max_attempts)
}

/// Scheduling barrier for paused-clock tests. The runtime only advances
/// time once every ready task has run, so a minimal sleep lets spawned
/// listeners drain their queues before the test inspects state.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
