//! Generic poll-until-terminal primitive.
//!
//! A `StatusPoller` owns at most one polling session per logical key. Each
//! session drives a caller-supplied async query on a fixed cadence until the
//! caller's terminal predicate accepts a result or the attempt budget runs
//! out, publishing progress on a broadcast channel. Sessions release their
//! timer on every exit path: completion, timeout, explicit stop, and owner
//! drop.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// Capacity of each session's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ─── Poll configuration ─────────────────────────────────────────────────────

/// Cadence and budget for one polling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay before the first query and between consecutive queries.
    pub interval: Duration,
    /// Maximum number of queries before the session times out.
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound on how long a session can stay active.
    pub fn deadline(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Lifecycle phase of a polling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Queries are being issued on the configured cadence.
    Polling,
    /// The terminal predicate accepted a result.
    Complete,
    /// The attempt budget was exhausted without a terminal result.
    TimedOut,
    /// Stopped by the caller or by owner teardown.
    Cancelled,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionPhase::Polling)
    }
}

/// Progress published by a session.
///
/// `Complete` and `TimedOut` are published exactly once per session, and
/// nothing is published after `stop` has returned.
#[derive(Debug, Clone)]
pub enum PollEvent<S> {
    /// A query returned a non-terminal result; the session keeps going.
    Tick { attempt: u32, status: S },
    /// A query failed; the session keeps going until the budget runs out.
    TickError { attempt: u32, error: String },
    /// The terminal predicate accepted this result.
    Complete { status: S },
    /// The budget ran out. The remote work may still finish later.
    TimedOut { attempts: u32 },
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<S> {
    Complete(S),
    TimedOut,
    Cancelled,
}

// ─── Session internals ──────────────────────────────────────────────────────

struct SessionShared<S> {
    key: String,
    session_id: String,
    max_attempts: u32,
    attempt: AtomicU32,
    phase: Mutex<SessionPhase>,
    last_error: Mutex<Option<String>>,
    cancel_tx: watch::Sender<bool>,
    outcome_tx: watch::Sender<Option<PollOutcome<S>>>,
    events: broadcast::Sender<PollEvent<S>>,
}

impl<S> SessionShared<S> {
    fn phase(&self) -> SessionPhase {
        let guard = match self.phase.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Session phase lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard
    }

    /// Publishes a non-terminal event unless the session already ended.
    ///
    /// The phase check and the send happen under one lock, so nothing is
    /// published after `stop` has returned.
    fn publish_tick(&self, event: PollEvent<S>) -> bool {
        let guard = match self.phase.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Session phase lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if *guard != SessionPhase::Polling {
            return false;
        }
        let _ = self.events.send(event);
        true
    }

    /// Moves the session to a terminal phase, publishing the closing event
    /// and the awaited outcome. Returns false when the session was already
    /// terminal, in which case nothing is published.
    fn finish(&self, phase: SessionPhase, event: PollEvent<S>, outcome: PollOutcome<S>) -> bool {
        let mut guard = match self.phase.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Session phase lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if *guard != SessionPhase::Polling {
            return false;
        }
        *guard = phase;
        let _ = self.events.send(event);
        let _ = self.outcome_tx.send(Some(outcome));
        true
    }

    /// Cancels the session. No event is published; the awaited outcome
    /// resolves to `Cancelled`.
    fn cancel(&self) -> bool {
        let mut guard = match self.phase.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Session phase lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if *guard != SessionPhase::Polling {
            return false;
        }
        *guard = SessionPhase::Cancelled;
        let _ = self.outcome_tx.send(Some(PollOutcome::Cancelled));
        true
    }

    fn record_error(&self, text: String) {
        let mut guard = match self.last_error.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Session error lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard = Some(text);
    }
}

// ─── PollHandle ─────────────────────────────────────────────────────────────

/// Handle to one polling session.
///
/// Cloneable; every clone observes the same session. Dropping a handle does
/// not stop the session, the registry owns that lifecycle.
#[derive(Clone)]
pub struct PollHandle<S> {
    shared: Arc<SessionShared<S>>,
    outcome_rx: watch::Receiver<Option<PollOutcome<S>>>,
}

impl<S> PollHandle<S> {
    /// Logical key this session polls for.
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Unique id of this session, stable across handle clones.
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Number of queries issued so far.
    pub fn attempts(&self) -> u32 {
        self.shared.attempt.load(Ordering::Acquire)
    }

    /// Configured attempt budget.
    pub fn max_attempts(&self) -> u32 {
        self.shared.max_attempts
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.phase()
    }

    /// True while the session is still issuing queries.
    pub fn is_active(&self) -> bool {
        self.shared.phase() == SessionPhase::Polling
    }

    /// Most recent query error, retained for diagnostics.
    pub fn last_error(&self) -> Option<String> {
        let guard = match self.shared.last_error.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Session error lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }

    /// Stops the session immediately. After this returns no further event is
    /// published for the session; a query response still in flight is
    /// discarded.
    ///
    /// Returns whether this call cancelled the session; false when it had
    /// already reached a terminal phase.
    pub fn stop(&self) -> bool {
        if self.shared.cancel() {
            let _ = self.shared.cancel_tx.send(true);
            debug!(
                "Poll session {} for '{}' cancelled",
                self.shared.session_id, self.shared.key
            );
            true
        } else {
            false
        }
    }
}

impl<S: Clone> PollHandle<S> {
    /// Subscribes to this session's progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent<S>> {
        self.shared.events.subscribe()
    }

    /// Waits for the session's terminal outcome.
    pub async fn wait(&self) -> PollOutcome<S> {
        let mut rx = self.outcome_rx.clone();
        loop {
            {
                let current = rx.borrow();
                if let Some(outcome) = current.as_ref() {
                    return outcome.clone();
                }
            }
            if rx.changed().await.is_err() {
                // Sender gone without a terminal outcome; only possible when
                // the whole session state was dropped.
                return PollOutcome::Cancelled;
            }
        }
    }
}

// ─── StatusPoller ───────────────────────────────────────────────────────────

type SessionMap<S> = Arc<Mutex<HashMap<String, PollHandle<S>>>>;

fn lock_sessions<S>(
    sessions: &Mutex<HashMap<String, PollHandle<S>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, PollHandle<S>>> {
    match sessions.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            warn!("Session registry lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Registry of polling sessions, at most one active per key.
///
/// Dropping the registry stops every active session, which releases their
/// timers and discards in-flight queries.
pub struct StatusPoller<S> {
    sessions: SessionMap<S>,
}

impl<S> StatusPoller<S> {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Stops the session for `key`, if one is active.
    pub fn stop(&self, key: &str) {
        let sessions = lock_sessions(&self.sessions);
        if let Some(handle) = sessions.get(key) {
            handle.stop();
        }
    }

    /// Stops every active session. Also runs on drop.
    pub fn stop_all(&self) {
        let sessions = lock_sessions(&self.sessions);
        for handle in sessions.values() {
            handle.stop();
        }
    }

    /// Number of sessions still polling.
    pub fn active_count(&self) -> usize {
        let sessions = lock_sessions(&self.sessions);
        sessions.values().filter(|h| h.is_active()).count()
    }
}

impl<S: Clone + Send + Sync + 'static> StatusPoller<S> {
    /// Returns the handle for `key` while its session is active.
    pub fn get(&self, key: &str) -> Option<PollHandle<S>> {
        let sessions = lock_sessions(&self.sessions);
        sessions.get(key).filter(|h| h.is_active()).cloned()
    }

    /// Starts a session for `key`, or joins the active one.
    ///
    /// Returns the handle plus whether this call created the session; a call
    /// while a session for the key is active returns the existing handle
    /// unchanged. The first query runs one interval after this call and each
    /// later query runs one interval after the previous one resolved, so a
    /// session never has overlapping queries in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<Q, Fut, P, E>(
        &self,
        key: &str,
        config: PollConfig,
        query: Q,
        is_terminal: P,
    ) -> (PollHandle<S>, bool)
    where
        Q: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, E>> + Send + 'static,
        P: Fn(&S) -> bool + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut sessions = lock_sessions(&self.sessions);
        if let Some(existing) = sessions.get(key) {
            if existing.is_active() {
                debug!("Poll session for '{}' already active, joining", key);
                return (existing.clone(), false);
            }
        }

        let handle = spawn_session(Arc::clone(&self.sessions), key, config, query, is_terminal);
        sessions.insert(key.to_string(), handle.clone());
        (handle, true)
    }
}

impl<S> Default for StatusPoller<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Drop for StatusPoller<S> {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Spawns the timer task for one session and returns its handle.
fn spawn_session<S, Q, Fut, P, E>(
    sessions: SessionMap<S>,
    key: &str,
    config: PollConfig,
    query: Q,
    is_terminal: P,
) -> PollHandle<S>
where
    S: Clone + Send + Sync + 'static,
    Q: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<S, E>> + Send + 'static,
    P: Fn(&S) -> bool + Send + 'static,
    E: Display + Send + 'static,
{
    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    let (outcome_tx, outcome_rx) = watch::channel(None);
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let shared = Arc::new(SessionShared {
        key: key.to_string(),
        session_id: Uuid::new_v4().to_string(),
        max_attempts: config.max_attempts.max(1),
        attempt: AtomicU32::new(0),
        phase: Mutex::new(SessionPhase::Polling),
        last_error: Mutex::new(None),
        cancel_tx,
        outcome_tx,
        events,
    });

    let handle = PollHandle {
        shared: Arc::clone(&shared),
        outcome_rx,
    };

    debug!(
        "Poll session {} started for '{}' (interval {:?}, budget {})",
        shared.session_id, shared.key, config.interval, shared.max_attempts
    );

    tokio::spawn(async move {
        loop {
            // One interval between the previous query resolving and the next
            // one being issued; a stop() aborts the wait.
            tokio::select! {
                _ = tokio::time::sleep(config.interval) => {}
                _ = cancel_rx.changed() => break,
            }

            let attempt = shared.attempt.fetch_add(1, Ordering::AcqRel) + 1;

            let result = tokio::select! {
                result = query() => result,
                _ = cancel_rx.changed() => break,
            };

            match result {
                Ok(status) if is_terminal(&status) => {
                    if shared.finish(
                        SessionPhase::Complete,
                        PollEvent::Complete {
                            status: status.clone(),
                        },
                        PollOutcome::Complete(status),
                    ) {
                        debug!(
                            "Poll session {} for '{}' complete after {} attempts",
                            shared.session_id, shared.key, attempt
                        );
                    }
                    break;
                }
                Ok(status) => {
                    if !shared.publish_tick(PollEvent::Tick { attempt, status }) {
                        break;
                    }
                }
                Err(e) => {
                    let text = e.to_string();
                    // Recorded before the event goes out, so a subscriber
                    // reading `last_error` on receipt sees this failure.
                    shared.record_error(text.clone());
                    if !shared.publish_tick(PollEvent::TickError {
                        attempt,
                        error: text.clone(),
                    }) {
                        break;
                    }
                    warn!(
                        "Poll session {} for '{}': attempt {} failed: {}",
                        shared.session_id, shared.key, attempt, text
                    );
                }
            }

            if attempt >= shared.max_attempts {
                if shared.finish(
                    SessionPhase::TimedOut,
                    PollEvent::TimedOut { attempts: attempt },
                    PollOutcome::TimedOut,
                ) {
                    debug!(
                        "Poll session {} for '{}' timed out after {} attempts",
                        shared.session_id, shared.key, attempt
                    );
                }
                break;
            }
        }

        // Drop the registry entry unless a newer session took the key.
        let mut sessions = lock_sessions(&sessions);
        if let Some(current) = sessions.get(&shared.key) {
            if current.shared.session_id == shared.session_id {
                sessions.remove(&shared.key);
            }
        }
    });

    handle
}
