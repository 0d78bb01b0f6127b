//! Billing-plan reconciliation after checkout.
//!
//! The provider's webhook updates lag behind the browser redirect, so right
//! after the user returns from checkout the subscription endpoint may still
//! serve the old plan. `SubscriptionSync` polls it until the plan visibly
//! changes from the pre-redirect baseline (or a small attempt budget runs
//! out), refreshes the local snapshot exactly once, and consumes the
//! one-time redirect signal so a reload does not sync again.

pub mod location;

pub use location::{CheckoutSignal, ClientLocation};

use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::api::types::SubscriptionSnapshot;
use crate::api::{ApiError, BillingApi};
use crate::config::BillingSyncConfig;
use crate::poll::{PollConfig, PollEvent, PollHandle, StatusPoller};

/// Registry key for the single reconciliation session.
const SYNC_SESSION_KEY: &str = "subscription-sync";

/// Errors surfaced by billing operations.
#[derive(Error, Debug)]
pub enum BillingError {
    #[error("billing service call failed: {0}")]
    Api(#[from] ApiError),
}

/// Notifications published while the subscription cache is reconciled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BillingEvent {
    /// Reconciliation started after a checkout or portal return.
    SyncStarted { attempt_cap: u32 },
    /// One attempt finished without observing a change yet.
    SyncProgress { attempt: u32, attempt_cap: u32 },
    /// The provider now reflects the checkout; the cache was refreshed.
    Synced { subscription: SubscriptionSnapshot },
    /// The window closed before the provider caught up. The checkout may
    /// still land shortly; the cached snapshot was left untouched.
    SyncTimedOut { attempts: u32 },
}

/// Broadcasts billing events to any number of observers.
#[derive(Clone)]
pub struct BillingBroadcaster {
    sender: Arc<broadcast::Sender<BillingEvent>>,
}

impl BillingBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: BillingEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BillingEvent> {
        self.sender.subscribe()
    }
}

impl Default for BillingBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Reconciles the cached subscription with the payment provider after the
/// user returns from an external checkout or portal page.
///
/// Dropping the sync cancels a running session.
pub struct SubscriptionSync {
    api: Arc<dyn BillingApi>,
    poller: StatusPoller<SubscriptionSnapshot>,
    cached: Arc<RwLock<Option<SubscriptionSnapshot>>>,
    location: Arc<ClientLocation>,
    broadcaster: BillingBroadcaster,
    poll_config: PollConfig,
    // Session id of the session that consumed the current redirect. Held
    // from session creation until the signal is stripped (or the session is
    // stopped), so the finished-but-not-yet-stripped window cannot admit a
    // second session for the same redirect.
    claim: Arc<Mutex<Option<String>>>,
}

impl SubscriptionSync {
    pub fn new(
        api: Arc<dyn BillingApi>,
        location: Arc<ClientLocation>,
        config: &BillingSyncConfig,
    ) -> Self {
        Self::with_poll_config(api, location, config.poll_config())
    }

    pub fn with_poll_config(
        api: Arc<dyn BillingApi>,
        location: Arc<ClientLocation>,
        poll_config: PollConfig,
    ) -> Self {
        Self {
            api,
            poller: StatusPoller::new(),
            cached: Arc::new(RwLock::new(None)),
            location,
            broadcaster: BillingBroadcaster::default(),
            poll_config,
            claim: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribes to billing events.
    pub fn subscribe(&self) -> broadcast::Receiver<BillingEvent> {
        self.broadcaster.subscribe()
    }

    /// Currently cached subscription snapshot.
    pub fn cached(&self) -> Option<SubscriptionSnapshot> {
        let guard = match self.cached.read() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Subscription cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }

    /// True while a reconciliation session is running.
    pub fn sync_in_progress(&self) -> bool {
        self.poller.get(SYNC_SESSION_KEY).is_some()
    }

    /// Fetches the subscription and replaces the cache. Plain refresh used
    /// on view load; no session is involved.
    pub async fn refresh(&self) -> Result<SubscriptionSnapshot, BillingError> {
        let snapshot = self.api.fetch_subscription().await?;
        store_snapshot(&self.cached, snapshot.clone());
        Ok(snapshot)
    }

    /// Starts reconciliation when the one-time checkout-return signal is
    /// present in the location.
    ///
    /// Returns `None` without doing anything when no signal is set. Each
    /// redirect is claimed by exactly one session: a call while that session
    /// runs joins it, and a call after it ended but before its terminal
    /// effects landed gets `None`, so re-rendering views cannot start
    /// duplicate sessions or duplicate notifications. The pre-redirect
    /// snapshot is the baseline: the session completes on the first read
    /// that differs from it (any read, if there is no baseline).
    pub fn start_after_checkout(&self) -> Option<PollHandle<SubscriptionSnapshot>> {
        let signal = self.location.checkout_signal()?;

        let mut claim = lock_claim(&self.claim);
        if let Some(owner) = claim.as_deref() {
            if let Some(handle) = self.poller.get(SYNC_SESSION_KEY) {
                if handle.session_id() == owner {
                    debug!("Subscription sync already running, joining");
                    return Some(handle);
                }
            }
            // The owning session ended; its listener is still storing the
            // snapshot and stripping the signal.
            debug!("Checkout redirect already claimed by session {}", owner);
            return None;
        }

        let baseline = self.cached();
        let api = Arc::clone(&self.api);
        let query = move || {
            let api = Arc::clone(&api);
            async move { api.fetch_subscription().await }
        };
        let is_terminal = move |current: &SubscriptionSnapshot| match baseline.as_ref() {
            Some(before) => current.differs_from(before),
            None => true,
        };

        let (handle, created) =
            self.poller
                .start(SYNC_SESSION_KEY, self.poll_config, query, is_terminal);
        if created {
            *claim = Some(handle.session_id().to_string());
            drop(claim);
            info!(
                "Subscription sync started after {} (cap {} attempts)",
                describe_signal(&signal),
                handle.max_attempts()
            );
            self.broadcaster.send(BillingEvent::SyncStarted {
                attempt_cap: handle.max_attempts(),
            });
            self.spawn_listener(&handle);
        } else {
            debug!("Subscription sync already running, joining");
        }
        Some(handle)
    }

    /// Cancels a running reconciliation session, e.g. on owner teardown.
    /// The signal is left in place and the redirect claim is released, so a
    /// later mount can pick the same checkout up again.
    pub fn stop(&self) {
        if let Some(handle) = self.poller.get(SYNC_SESSION_KEY) {
            if handle.stop() {
                release_claim(&self.claim, handle.session_id());
            }
        }
    }

    /// Applies one session's terminal outcome: refresh the cache and strip
    /// the signal on success, strip only on timeout. The redirect claim is
    /// released once the signal is gone.
    fn spawn_listener(&self, handle: &PollHandle<SubscriptionSnapshot>) {
        let broadcaster = self.broadcaster.clone();
        let cached = Arc::clone(&self.cached);
        let client_location = Arc::clone(&self.location);
        let claim = Arc::clone(&self.claim);
        let session = handle.session_id().to_string();
        let attempt_cap = handle.max_attempts();
        let mut rx = handle.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(PollEvent::Tick { attempt, .. }) => {
                        broadcaster.send(BillingEvent::SyncProgress {
                            attempt,
                            attempt_cap,
                        });
                    }
                    Ok(PollEvent::TickError { attempt, error }) => {
                        debug!("Subscription read failed on attempt {}: {}", attempt, error);
                    }
                    Ok(PollEvent::Complete { status }) => {
                        store_snapshot(&cached, status.clone());
                        let cleaned = client_location.strip_checkout_signal();
                        release_claim(&claim, &session);
                        info!(
                            "Subscription sync complete (plan {}, status {}); location is now {}",
                            status.plan, status.status, cleaned
                        );
                        broadcaster.send(BillingEvent::Synced {
                            subscription: status,
                        });
                        break;
                    }
                    Ok(PollEvent::TimedOut { attempts }) => {
                        let _ = client_location.strip_checkout_signal();
                        release_claim(&claim, &session);
                        info!(
                            "Subscription sync window closed after {} attempts; provider may still be settling",
                            attempts
                        );
                        broadcaster.send(BillingEvent::SyncTimedOut { attempts });
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Billing listener lagged by {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Session gone without a terminal event: cancelled.
                        // The signal stays, but the claim must not outlive
                        // the session that held it.
                        release_claim(&claim, &session);
                        break;
                    }
                }
            }
        });
    }
}

fn store_snapshot(cached: &RwLock<Option<SubscriptionSnapshot>>, snapshot: SubscriptionSnapshot) {
    let mut guard = match cached.write() {
        Ok(g) => g,
        Err(poisoned) => {
            warn!("Subscription cache lock was poisoned, recovering");
            poisoned.into_inner()
        }
    };
    *guard = Some(snapshot);
}

fn lock_claim(claim: &Mutex<Option<String>>) -> std::sync::MutexGuard<'_, Option<String>> {
    match claim.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            warn!("Redirect claim lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Releases the redirect claim, but only if `session` still owns it.
fn release_claim(claim: &Mutex<Option<String>>, session: &str) {
    let mut guard = lock_claim(claim);
    if guard.as_deref() == Some(session) {
        *guard = None;
    }
}

fn describe_signal(signal: &CheckoutSignal) -> &'static str {
    match signal {
        CheckoutSignal::CheckoutSuccess { .. } => "checkout return",
        CheckoutSignal::PortalReturn => "portal return",
    }
}
