//! Local job snapshot cache with staleness protection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use log::{debug, warn};

use crate::api::types::JobSnapshot;

struct CacheEntry {
    snapshot: JobSnapshot,
    read_seq: u64,
}

/// Snapshot store for the jobs a client session is observing.
///
/// The remote API carries no response versioning, so each read is stamped
/// with a monotonic sequence number before the request goes out, and an
/// apply carrying an older stamp than the last accepted one is discarded.
/// That is what keeps a slow response from regressing an already observed
/// terminal status; a newer read moving FAILED back to PROCESSING is a real
/// re-trigger and goes through. Reads are safe from any number of
/// observers; writes come from the poll and trigger paths.
pub struct JobCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    next_seq: AtomicU64,
}

impl JobCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Stamps a status read that is about to be issued.
    pub fn next_read_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Applies a fetched snapshot. Returns false when the snapshot was
    /// discarded as stale.
    pub fn apply(&self, snapshot: JobSnapshot, read_seq: u64) -> bool {
        let mut entries = match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Job cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };

        match entries.get_mut(&snapshot.id) {
            Some(entry) => {
                if read_seq < entry.read_seq {
                    warn!(
                        "Discarding stale status read for job {} (seq {} < {})",
                        snapshot.id, read_seq, entry.read_seq
                    );
                    return false;
                }
                if entry.snapshot.status.is_terminal() && !snapshot.status.is_terminal() {
                    // Newer read, so this is a re-trigger, not a stale response.
                    debug!(
                        "Job {} moved from {} back to {}",
                        snapshot.id, entry.snapshot.status, snapshot.status
                    );
                }
                entry.snapshot = snapshot;
                entry.read_seq = read_seq;
                true
            }
            None => {
                entries.insert(
                    snapshot.id.clone(),
                    CacheEntry { snapshot, read_seq },
                );
                true
            }
        }
    }

    /// Returns the cached snapshot for a job, if any.
    pub fn get(&self, job_id: &str) -> Option<JobSnapshot> {
        let entries = match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Job cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        entries.get(job_id).map(|entry| entry.snapshot.clone())
    }
}

impl Default for JobCache {
    fn default() -> Self {
        Self::new()
    }
}
