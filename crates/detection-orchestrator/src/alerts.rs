use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use sentinel_core::{Alert, Assessment};

pub const DEFAULT_CAPACITY: usize = 10;

/// Fixed-capacity, most-recent-first buffer of published alerts.
///
/// Holds only the in-memory window; older alerts are evicted oldest-first.
/// No deduplication: repeated detections for one symbol coexist.
pub struct AlertFeed {
    entries: Mutex<VecDeque<Alert>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl AlertFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    /// Publish an assessment for a symbol: mints the alert id, stamps the
    /// time, prepends, and truncates to capacity.
    pub fn publish(&self, symbol: &str, assessment: Assessment) -> Alert {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let alert = Alert::from_assessment(id, symbol, assessment);

        let mut entries = self.lock_entries();
        entries.push_front(alert.clone());
        entries.truncate(self.capacity);
        alert
    }

    /// Snapshot of the current window, most recent first.
    pub fn list(&self) -> Vec<Alert> {
        self.lock_entries().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, VecDeque<Alert>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for AlertFeed {
    fn default() -> Self {
        Self::new()
    }
}
