//! In-flight registry of metadata records handed to the Portal.
//!
//! One entry per metadata id. [`WaitingRoom::admit`] performs the
//! check-then-insert under a single lock acquisition, so two concurrent
//! sends of the same record can never both be admitted. Entries older than
//! the configured timeout are invisible to every lookup and are freed by
//! [`WaitingRoom::purge_expired`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use rudi_core::types::{MetadataId, ReportId};

/// A record currently awaiting its Portal integration report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitingEntry {
    pub metadata_id: MetadataId,
    /// `updatedAt` of the record version that was admitted.
    pub updated_at: DateTime<Utc>,
    pub wait_since: DateTime<Utc>,
    /// Set once the Portal's POST/PUT answer carries a report id.
    pub report_id: Option<ReportId>,
}

impl WaitingEntry {
    fn is_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now - self.wait_since > timeout
    }

    fn ticket(&self) -> WaitTicket {
        WaitTicket {
            metadata_id: self.metadata_id,
            updated_at: self.updated_at,
            wait_since: self.wait_since,
        }
    }
}

/// Identifies one admission, so a late caller cannot remove a newer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTicket {
    pub metadata_id: MetadataId,
    pub updated_at: DateTime<Utc>,
    pub wait_since: DateTime<Utc>,
}

impl WaitTicket {
    fn matches(&self, entry: &WaitingEntry) -> bool {
        entry.ticket() == *self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted(WaitTicket),
    /// A live entry already covers this version (or a newer one).
    AlreadyWaiting(WaitingEntry),
}

#[derive(Debug)]
pub struct WaitingRoom {
    timeout: chrono::Duration,
    entries: Mutex<HashMap<MetadataId, WaitingEntry>>,
}

impl WaitingRoom {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> chrono::Duration {
        self.timeout
    }

    // Nothing in here panics while holding the lock, but a poisoned map is
    // still consistent: every mutation is a single insert or remove.
    fn lock(&self) -> MutexGuard<'_, HashMap<MetadataId, WaitingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `metadata_id` at version `updated_at` unless a live entry for
    /// the same or a newer version exists.
    pub fn admit(&self, metadata_id: MetadataId, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> Admission {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(&metadata_id) {
            if !entry.is_expired(now, self.timeout) && entry.updated_at >= updated_at {
                return Admission::AlreadyWaiting(entry.clone());
            }
        }
        let entry = WaitingEntry {
            metadata_id,
            updated_at,
            wait_since: now,
            report_id: None,
        };
        let ticket = entry.ticket();
        entries.insert(metadata_id, entry);
        Admission::Admitted(ticket)
    }

    /// The live entry for `metadata_id`, if any.
    pub fn get(&self, metadata_id: &MetadataId, now: DateTime<Utc>) -> Option<WaitingEntry> {
        self.lock()
            .get(metadata_id)
            .filter(|entry| !entry.is_expired(now, self.timeout))
            .cloned()
    }

    /// Record the Portal report id on the entry admitted with `ticket`.
    /// Returns `false` if that entry is gone or was replaced.
    pub fn attach_report(&self, ticket: &WaitTicket, report_id: ReportId) -> bool {
        let mut entries = self.lock();
        match entries
            .get_mut(&ticket.metadata_id)
            .filter(|entry| ticket.matches(entry))
        {
            Some(entry) => {
                entry.report_id = Some(report_id);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, metadata_id: &MetadataId) -> Option<WaitingEntry> {
        self.lock().remove(metadata_id)
    }

    /// Remove the entry only if it is still the one admitted with `ticket`.
    pub fn remove_if_matches(&self, ticket: &WaitTicket) -> bool {
        let mut entries = self.lock();
        let current = entries
            .get(&ticket.metadata_id)
            .is_some_and(|entry| ticket.matches(entry));
        if current {
            entries.remove(&ticket.metadata_id);
        }
        current
    }

    /// Drop every entry whose wait exceeded the timeout; returns them.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<WaitingEntry> {
        let mut entries = self.lock();
        let expired: Vec<MetadataId> = entries
            .values()
            .filter(|entry| entry.is_expired(now, self.timeout))
            .map(|entry| entry.metadata_id)
            .collect();
        expired
            .iter()
            .filter_map(|id| entries.remove(id))
            .collect()
    }

    /// Live entries, oldest first.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<WaitingEntry> {
        let mut live: Vec<WaitingEntry> = self
            .lock()
            .values()
            .filter(|entry| !entry.is_expired(now, self.timeout))
            .cloned()
            .collect();
        live.sort_by(|a, b| {
            a.wait_since
                .cmp(&b.wait_since)
                .then_with(|| a.metadata_id.cmp(&b.metadata_id))
        });
        live
    }

    /// Number of entries held, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
