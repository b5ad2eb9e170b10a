//! Contact table — who can be reached, and where.
//!
//! A concurrent map from peer name to [`PeerRecord`], shared by the
//! discovery engine (writer), the exchange engine (reader) and the
//! presentation layer. Every mutation is one atomic upsert or remove;
//! the last writer for a name wins.

use std::sync::Arc;

use dashmap::DashMap;
use lanchat_core::PeerRecord;

#[derive(Clone, Default)]
pub struct ContactTable {
    peers: Arc<DashMap<String, PeerRecord>>,
}

impl ContactTable {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
        }
    }

    /// Insert or overwrite the record for `record.name`.
    /// Returns the record it replaced, if any.
    pub fn upsert(&self, record: PeerRecord) -> Option<PeerRecord> {
        self.peers.insert(record.name.clone(), record)
    }

    /// Remove a peer. Absent names are a no-op.
    pub fn remove(&self, name: &str) -> Option<PeerRecord> {
        self.peers.remove(name).map(|(_, record)| record)
    }

    pub fn get(&self, name: &str) -> Option<PeerRecord> {
        self.peers.get(name).map(|r| r.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Point-in-time copy of every record, sorted by name.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.peers.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }
}
