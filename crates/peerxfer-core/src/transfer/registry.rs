//! Ordered ownership of all transfer records of a session.
//!
//! Records keep their insertion order, which is also the display order used
//! by index-based commands. A side index maps the key of every active record
//! to its position; finished records drop out of it and are only reachable by
//! position until they are swept.

use std::collections::HashMap;

use super::{ControlSignal, PeerId, TransferId, TransferKey, TransferRecord};

/// All transfers of one session.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    records: Vec<TransferRecord>,
    active: HashMap<TransferKey, usize>,
}

impl TransferRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `record` and return its display index.
    ///
    /// A transport never reuses the key of an active transfer; if it does
    /// anyway, the older record is treated as cancelled by the peer.
    pub fn insert(&mut self, record: TransferRecord) -> usize {
        let index = self.records.len();

        if let Some(key) = record.key() {
            if let Some(stale) = self.active.remove(&key) {
                tracing::warn!(
                    "Transfer #{} from peer {} replaced an active transfer",
                    key.transfer,
                    key.peer
                );
                if let Some(old) = self.records.get_mut(stale) {
                    old.on_control(ControlSignal::Cancel);
                }
            }
            self.active.insert(key, index);
        }

        self.records.push(record);
        index
    }

    /// Display index of the active transfer `(peer, transfer)`.
    #[must_use]
    pub fn position(&self, peer: PeerId, transfer: TransferId) -> Option<usize> {
        let key = TransferKey::new(peer, transfer);
        self.active
            .get(&key)
            .copied()
            .filter(|&i| self.records.get(i).and_then(TransferRecord::key) == Some(key))
    }

    /// Active transfer `(peer, transfer)`.
    #[must_use]
    pub fn find(&self, peer: PeerId, transfer: TransferId) -> Option<&TransferRecord> {
        self.position(peer, transfer).and_then(|i| self.records.get(i))
    }

    /// Active transfer `(peer, transfer)`, mutably.
    pub fn find_mut(&mut self, peer: PeerId, transfer: TransferId) -> Option<&mut TransferRecord> {
        self.position(peer, transfer)
            .and_then(move |i| self.records.get_mut(i))
    }

    /// Record at display `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TransferRecord> {
        self.records.get(index)
    }

    /// Record at display `index`, mutably.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut TransferRecord> {
        self.records.get_mut(index)
    }

    /// Drop the record at `index` from the active index if it has finished.
    pub fn retire(&mut self, index: usize) {
        let Some(record) = self.records.get(index) else {
            return;
        };
        if record.key().is_some() {
            return;
        }

        let key = TransferKey::new(record.peer_id(), record.transfer_id());
        if self.active.get(&key) == Some(&index) {
            self.active.remove(&key);
        }
    }

    /// Remove every finished record and return how many were removed.
    ///
    /// Later records move up, so display indices change.
    pub fn remove_terminal(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !r.status().is_terminal());
        self.reindex();
        before - self.records.len()
    }

    /// Update the peer label on all records for `peer`.
    pub fn rename_peer(&mut self, peer: PeerId, name: &str) -> usize {
        let mut renamed = 0;
        for record in self.records.iter_mut().filter(|r| r.peer_id() == peer) {
            record.set_peer_display_name(name);
            renamed += 1;
        }
        renamed
    }

    /// Drop all records, closing any files still open.
    pub fn clear(&mut self) {
        self.records.clear();
        self.active.clear();
    }

    /// Records in display order.
    pub fn iter(&self) -> impl Iterator<Item = &TransferRecord> {
        self.records.iter()
    }

    /// Number of records, finished ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records that are not finished.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !r.status().is_terminal())
            .count()
    }

    fn reindex(&mut self) {
        self.active = self
            .records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.key().map(|key| (key, i)))
            .collect();
    }
}
