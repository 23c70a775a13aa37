//! A deterministic ledger that executes nothing, and records what consensus asks of it.

use ed25519_dalek::VerifyingKey;
use epoch_bft::{
    ledger::{CommittedUpdate, Ledger},
    types::{
        basic::{Data, Datum, EpochNumber, ViewNumber},
        vertex::{LedgerHeader, Vertex},
    },
    vertex_store::PreparedVertex,
};

/// A ledger whose state version counts the vertices on a branch.
///
/// If `epoch_length` is set, the vertex that brings the state version to a multiple of it ends the epoch.
/// Every vertex after it in the same epoch carries the same ledger header.
pub(crate) struct MockLedger {
    epoch_length: Option<u64>,
    committed: Vec<PreparedVertex>,
    sync_requests: Vec<(LedgerHeader, Vec<VerifyingKey>)>,
    epoch_ends: Vec<LedgerHeader>,
}

impl MockLedger {
    pub(crate) fn new(epoch_length: Option<u64>) -> MockLedger {
        MockLedger {
            epoch_length,
            committed: Vec::new(),
            sync_requests: Vec::new(),
            epoch_ends: Vec::new(),
        }
    }

    pub(crate) fn committed(&self) -> &[PreparedVertex] {
        &self.committed
    }

    /// Number of committed vertices that belong to `epoch`.
    pub(crate) fn committed_in(&self, epoch: EpochNumber) -> usize {
        self.committed
            .iter()
            .filter(|prepared| prepared.vertex.epoch == epoch)
            .count()
    }

    pub(crate) fn sync_requests(&self) -> &[(LedgerHeader, Vec<VerifyingKey>)] {
        &self.sync_requests
    }

    /// Take the headers of committed vertices that ended an epoch, oldest first.
    pub(crate) fn take_epoch_ends(&mut self) -> Vec<LedgerHeader> {
        std::mem::take(&mut self.epoch_ends)
    }
}

impl Ledger for MockLedger {
    fn prepare(&mut self, _previous: &[Vertex], vertex: &Vertex) -> Option<LedgerHeader> {
        let parent = vertex.parent_header().ledger_header;
        if parent.is_end_of_epoch {
            return Some(parent);
        }

        let state_version = parent.state_version + 1;
        Some(LedgerHeader {
            epoch: vertex.epoch,
            state_version,
            accumulator: vertex.id,
            timestamp: 0,
            is_end_of_epoch: self
                .epoch_length
                .map_or(false, |epoch_length| state_version % epoch_length == 0),
        })
    }

    fn next_commands(&mut self, view: ViewNumber, _prepared: &[Vertex]) -> Data {
        Data::new(vec![Datum::new(view.int().to_le_bytes().to_vec())])
    }

    fn commit(&mut self, update: CommittedUpdate) {
        for prepared in update.committed {
            if prepared.ledger_header.is_end_of_epoch
                && !self.epoch_ends.contains(&prepared.ledger_header)
                && !self
                    .committed
                    .iter()
                    .any(|committed| committed.ledger_header == prepared.ledger_header)
            {
                self.epoch_ends.push(prepared.ledger_header);
            }
            self.committed.push(prepared);
        }
    }

    fn request_sync(&mut self, target: LedgerHeader, peers: Vec<VerifyingKey>) {
        self.sync_requests.push((target, peers));
    }
}
