/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pluggable [`Ledger`] trait: the transaction executor that turns vertices into chain state.
//!
//! The consensus core never interprets commands. It asks the ledger to:
//! 1. [`prepare`](Ledger::prepare) a vertex on top of its uncommitted ancestors, yielding the
//!    [`LedgerHeader`] that votes for the vertex certify,
//! 2. produce the commands of the vertices this replica proposes ([`next_commands`](Ledger::next_commands)),
//! 3. [`commit`](Ledger::commit) vertices once the 3-chain rule has decided them, and
//! 4. [`request_sync`](Ledger::request_sync) to a committed header that this replica has fallen behind of.
//!
//! The ledger reports back asynchronously, by having the runtime deliver a [`LedgerUpdate`] to
//! [`EpochManager::process_ledger_update`](crate::epoch_manager::EpochManager::process_ledger_update).
//! When committing a vertex ends the epoch, that update carries the [`EpochChange`].

use ed25519_dalek::VerifyingKey;

use crate::{
    epoch_manager::types::EpochChange,
    types::{
        basic::{Data, ViewNumber},
        certificates::QuorumCertificate,
        vertex::{LedgerHeader, Vertex},
    },
    vertex_store::PreparedVertex,
};

pub trait Ledger {
    /// Execute `vertex` on top of `previous`, the uncommitted vertices between the vertex store's root and
    /// `vertex`'s parent (oldest first).
    ///
    /// Returns `None` if the vertex's commands are invalid, in which case the vertex is not inserted. The
    /// returned header's `epoch` must be the vertex's epoch.
    fn prepare(&mut self, previous: &[Vertex], vertex: &Vertex) -> Option<LedgerHeader>;

    /// Produce the commands of a vertex that this replica is about to propose at `view`, on top of
    /// `prepared` (oldest first).
    fn next_commands(&mut self, view: ViewNumber, prepared: &[Vertex]) -> Data;

    /// Commit the vertices in `update`. Must not block on execution.
    fn commit(&mut self, update: CommittedUpdate);

    /// Start ledger-level sync to `target`, fetching from `peers`. Completion is reported as a
    /// [`LedgerUpdate`].
    fn request_sync(&mut self, target: LedgerHeader, peers: Vec<VerifyingKey>);
}

/// Vertices that became committed, oldest first, together with the QC that committed them.
#[derive(Clone, Debug)]
pub struct CommittedUpdate {
    pub committed: Vec<PreparedVertex>,
    pub proof: QuorumCertificate,
}

/// Notification that the ledger's committed state has advanced to `header`.
#[derive(Clone, Debug)]
pub struct LedgerUpdate {
    pub header: LedgerHeader,
    pub epoch_change: Option<EpochChange>,
}
