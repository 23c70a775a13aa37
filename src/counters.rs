/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Operational counters.
//!
//! Counters only ever increase. They are shared between the epoch manager and every pipeline it builds
//! through an `Arc<SystemCounters>`, so they survive epoch changes.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterType {
    /// Consensus events dropped because they belong to a past epoch.
    DiscardedConsensusEvents,
    /// Consensus events held for a future epoch.
    BufferedConsensusEvents,
    /// Buffered consensus events evicted or superseded before their epoch started.
    EvictedConsensusEvents,
    /// Consensus events dropped because this replica is not a validator of the current epoch.
    InertDroppedEvents,
    /// Consensus events of the current epoch dropped because their view has passed or is too far ahead.
    StaleViewEvents,
    ProposalsMade,
    VotesCast,
    /// Votes or proposals that Safety Rules refused to sign.
    SafetyRefusals,
    TimeoutVotesCast,
    LocalTimeouts,
    QuorumCertificatesFormed,
    TimeoutCertificatesFormed,
    VotesRejected,
    VerticesInserted,
    VerticesCommitted,
    VerticesPruned,
    /// Vertices rejected as malformed or as extending a pruned ancestor.
    InvalidVertices,
    SyncRequestsSent,
    SyncRequestTimeouts,
    SyncErrorResponses,
    SyncInvalidResponses,
    SyncLedgerEscalations,
    /// Syncs that waited for the ledger longer than the ledger sync timeout.
    SyncLedgerTimeouts,
    SyncRequestsServed,
    EpochChanges,
}

const COUNTER_TYPES: usize = CounterType::EpochChanges as usize + 1;

pub struct SystemCounters {
    counts: [AtomicU64; COUNTER_TYPES],
}

impl SystemCounters {
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn increment(&self, counter: CounterType) {
        self.add(counter, 1)
    }

    pub fn add(&self, counter: CounterType, amount: u64) {
        self.counts[counter as usize].fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self, counter: CounterType) -> u64 {
        self.counts[counter as usize].load(Ordering::Relaxed)
    }
}

impl Default for SystemCounters {
    fn default() -> Self {
        Self::new()
    }
}
