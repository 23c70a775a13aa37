/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that describe an epoch and tag events with the epoch they belong to.

use crate::{
    types::{basic::EpochNumber, validators::ValidatorSet, vertex::LedgerHeader},
    vertex_store::VertexStoreState,
};

/// An event tagged with the epoch it was produced in. Events whose epoch has passed are ignored when
/// they are delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Epoched<T> {
    pub epoch: EpochNumber,
    pub event: T,
}

impl<T> Epoched<T> {
    pub fn new(epoch: EpochNumber, event: T) -> Self {
        Self { epoch, event }
    }
}

/// Everything needed to start consensus in an epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BFTConfiguration {
    pub validator_set: ValidatorSet,
    /// The state the epoch's vertex store starts from. For a new epoch, this is the epoch's genesis.
    pub vertex_store_state: VertexStoreState,
}

/// Produced by the ledger when committing a vertex ends an epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpochChange {
    /// The epoch that starts.
    pub epoch: EpochNumber,
    /// The committed ledger header that ended the previous epoch.
    pub proof: LedgerHeader,
    pub bft_configuration: BFTConfiguration,
}
