/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-epoch state of a replica, as one owned, replaceable value.

use std::sync::{mpsc::Sender, Arc};

use ed25519_dalek::VerifyingKey;

use crate::{
    bft_sync::BFTSyncConfiguration,
    counters::{CounterType, SystemCounters},
    events::Event,
    ledger::Ledger,
    networking::{messages::ConsensusEvent, network::Network},
    pacemaker::PacemakerConfiguration,
    safety_rules::pluggables::KVStore,
    scheduler::Scheduler,
    types::{basic::EpochNumber, crypto_primitives::Keypair, vertex::LedgerHeader},
};

use super::{
    implementation::EpochManagerError,
    pipeline::{BFTPipeline, ConsensusError},
    types::{BFTConfiguration, EpochChange},
};

/// What a replica needs to build the pipeline of any epoch. Outlives every epoch.
pub(crate) struct EpochResources<N: Network, K: KVStore, S: Scheduler> {
    pub(crate) keypair: Keypair,
    pub(crate) pacemaker_config: PacemakerConfiguration,
    pub(crate) bft_sync_config: BFTSyncConfiguration,
    pub(crate) max_queued_events_per_view: usize,
    pub(crate) network: N,
    pub(crate) kv_store: K,
    pub(crate) scheduler: S,
    pub(crate) event_publisher: Option<Sender<Event>>,
    pub(crate) counters: Arc<SystemCounters>,
}

impl<N: Network, K: KVStore, S: Scheduler> EpochResources<N, K, S> {
    pub(crate) fn me(&self) -> VerifyingKey {
        self.keypair.public()
    }
}

/// The consensus state of the current epoch.
pub enum EpochContext<N: Network, K: KVStore, S: Scheduler> {
    /// This replica is a validator of the epoch and runs its consensus pipeline.
    Active(Box<BFTPipeline<N, K, S>>),
    /// This replica is not a validator of the epoch. It drops consensus traffic and only follows the
    /// ledger.
    Inert {
        epoch: EpochNumber,
        ledger_header: LedgerHeader,
    },
}

impl<N: Network, K: KVStore, S: Scheduler> EpochContext<N, K, S> {
    /// Build the context of `epoch`: a fresh pipeline if this replica is in the epoch's validator set, an
    /// inert context otherwise.
    pub(crate) fn new<L: Ledger>(
        epoch: EpochNumber,
        bft_configuration: BFTConfiguration,
        resources: &EpochResources<N, K, S>,
        ledger: &mut L,
    ) -> Result<Self, ConsensusError> {
        if bft_configuration.validator_set.contains(&resources.me()) {
            let pipeline = BFTPipeline::new(epoch, bft_configuration, resources, ledger)?;
            Ok(EpochContext::Active(Box::new(pipeline)))
        } else {
            Ok(EpochContext::Inert {
                epoch,
                ledger_header: bft_configuration
                    .vertex_store_state
                    .root_header()
                    .ledger_header,
            })
        }
    }

    /// Build the context of the epoch that `epoch_change` starts. The epoch must directly follow this
    /// context's epoch.
    pub(crate) fn next<L: Ledger>(
        &self,
        epoch_change: &EpochChange,
        resources: &EpochResources<N, K, S>,
        ledger: &mut L,
    ) -> Result<Self, EpochManagerError> {
        let current = self.epoch();
        if epoch_change.epoch != current.next() {
            return Err(EpochManagerError::NonSequentialEpochChange {
                current,
                received: epoch_change.epoch,
            });
        }

        Ok(Self::new(
            epoch_change.epoch,
            epoch_change.bft_configuration.clone(),
            resources,
            ledger,
        )?)
    }

    pub fn epoch(&self) -> EpochNumber {
        match self {
            EpochContext::Active(pipeline) => pipeline.epoch(),
            EpochContext::Inert { epoch, .. } => *epoch,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, EpochContext::Active(_))
    }

    pub fn pipeline(&self) -> Option<&BFTPipeline<N, K, S>> {
        match self {
            EpochContext::Active(pipeline) => Some(&**pipeline),
            EpochContext::Inert { .. } => None,
        }
    }

    pub(crate) fn pipeline_mut(&mut self) -> Option<&mut BFTPipeline<N, K, S>> {
        match self {
            EpochContext::Active(pipeline) => Some(&mut **pipeline),
            EpochContext::Inert { .. } => None,
        }
    }

    /// Hand a consensus event of this epoch to the pipeline, or drop it if the context is inert.
    pub(crate) fn process_consensus_event<L: Ledger>(
        &mut self,
        origin: VerifyingKey,
        event: ConsensusEvent,
        counters: &SystemCounters,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        match self {
            EpochContext::Active(pipeline) => pipeline.process_consensus_event(origin, event, ledger),
            EpochContext::Inert { .. } => {
                counters.increment(CounterType::InertDroppedEvents);
                Ok(())
            }
        }
    }

    pub(crate) fn process_ledger_update<L: Ledger>(
        &mut self,
        header: LedgerHeader,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        match self {
            EpochContext::Active(pipeline) => pipeline.process_ledger_update(header, ledger),
            EpochContext::Inert { ledger_header, .. } => {
                if header.state_version > ledger_header.state_version {
                    *ledger_header = header;
                }
                Ok(())
            }
        }
    }

    /// The latest ledger header this context knows the ledger to have committed.
    pub fn ledger_header(&self) -> LedgerHeader {
        match self {
            EpochContext::Active(pipeline) => pipeline.vertex_store().root_header().ledger_header,
            EpochContext::Inert { ledger_header, .. } => *ledger_header,
        }
    }
}
