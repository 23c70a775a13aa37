/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implementation of the [`EpochManager`].

use std::{
    sync::{mpsc::Sender, Arc},
    time::SystemTime,
};

use ed25519_dalek::VerifyingKey;

use crate::{
    bft_sync::messages::{LedgerSyncTimeout, VertexRequestTimeout},
    config::{ComponentConfigurations, Configuration},
    counters::{CounterType, SystemCounters},
    events::{BufferMessageEvent, DiscardMessageEvent, Event, StartEpochEvent},
    ledger::{Ledger, LedgerUpdate},
    networking::{
        messages::{ConsensusEvent, Message},
        network::Network,
        sending::SenderHandle,
    },
    pacemaker::types::{ScheduledLocalTimeout, ViewUpdate},
    safety_rules::pluggables::KVStore,
    scheduler::Scheduler,
    types::basic::{EpochNumber, ViewNumber},
};

use super::{
    buffer::{BufferInsertResult, EpochEventBuffer},
    context::{EpochContext, EpochResources},
    pipeline::ConsensusError,
    types::{BFTConfiguration, EpochChange, Epoched},
};

/// The root of the consensus core.
///
/// Every input of the core enters through one of the `EpochManager`'s methods, one at a time, and is
/// processed to completion before the method returns:
///
/// |Input|Method|
/// |---|---|
/// |A message from a peer|[`on_receive_msg`](Self::on_receive_msg)|
/// |A local timeout scheduled by the pacemaker|[`process_local_timeout`](Self::process_local_timeout)|
/// |A vertex request timeout scheduled by BFT Sync|[`process_vertex_request_timeout`](Self::process_vertex_request_timeout)|
/// |A ledger sync timeout scheduled by BFT Sync|[`process_ledger_sync_timeout`](Self::process_ledger_sync_timeout)|
/// |A notification from the ledger|[`process_ledger_update`](Self::process_ledger_update)|
///
/// Every method returns `Err` only on a failure that the replica cannot recover from. The caller must stop
/// the replica when that happens.
pub struct EpochManager<N: Network, K: KVStore, S: Scheduler> {
    context: EpochContext<N, K, S>,
    resources: EpochResources<N, K, S>,
    buffer: EpochEventBuffer,
}

impl<N: Network, K: KVStore, S: Scheduler> EpochManager<N, K, S> {
    /// Create the epoch manager of a replica resuming consensus in `epoch`, from `bft_configuration`.
    ///
    /// The returned epoch manager has not entered any view yet. Call [`start`](Self::start) before
    /// delivering any other input.
    pub fn new<L: Ledger>(
        configuration: Configuration,
        epoch: EpochNumber,
        bft_configuration: BFTConfiguration,
        mut network: N,
        kv_store: K,
        scheduler: S,
        ledger: &mut L,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, EpochManagerError> {
        let configs: ComponentConfigurations = configuration.into();
        network.update_validator_set(bft_configuration.validator_set.clone());

        let resources = EpochResources {
            keypair: configs.keypair,
            pacemaker_config: configs.pacemaker,
            bft_sync_config: configs.bft_sync,
            max_queued_events_per_view: configs.max_queued_events_per_view,
            network,
            kv_store,
            scheduler,
            event_publisher,
            counters: Arc::new(SystemCounters::new()),
        };
        let context = EpochContext::new(epoch, bft_configuration, &resources, ledger)?;

        Ok(Self {
            context,
            resources,
            buffer: EpochEventBuffer::new(configs.epoch_buffer),
        })
    }

    /// Start consensus in the current epoch: enter the first view after the high QC the epoch resumed
    /// from.
    pub fn start<L: Ledger>(&mut self, ledger: &mut L) -> Result<(), EpochManagerError> {
        self.start_epoch();
        self.process_view_updates(ledger)
    }

    pub fn epoch(&self) -> EpochNumber {
        self.context.epoch()
    }

    pub fn context(&self) -> &EpochContext<N, K, S> {
        &self.context
    }

    pub fn counters(&self) -> &Arc<SystemCounters> {
        &self.resources.counters
    }

    pub fn me(&self) -> VerifyingKey {
        self.resources.me()
    }

    /// The current view, if this replica is a validator of the current epoch.
    pub fn current_view(&self) -> Option<ViewNumber> {
        self.context.pipeline().map(|pipeline| pipeline.current_view())
    }

    /// Number of consensus events buffered for future epochs.
    pub fn buffered_events(&self) -> usize {
        self.buffer.len()
    }

    /// Process a message that `origin` sent to this replica.
    pub fn on_receive_msg<L: Ledger>(
        &mut self,
        origin: VerifyingKey,
        message: Message,
        ledger: &mut L,
    ) -> Result<(), EpochManagerError> {
        match message {
            Message::Consensus(event) => self.process_consensus_event(origin, event, ledger)?,
            Message::GetVerticesRequest(request) => {
                if let Some(pipeline) = self.context.pipeline_mut() {
                    pipeline.process_get_vertices_request(origin, request);
                }
            }
            Message::GetVerticesResponse(response) => {
                if let Some(pipeline) = self.context.pipeline_mut() {
                    pipeline.process_get_vertices_response(origin, response, ledger)?;
                }
            }
            Message::GetVerticesErrorResponse(response) => {
                if let Some(pipeline) = self.context.pipeline_mut() {
                    pipeline.process_get_vertices_error_response(origin, response, ledger)?;
                }
            }
        }

        self.process_view_updates(ledger)
    }

    /// Route a consensus event by its epoch: process it in the current epoch, buffer it for a future epoch,
    /// or discard it if its epoch has passed.
    fn process_consensus_event<L: Ledger>(
        &mut self,
        origin: VerifyingKey,
        event: ConsensusEvent,
        ledger: &mut L,
    ) -> Result<(), EpochManagerError> {
        let epoch = event.epoch();
        let current = self.epoch();

        if epoch < current {
            self.resources
                .counters
                .increment(CounterType::DiscardedConsensusEvents);
            Event::DiscardMessage(DiscardMessageEvent {
                timestamp: SystemTime::now(),
                origin,
                epoch,
                view: event.view(),
            })
            .publish(&self.resources.event_publisher);
            return Ok(());
        }

        if epoch > current {
            let view = event.view();
            match self.buffer.insert(origin, event) {
                BufferInsertResult::Buffered { evicted } => {
                    self.resources
                        .counters
                        .increment(CounterType::BufferedConsensusEvents);
                    self.resources
                        .counters
                        .add(CounterType::EvictedConsensusEvents, evicted as u64);
                    Event::BufferMessage(BufferMessageEvent {
                        timestamp: SystemTime::now(),
                        origin,
                        epoch,
                        view,
                    })
                    .publish(&self.resources.event_publisher);
                }
                BufferInsertResult::Dropped => {
                    log::debug!(
                        "Not buffering event for epoch {} at view {} from {:?}",
                        epoch,
                        view,
                        origin
                    );
                    self.resources
                        .counters
                        .increment(CounterType::EvictedConsensusEvents);
                }
            }
            return Ok(());
        }

        self.context
            .process_consensus_event(origin, event, &self.resources.counters, ledger)?;
        Ok(())
    }

    /// Process a local timeout scheduled by the pacemaker. Timeouts of past epochs are ignored.
    pub fn process_local_timeout<L: Ledger>(
        &mut self,
        timeout: Epoched<ScheduledLocalTimeout>,
        ledger: &mut L,
    ) -> Result<(), EpochManagerError> {
        if timeout.epoch != self.epoch() {
            log::debug!("Ignoring local timeout of epoch {}", timeout.epoch);
            return Ok(());
        }
        if let Some(pipeline) = self.context.pipeline_mut() {
            pipeline.process_local_timeout(timeout.event, ledger)?;
        }
        self.process_view_updates(ledger)
    }

    /// Start the view of a view update produced in the current epoch. View updates of past epochs are
    /// ignored.
    pub fn process_view_update<L: Ledger>(
        &mut self,
        view_update: Epoched<ViewUpdate>,
        ledger: &mut L,
    ) -> Result<(), EpochManagerError> {
        self.start_view(view_update, ledger)?;
        self.process_view_updates(ledger)
    }

    /// Process the timeout of a vertex request sent by BFT Sync. Timeouts of past epochs are ignored.
    pub fn process_vertex_request_timeout<L: Ledger>(
        &mut self,
        timeout: Epoched<VertexRequestTimeout>,
        ledger: &mut L,
    ) -> Result<(), EpochManagerError> {
        if timeout.epoch != self.epoch() {
            log::debug!("Ignoring vertex request timeout of epoch {}", timeout.epoch);
            return Ok(());
        }
        if let Some(pipeline) = self.context.pipeline_mut() {
            pipeline.process_vertex_request_timeout(timeout.event, ledger)?;
        }
        self.process_view_updates(ledger)
    }

    /// Process the timeout of a sync waiting for the ledger. Timeouts of past epochs are ignored.
    pub fn process_ledger_sync_timeout<L: Ledger>(
        &mut self,
        timeout: Epoched<LedgerSyncTimeout>,
        ledger: &mut L,
    ) -> Result<(), EpochManagerError> {
        if timeout.epoch != self.epoch() {
            log::debug!("Ignoring ledger sync timeout of epoch {}", timeout.epoch);
            return Ok(());
        }
        if let Some(pipeline) = self.context.pipeline_mut() {
            pipeline.process_ledger_sync_timeout(timeout.event, ledger)?;
        }
        self.process_view_updates(ledger)
    }

    /// Process a notification that the ledger has committed up to `update.header`, changing epoch if the
    /// update carries an [`EpochChange`].
    pub fn process_ledger_update<L: Ledger>(
        &mut self,
        update: LedgerUpdate,
        ledger: &mut L,
    ) -> Result<(), EpochManagerError> {
        self.context.process_ledger_update(update.header, ledger)?;

        if let Some(epoch_change) = update.epoch_change {
            self.process_epoch_change(epoch_change, ledger)?;
        }

        self.process_view_updates(ledger)
    }

    /// Replace the current epoch's context with the context of the epoch that `epoch_change` starts, then
    /// replay the events buffered for the new epoch.
    fn process_epoch_change<L: Ledger>(
        &mut self,
        epoch_change: EpochChange,
        ledger: &mut L,
    ) -> Result<(), EpochManagerError> {
        let next_context = self.context.next(&epoch_change, &self.resources, ledger)?;

        let me = self.resources.me();
        let validator_set = &epoch_change.bft_configuration.validator_set;
        let was_validator = self.context.is_active();
        let is_validator = validator_set.contains(&me);

        self.resources
            .network
            .update_validator_set(validator_set.clone());
        if was_validator || is_validator {
            let mut sender = SenderHandle::new(self.resources.network.clone());
            for validator in validator_set.validators() {
                if *validator != me {
                    sender.send_ledger_status_update(*validator, epoch_change.proof);
                }
            }
        }

        log::info!(
            "Entering epoch {} as {}",
            epoch_change.epoch,
            if is_validator { "a validator" } else { "a non-validator" }
        );
        self.context = next_context;
        self.resources.counters.increment(CounterType::EpochChanges);
        Event::StartEpoch(StartEpochEvent {
            timestamp: SystemTime::now(),
            epoch: epoch_change.epoch,
            is_validator,
        })
        .publish(&self.resources.event_publisher);
        self.start_epoch();

        let (events, discarded) = self.buffer.take(epoch_change.epoch);
        self.resources
            .counters
            .add(CounterType::EvictedConsensusEvents, discarded as u64);
        for (origin, event) in events {
            self.process_consensus_event(origin, event, ledger)?;
        }

        Ok(())
    }

    fn start_epoch(&mut self) {
        if let Some(pipeline) = self.context.pipeline_mut() {
            pipeline.start();
        }
    }

    fn start_view<L: Ledger>(
        &mut self,
        view_update: Epoched<ViewUpdate>,
        ledger: &mut L,
    ) -> Result<(), EpochManagerError> {
        if view_update.epoch != self.epoch() {
            log::debug!("Ignoring view update of epoch {}", view_update.epoch);
            return Ok(());
        }
        if let Some(pipeline) = self.context.pipeline_mut() {
            pipeline.process_view_update(view_update.event, ledger)?;
        }
        Ok(())
    }

    /// Deliver the view updates produced while processing an input back to the pipeline, until it stops
    /// producing them.
    fn process_view_updates<L: Ledger>(&mut self, ledger: &mut L) -> Result<(), EpochManagerError> {
        loop {
            let view_update = match self.context.pipeline_mut() {
                Some(pipeline) => pipeline.take_view_update(),
                None => None,
            };
            match view_update {
                Some(view_update) => self.start_view(view_update, ledger)?,
                None => return Ok(()),
            }
        }
    }
}

/// Failures of the [`EpochManager`]. All of them are fatal.
#[derive(Debug)]
pub enum EpochManagerError {
    /// The ledger produced an epoch change that does not start the epoch right after the current one.
    NonSequentialEpochChange {
        current: EpochNumber,
        received: EpochNumber,
    },
    Consensus(ConsensusError),
}

impl From<ConsensusError> for EpochManagerError {
    fn from(value: ConsensusError) -> Self {
        EpochManagerError::Consensus(value)
    }
}
