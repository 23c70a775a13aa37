/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus pipeline of a single epoch, in which this replica is a validator.
//!
//! A [`BFTPipeline`] owns one instance of each component: [`SafetyRules`], [`Pacemaker`], [`VertexStore`],
//! [`BFTSync`], and [`PendingVotes`]. It is built when its epoch starts and dropped, with everything it owns,
//! when the epoch ends.
//!
//! ## Event preprocessing
//!
//! A consensus event reaches the component that handles it only once three conditions hold:
//! 1. Its author is a validator of the epoch, and is the peer that delivered it.
//! 2. The vertices certified by its high QC are in the vertex store. If they are not, the event waits in
//!    its author's sync queue until BFT Sync has fetched them. Later events from the same author queue
//!    behind it.
//! 3. Its view is the current view. Events for past views are dropped. Events for future views wait in a
//!    bounded per-view queue until the view starts.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{mpsc::Sender, Arc},
    time::SystemTime,
};

use ed25519_dalek::VerifyingKey;

use crate::{
    bft_sync::{
        messages::{
            GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, LedgerSyncTimeout,
            VertexRequestTimeout,
        },
        sync_queues::{QueueDecision, SyncQueues},
        BFTSync, SyncResult,
    },
    counters::{CounterType, SystemCounters},
    events::{CollectQCEvent, CollectTCEvent, Event, ReceiveProposalEvent, ReceiveVoteEvent, VoteEvent},
    ledger::Ledger,
    networking::{messages::ConsensusEvent, network::Network, sending::SenderHandle},
    pacemaker::{
        implementation::timestamp_now,
        proposer_election::ProposerElection,
        types::{ScheduledLocalTimeout, ViewUpdate},
        Pacemaker, PacemakerError,
    },
    safety_rules::{pluggables::KVStore, SafetyRules, SafetyRulesError},
    scheduler::Scheduler,
    types::{
        basic::{EpochNumber, ViewNumber},
        certificates::HighQC,
        validators::ValidatorSet,
        vertex::LedgerHeader,
        voting::{Proposal, Vote},
    },
    vertex_store::{VertexStore, VertexStoreError},
    voting::pending_votes::{PendingVotes, ViewVotingResult, VoteProcessingResult},
};

use super::{
    context::EpochResources,
    types::{BFTConfiguration, Epoched},
};

pub struct BFTPipeline<N: Network, K: KVStore, S: Scheduler> {
    epoch: EpochNumber,
    validator_set: ValidatorSet,
    safety_rules: SafetyRules<K>,
    pacemaker: Pacemaker<N, S>,
    vertex_store: VertexStore,
    bft_sync: BFTSync<N, S>,
    pending_votes: PendingVotes,
    /// Events for views that have not started yet.
    view_queue: BTreeMap<ViewNumber, Vec<(VerifyingKey, ConsensusEvent)>>,
    max_queued_events_per_view: usize,
    sync_queues: SyncQueues,
    /// Events that became processable and are waiting for the current call to get to them.
    replay: VecDeque<Replay>,
    /// View updates that the epoch manager has not taken yet.
    view_updates: VecDeque<Epoched<ViewUpdate>>,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
    counters: Arc<SystemCounters>,
}

struct Replay {
    origin: VerifyingKey,
    event: ConsensusEvent,
    /// Whether the event comes out of its author's sync queue, and so may skip past it.
    from_sync_queue: bool,
}

impl<N: Network, K: KVStore, S: Scheduler> BFTPipeline<N, K, S> {
    pub(crate) fn new<L: Ledger>(
        epoch: EpochNumber,
        bft_configuration: BFTConfiguration,
        resources: &EpochResources<N, K, S>,
        ledger: &mut L,
    ) -> Result<Self, ConsensusError> {
        let BFTConfiguration {
            validator_set,
            vertex_store_state,
        } = bft_configuration;
        let me = resources.keypair.public();
        let sender = SenderHandle::new(resources.network.clone());

        let safety_rules = SafetyRules::new(
            resources.keypair.clone(),
            epoch,
            resources.kv_store.clone(),
            resources.event_publisher.clone(),
        )?;

        let vertex_store = VertexStore::new(
            vertex_store_state,
            ledger,
            resources.event_publisher.clone(),
            resources.counters.clone(),
        )?;

        let pacemaker = Pacemaker::new(
            resources.pacemaker_config,
            epoch,
            me,
            ProposerElection::new(validator_set.clone()),
            sender.clone(),
            resources.scheduler.clone(),
            resources.event_publisher.clone(),
            resources.counters.clone(),
        );

        let bft_sync = BFTSync::new(
            resources.bft_sync_config,
            epoch,
            me,
            validator_set.clone(),
            sender.clone(),
            resources.scheduler.clone(),
            vertex_store.root_header().ledger_header,
            resources.event_publisher.clone(),
            resources.counters.clone(),
        );

        Ok(Self {
            epoch,
            validator_set,
            safety_rules,
            pacemaker,
            vertex_store,
            bft_sync,
            pending_votes: PendingVotes::new(),
            view_queue: BTreeMap::new(),
            max_queued_events_per_view: resources.max_queued_events_per_view,
            sync_queues: SyncQueues::new(resources.max_queued_events_per_view),
            replay: VecDeque::new(),
            view_updates: VecDeque::new(),
            sender,
            event_publisher: resources.event_publisher.clone(),
            counters: resources.counters.clone(),
        })
    }

    /// Enter the first view after the vertex store's high QC.
    pub(crate) fn start(&mut self) {
        self.advance_view();
    }

    pub fn epoch(&self) -> EpochNumber {
        self.epoch
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    pub fn current_view(&self) -> ViewNumber {
        self.pacemaker.current_view()
    }

    pub fn vertex_store(&self) -> &VertexStore {
        &self.vertex_store
    }

    pub fn safety_rules(&self) -> &SafetyRules<K> {
        &self.safety_rules
    }

    pub fn pacemaker(&self) -> &Pacemaker<N, S> {
        &self.pacemaker
    }

    pub fn bft_sync(&self) -> &BFTSync<N, S> {
        &self.bft_sync
    }

    /// Number of events held until their view starts or their high QC is synced.
    pub fn queued_events(&self) -> usize {
        self.view_queue.values().map(Vec::len).sum::<usize>() + self.sync_queues.len()
    }

    /// Take the oldest view update that this pipeline produced and the epoch manager has not delivered back
    /// through [`process_view_update`](Self::process_view_update) yet.
    pub(crate) fn take_view_update(&mut self) -> Option<Epoched<ViewUpdate>> {
        self.view_updates.pop_front()
    }

    pub(crate) fn process_consensus_event<L: Ledger>(
        &mut self,
        origin: VerifyingKey,
        event: ConsensusEvent,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        self.handle_consensus_event(origin, event, false, ledger)?;
        self.process_replays(ledger)
    }

    /// Start the view of `view_update`, then process the events that were waiting for it.
    pub(crate) fn process_view_update<L: Ledger>(
        &mut self,
        view_update: ViewUpdate,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        self.pacemaker.start_view(
            &view_update,
            &mut self.safety_rules,
            &mut self.vertex_store,
            ledger,
        )?;

        let current_view = self.pacemaker.current_view();
        let later = self.view_queue.split_off(&current_view.next());
        let ready = std::mem::replace(&mut self.view_queue, later);
        for (view, events) in ready {
            if view < current_view {
                self.counters
                    .add(CounterType::StaleViewEvents, events.len() as u64);
                continue;
            }
            self.replay
                .extend(events.into_iter().map(|(origin, event)| Replay {
                    origin,
                    event,
                    from_sync_queue: false,
                }));
        }

        self.process_replays(ledger)
    }

    pub(crate) fn process_local_timeout<L: Ledger>(
        &mut self,
        timeout: ScheduledLocalTimeout,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        self.pacemaker.process_local_timeout(
            timeout,
            &mut self.safety_rules,
            &mut self.vertex_store,
            ledger,
        )?;
        self.process_replays(ledger)
    }

    pub(crate) fn process_get_vertices_request(
        &mut self,
        origin: VerifyingKey,
        request: GetVerticesRequest,
    ) {
        self.bft_sync
            .process_get_vertices_request(origin, request, &self.vertex_store)
    }

    pub(crate) fn process_get_vertices_response<L: Ledger>(
        &mut self,
        origin: VerifyingKey,
        response: GetVerticesResponse,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        let ended = self.bft_sync.process_get_vertices_response(
            &origin,
            response,
            &mut self.vertex_store,
            ledger,
        )?;
        self.after_sync(ended.len(), ledger)
    }

    pub(crate) fn process_get_vertices_error_response<L: Ledger>(
        &mut self,
        origin: VerifyingKey,
        response: GetVerticesErrorResponse,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        let ended = self.bft_sync.process_get_vertices_error_response(
            &origin,
            response,
            &mut self.vertex_store,
            ledger,
        )?;
        self.after_sync(ended.len(), ledger)
    }

    pub(crate) fn process_vertex_request_timeout<L: Ledger>(
        &mut self,
        timeout: VertexRequestTimeout,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        let ended = self.bft_sync.process_vertex_request_timeout(timeout, ledger);
        self.after_sync(ended.len(), ledger)
    }

    pub(crate) fn process_ledger_sync_timeout<L: Ledger>(
        &mut self,
        timeout: LedgerSyncTimeout,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        let ended = self.bft_sync.process_ledger_sync_timeout(timeout, ledger);
        self.after_sync(ended.len(), ledger)
    }

    pub(crate) fn process_ledger_update<L: Ledger>(
        &mut self,
        ledger_header: LedgerHeader,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        let ended = self.bft_sync.process_ledger_update(ledger_header);
        self.after_sync(ended.len(), ledger)
    }

    /// Release the events whose syncs ended, and enter a higher view if the syncs brought one.
    fn after_sync<L: Ledger>(&mut self, ended: usize, ledger: &mut L) -> Result<(), ConsensusError> {
        if ended > 0 {
            self.advance_view();
        }
        self.release_sync_queues();
        self.process_replays(ledger)
    }

    fn release_sync_queues(&mut self) {
        let vertex_store = &self.vertex_store;
        let bft_sync = &self.bft_sync;
        let root_view = vertex_store.root_header().view;
        let (ready, dropped) = self.sync_queues.drain_ready(|event| {
            let certified = *event.high_qc().highest_qc.proposed();
            if vertex_store.contains(&certified.vertex_id) || certified.view <= root_view {
                QueueDecision::Ready
            } else if bft_sync.is_syncing(&certified.vertex_id) {
                QueueDecision::Wait
            } else {
                QueueDecision::Drop
            }
        });

        if dropped > 0 {
            log::debug!("Dropped {} events whose sync was abandoned", dropped);
            self.counters
                .add(CounterType::StaleViewEvents, dropped as u64);
        }
        self.replay
            .extend(ready.into_iter().map(|(origin, event)| Replay {
                origin,
                event,
                from_sync_queue: true,
            }));
    }

    fn process_replays<L: Ledger>(&mut self, ledger: &mut L) -> Result<(), ConsensusError> {
        while let Some(replay) = self.replay.pop_front() {
            self.handle_consensus_event(replay.origin, replay.event, replay.from_sync_queue, ledger)?;
        }
        Ok(())
    }

    fn handle_consensus_event<L: Ledger>(
        &mut self,
        origin: VerifyingKey,
        event: ConsensusEvent,
        from_sync_queue: bool,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        // 1. Check the author.
        let author = match self.validator_set.get_by_bytes(&event.author()) {
            Some(author) if author == origin => author,
            _ => {
                log::warn!(
                    "Dropping event from {:?}: its author is not the sender or not a validator",
                    origin
                );
                return Ok(());
            }
        };
        if event.epoch() != self.epoch {
            log::debug!("Dropping event for epoch {} in epoch {}", event.epoch(), self.epoch);
            return Ok(());
        }

        // 2. Sync to the event's high QC.
        if !from_sync_queue && self.sync_queues.is_waiting(&author) {
            self.queue_for_sync(author, event);
            return Ok(());
        }
        match self
            .bft_sync
            .sync_to_qc(&event.high_qc(), Some(author), &mut self.vertex_store, ledger)?
        {
            SyncResult::Synced => self.advance_view(),
            SyncResult::InProgress => {
                self.queue_for_sync(author, event);
                return Ok(());
            }
            SyncResult::Invalid => {
                log::debug!("Dropping event from {:?} with a high QC of another epoch", author);
                return Ok(());
            }
        }

        // 3. Wait for the event's view.
        let current_view = self.pacemaker.current_view();
        let view = event.view();
        if view < current_view {
            log::debug!("Dropping event for view {}: current view is {}", view, current_view);
            self.counters.increment(CounterType::StaleViewEvents);
            return Ok(());
        }
        if view > current_view {
            let queue = self.view_queue.entry(view).or_default();
            if queue.len() >= self.max_queued_events_per_view {
                self.counters.increment(CounterType::StaleViewEvents);
            } else {
                queue.push((author, event));
            }
            return Ok(());
        }

        match event {
            ConsensusEvent::Proposal(proposal) => self.on_receive_proposal(author, proposal, ledger),
            ConsensusEvent::Vote(vote) => self.on_receive_vote(author, vote, ledger),
        }
    }

    fn queue_for_sync(&mut self, author: VerifyingKey, event: ConsensusEvent) {
        if !self.sync_queues.add(author, event) {
            log::warn!("Sync queue of {:?} is full, dropping event", author);
            self.counters.increment(CounterType::StaleViewEvents);
        }
    }

    /// Insert the proposed vertex and vote for it, sending the vote to the leader of the next view.
    fn on_receive_proposal<L: Ledger>(
        &mut self,
        origin: VerifyingKey,
        proposal: Proposal,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        let view = proposal.view();
        if self.pacemaker.leader(view) != origin {
            log::warn!("Dropping proposal for view {} from non-leader {:?}", view, origin);
            return Ok(());
        }

        Event::ReceiveProposal(ReceiveProposalEvent {
            timestamp: SystemTime::now(),
            origin,
            proposal: proposal.clone(),
        })
        .publish(&self.event_publisher);

        let header = match self.vertex_store.insert_vertex(&proposal.vertex, ledger) {
            Ok(Some(header)) => header,
            Ok(None) => {
                log::debug!("Ledger rejected the vertex proposed for view {}", view);
                return Ok(());
            }
            Err(err) if err.is_invalid_input() => {
                log::warn!("Rejected vertex proposed for view {}: {:?}", view, err);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        match self.safety_rules.vote_for(
            &proposal.vertex,
            header,
            timestamp_now(),
            self.vertex_store.high_qc(),
        )? {
            Some(vote) => {
                self.counters.increment(CounterType::VotesCast);
                let next_leader = self.pacemaker.leader(view.next());
                self.sender.send(next_leader, vote.clone());
                Event::Vote(VoteEvent {
                    timestamp: SystemTime::now(),
                    vote,
                })
                .publish(&self.event_publisher);
            }
            None => self.counters.increment(CounterType::SafetyRefusals),
        }

        Ok(())
    }

    /// Aggregate `vote`. A certificate that forms is added to the vertex store and may end the view.
    fn on_receive_vote<L: Ledger>(
        &mut self,
        origin: VerifyingKey,
        vote: Vote,
        ledger: &mut L,
    ) -> Result<(), ConsensusError> {
        Event::ReceiveVote(ReceiveVoteEvent {
            timestamp: SystemTime::now(),
            origin,
            vote: vote.clone(),
        })
        .publish(&self.event_publisher);

        match self.pending_votes.insert_vote(&vote, &self.validator_set) {
            VoteProcessingResult::Accepted => (),
            VoteProcessingResult::Rejected(reason) => {
                log::debug!("Rejected vote from {:?}: {:?}", origin, reason);
                self.counters.increment(CounterType::VotesRejected);
            }
            VoteProcessingResult::QuorumReached(ViewVotingResult::FormedQC(qc)) => {
                self.counters
                    .increment(CounterType::QuorumCertificatesFormed);
                Event::CollectQC(CollectQCEvent {
                    timestamp: SystemTime::now(),
                    quorum_certificate: qc.clone(),
                })
                .publish(&self.event_publisher);

                if !self.vertex_store.add_qc(&qc, ledger)? {
                    // The QC certifies a vertex this replica has not seen.
                    let high_qc = HighQC::new(
                        qc,
                        self.vertex_store.highest_committed_qc().clone(),
                        self.vertex_store.highest_tc().cloned(),
                    );
                    self.bft_sync.sync_to_qc(
                        &high_qc,
                        Some(origin),
                        &mut self.vertex_store,
                        ledger,
                    )?;
                }
                self.advance_view();
            }
            VoteProcessingResult::QuorumReached(ViewVotingResult::FormedTC(tc)) => {
                self.counters
                    .increment(CounterType::TimeoutCertificatesFormed);
                Event::CollectTC(CollectTCEvent {
                    timestamp: SystemTime::now(),
                    timeout_certificate: tc.clone(),
                })
                .publish(&self.event_publisher);

                self.vertex_store.insert_timeout_certificate(&tc);
                self.advance_view();
            }
        }

        Ok(())
    }

    fn advance_view(&mut self) {
        if let Some(view_update) = self.pacemaker.process_high_qc(&self.vertex_store.high_qc()) {
            self.view_updates.push_back(view_update);
        }
    }
}

/// Failures of a [`BFTPipeline`]. All of them are fatal.
#[derive(Debug)]
pub enum ConsensusError {
    SafetyRulesError(SafetyRulesError),
    VertexStoreError(VertexStoreError),
}

impl From<SafetyRulesError> for ConsensusError {
    fn from(value: SafetyRulesError) -> Self {
        ConsensusError::SafetyRulesError(value)
    }
}

impl From<VertexStoreError> for ConsensusError {
    fn from(value: VertexStoreError) -> Self {
        ConsensusError::VertexStoreError(value)
    }
}

impl From<PacemakerError> for ConsensusError {
    fn from(value: PacemakerError) -> Self {
        match value {
            PacemakerError::SafetyRulesError(err) => ConsensusError::SafetyRulesError(err),
            PacemakerError::VertexStoreError(err) => ConsensusError::VertexStoreError(err),
        }
    }
}
