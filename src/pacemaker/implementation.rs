/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of the Pacemaker subprotocol.
//!
//! Main type: [`Pacemaker`].

use std::{
    sync::{mpsc::Sender, Arc},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use ed25519_dalek::VerifyingKey;

use crate::{
    counters::{CounterType, SystemCounters},
    epoch_manager::types::Epoched,
    events::{Event, ProposeEvent, StartViewEvent, TimeoutVoteEvent, ViewTimeoutEvent},
    ledger::Ledger,
    networking::{network::Network, sending::SenderHandle},
    safety_rules::{pluggables::KVStore, SafetyRules, SafetyRulesError},
    scheduler::Scheduler,
    types::{
        basic::{Data, EpochNumber, ViewNumber},
        certificates::HighQC,
        vertex::Vertex,
        voting::Vote,
    },
    vertex_store::{VertexStore, VertexStoreError},
};

use super::{
    proposer_election::ProposerElection,
    timeout::{ExponentialTimeoutCalculator, TimeoutCalculator},
    types::{ScheduledLocalTimeout, ViewUpdate},
};

/// A single participant in the Pacemaker subprotocol for one epoch.
///
/// # Usage
///
/// The pacemaker never reads a clock. It is driven by four calls:
/// 1. [`process_high_qc`](Self::process_high_qc) whenever the replica learns of a higher QC or TC. If the
///    certificate ends the current view, a [`ViewUpdate`] for the next view is returned.
/// 2. [`start_view`](Self::start_view) with that `ViewUpdate`, which schedules the view's local timeout and,
///    if this replica leads the view, proposes.
/// 3. [`process_local_timeout`](Self::process_local_timeout) when a scheduled timeout fires.
/// 4. [`current_view`](Self::current_view) to query the view the replica is in.
pub struct Pacemaker<N: Network, S: Scheduler> {
    epoch: EpochNumber,
    me: VerifyingKey,
    timeout_calculator: Box<dyn TimeoutCalculator>,
    proposer_election: ProposerElection,
    sender: SenderHandle<N>,
    scheduler: S,
    state: PacemakerState,
    event_publisher: Option<Sender<Event>>,
    counters: Arc<SystemCounters>,
}

impl<N: Network, S: Scheduler> Pacemaker<N, S> {
    pub(crate) fn new(
        config: PacemakerConfiguration,
        epoch: EpochNumber,
        me: VerifyingKey,
        proposer_election: ProposerElection,
        sender: SenderHandle<N>,
        scheduler: S,
        event_publisher: Option<Sender<Event>>,
        counters: Arc<SystemCounters>,
    ) -> Self {
        Self {
            epoch,
            me,
            timeout_calculator: Box::new(ExponentialTimeoutCalculator::new(
                config.base_timeout,
                config.timeout_rate,
                config.max_timeout_exponent,
            )),
            proposer_election,
            sender,
            scheduler,
            state: PacemakerState::initialize(),
            event_publisher,
            counters,
        }
    }

    pub fn current_view(&self) -> ViewNumber {
        self.state.current_view
    }

    /// The `ViewUpdate` that started the current view, if a view has been started.
    pub fn latest_view_update(&self) -> Option<&ViewUpdate> {
        self.state.latest_view_update.as_ref()
    }

    pub fn leader(&self, view: ViewNumber) -> VerifyingKey {
        self.proposer_election.leader(view)
    }

    /// Advance the current view if `high_qc` proves that the network has gone past it.
    ///
    /// A view ends when a QC or TC for it (or a higher view) is known. Entering a view because of a TC
    /// counts as a consecutive timeout, which lengthens the timeout of the view entered. Entering a view
    /// because of a QC resets the count.
    pub fn process_high_qc(&mut self, high_qc: &HighQC) -> Option<Epoched<ViewUpdate>> {
        let view = high_qc.highest_view();
        if view < self.state.current_view {
            return None;
        }

        let ended_by_timeout = high_qc
            .highest_tc
            .as_ref()
            .map_or(false, |tc| tc.view == view && tc.view > high_qc.highest_qc.view());
        if ended_by_timeout {
            self.state.consecutive_timeouts = self.state.consecutive_timeouts.saturating_add(1);
        } else {
            self.state.consecutive_timeouts = 0;
        }

        let next_view = view.next();
        let view_update = ViewUpdate {
            view: next_view,
            high_qc: high_qc.clone(),
            leader: self.proposer_election.leader(next_view),
            next_leader: self.proposer_election.leader(next_view.next()),
        };
        self.state.current_view = next_view;
        self.state.latest_view_update = Some(view_update.clone());

        Some(Epoched::new(self.epoch, view_update))
    }

    /// Start the view of `view_update`: schedule its local timeout, and propose if this replica leads it.
    ///
    /// A `view_update` that has been superseded by a later one is ignored.
    pub fn start_view<K: KVStore, L: Ledger>(
        &mut self,
        view_update: &ViewUpdate,
        safety_rules: &mut SafetyRules<K>,
        vertex_store: &mut VertexStore,
        ledger: &mut L,
    ) -> Result<(), PacemakerError> {
        if view_update.view != self.state.current_view {
            log::debug!(
                "Ignoring view update for view {}: current view is {}",
                view_update.view,
                self.state.current_view
            );
            return Ok(());
        }

        Event::StartView(StartViewEvent {
            timestamp: SystemTime::now(),
            view: view_update.view,
            leader: view_update.leader,
            next_leader: view_update.next_leader,
        })
        .publish(&self.event_publisher);

        self.schedule_timeout(view_update.view, 0);

        if view_update.leader == self.me {
            self.propose(view_update.view, safety_rules, vertex_store, ledger)?;
        }

        Ok(())
    }

    /// Handle a local timeout that was scheduled by this pacemaker.
    ///
    /// If the timeout's view is over, nothing happens. Otherwise this replica broadcasts a timeout vote for
    /// the view, first casting a vote for a timeout vertex if it has not voted in the view, and schedules
    /// the next timeout of the same view.
    pub fn process_local_timeout<K: KVStore, L: Ledger>(
        &mut self,
        timeout: ScheduledLocalTimeout,
        safety_rules: &mut SafetyRules<K>,
        vertex_store: &mut VertexStore,
        ledger: &mut L,
    ) -> Result<(), PacemakerError> {
        let view = self.state.current_view;
        if timeout.view != view {
            log::debug!(
                "Ignoring stale local timeout for view {}: current view is {}",
                timeout.view,
                view
            );
            return Ok(());
        }

        self.counters.increment(CounterType::LocalTimeouts);
        Event::ViewTimeout(ViewTimeoutEvent {
            timestamp: SystemTime::now(),
            view,
            count: timeout.count,
        })
        .publish(&self.event_publisher);

        let vote = match safety_rules.get_last_vote(view) {
            Some(vote) => Some(vote),
            None => self.vote_for_timeout_vertex(view, safety_rules, vertex_store, ledger)?,
        };

        if let Some(vote) = vote {
            match safety_rules.timeout_vote(vote)? {
                Some(timeout_vote) => {
                    self.counters.increment(CounterType::TimeoutVotesCast);
                    self.sender.broadcast(timeout_vote.clone());
                    Event::TimeoutVote(TimeoutVoteEvent {
                        timestamp: SystemTime::now(),
                        vote: timeout_vote,
                    })
                    .publish(&self.event_publisher);
                }
                None => self.counters.increment(CounterType::SafetyRefusals),
            }
        }

        self.schedule_timeout(view, timeout.count.saturating_add(1));

        Ok(())
    }

    fn schedule_timeout(&mut self, view: ViewNumber, count: u32) {
        let timeout = self
            .timeout_calculator
            .timeout(self.state.consecutive_timeouts);
        self.scheduler.schedule_local_timeout(
            Epoched::new(
                self.epoch,
                ScheduledLocalTimeout {
                    view,
                    timeout,
                    count,
                },
            ),
            timeout,
        );
    }

    /// Build a vertex for `view` on top of the highest QC, have Safety Rules sign it, and broadcast it.
    fn propose<K: KVStore, L: Ledger>(
        &mut self,
        view: ViewNumber,
        safety_rules: &mut SafetyRules<K>,
        vertex_store: &VertexStore,
        ledger: &mut L,
    ) -> Result<(), PacemakerError> {
        let highest_qc = vertex_store.highest_qc().clone();

        // Vertices that extend the end of the epoch carry no commands.
        let payload = if highest_qc.proposed().ledger_header.is_end_of_epoch {
            Data::empty()
        } else {
            let prepared = vertex_store.path_from_root(&highest_qc.proposed().vertex_id);
            ledger.next_commands(view, &prepared)
        };

        let vertex = Vertex::new(
            self.epoch,
            view,
            highest_qc,
            payload,
            Some(self.me.to_bytes()),
        );

        match safety_rules.sign_proposal(
            &vertex,
            vertex_store.highest_committed_qc().clone(),
            vertex_store.highest_tc().cloned(),
        )? {
            Some(proposal) => {
                self.counters.increment(CounterType::ProposalsMade);
                self.sender.broadcast(proposal.clone());
                Event::Propose(ProposeEvent {
                    timestamp: SystemTime::now(),
                    proposal,
                })
                .publish(&self.event_publisher);
            }
            None => self.counters.increment(CounterType::SafetyRefusals),
        }

        Ok(())
    }

    /// Vote for the empty timeout vertex of `view`, built on top of the highest QC.
    ///
    /// Every replica that times out on the same highest QC builds the same timeout vertex, so these votes
    /// may still form a QC.
    fn vote_for_timeout_vertex<K: KVStore, L: Ledger>(
        &mut self,
        view: ViewNumber,
        safety_rules: &mut SafetyRules<K>,
        vertex_store: &mut VertexStore,
        ledger: &mut L,
    ) -> Result<Option<Vote>, PacemakerError> {
        let vertex = Vertex::new_timeout(self.epoch, view, vertex_store.highest_qc().clone());
        let header = match vertex_store.insert_vertex(&vertex, ledger) {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(None),
            Err(err) if err.is_invalid_input() => {
                log::warn!("Cannot insert timeout vertex for view {}: {:?}", view, err);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let vote = safety_rules.vote_for(&vertex, header, timestamp_now(), vertex_store.high_qc())?;
        if vote.is_none() {
            self.counters.increment(CounterType::SafetyRefusals);
        }

        Ok(vote)
    }
}

/// Configuration variables for the [`Pacemaker`] struct.
#[derive(Clone, Copy, Debug)]
pub struct PacemakerConfiguration {
    /// Timeout of a view entered through a QC.
    pub base_timeout: Duration,

    /// Factor by which the timeout grows with every consecutive view that ended in a timeout.
    pub timeout_rate: f64,

    /// Number of consecutive timeouts after which the timeout stops growing.
    pub max_timeout_exponent: u32,
}

/// In-memory state of a [`Pacemaker`].
struct PacemakerState {
    current_view: ViewNumber,
    latest_view_update: Option<ViewUpdate>,
    /// Number of views in a row that were ended by a TC.
    consecutive_timeouts: u32,
}

impl PacemakerState {
    fn initialize() -> Self {
        Self {
            current_view: ViewNumber::genesis(),
            latest_view_update: None,
            consecutive_timeouts: 0,
        }
    }
}

/// Milliseconds since the Unix epoch, used to timestamp votes.
pub(crate) fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

/// Enumerates the different ways a call to any of [`Pacemaker`]'s methods can fail. Both are fatal.
#[derive(Debug)]
pub enum PacemakerError {
    SafetyRulesError(SafetyRulesError),
    VertexStoreError(VertexStoreError),
}

impl From<SafetyRulesError> for PacemakerError {
    fn from(value: SafetyRulesError) -> Self {
        PacemakerError::SafetyRulesError(value)
    }
}

impl From<VertexStoreError> for PacemakerError {
    fn from(value: VertexStoreError) -> Self {
        PacemakerError::VertexStoreError(value)
    }
}
