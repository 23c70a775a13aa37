/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implementation of [`SafetyRules`].

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::{
    events::{Event, UpdateLockedViewEvent},
    types::{
        basic::{EpochNumber, ViewNumber},
        certificates::{HighQC, QuorumCertificate, TimeoutCertificate, TimestampedVoteData, VoteData},
        crypto_primitives::Keypair,
        vertex::{BFTHeader, Vertex},
        voting::{Proposal, Vote},
    },
};

use super::{
    pluggables::{KVGetError, KVStore},
    safety_state::{PersistentSafetyStateStore, SafetyState},
};

/// The sole producer of this replica's signatures on proposals and votes.
///
/// ## Durability
///
/// Every method that returns a signed value first writes the resulting [`SafetyState`] through the
/// [`PersistentSafetyStateStore`]. If the write fails, the method returns an error, the in-memory state is
/// left as it was, and the signed value is dropped.
///
/// ## Refusals
///
/// Refusing to sign is not an error: [`sign_proposal`](Self::sign_proposal) and
/// [`vote_for`](Self::vote_for) return `Ok(None)` and the caller simply does not propose or vote.
pub struct SafetyRules<K: KVStore> {
    keypair: Keypair,
    state: SafetyState,
    store: PersistentSafetyStateStore<K>,
    event_publisher: Option<Sender<Event>>,
}

impl<K: KVStore> SafetyRules<K> {
    /// Create `SafetyRules` for `epoch`, resuming from the safety state persisted in `kv_store` if there is
    /// one.
    pub fn new(
        keypair: Keypair,
        epoch: EpochNumber,
        kv_store: K,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, SafetyRulesError> {
        let store = PersistentSafetyStateStore::new(kv_store, keypair.public().to_bytes());
        let state = store
            .load()?
            .map_or(SafetyState::initial(epoch), |state| state.for_epoch(epoch));

        Ok(Self {
            keypair,
            state,
            store,
            event_publisher,
        })
    }

    pub fn state(&self) -> &SafetyState {
        &self.state
    }

    /// Sign a proposal for `vertex`.
    ///
    /// Refuses if the vertex's parent is below the locked view. Otherwise advances the locked view to the
    /// vertex's grandparent view if that is higher, persists, and signs.
    pub fn sign_proposal(
        &mut self,
        vertex: &Vertex,
        highest_committed_qc: QuorumCertificate,
        highest_tc: Option<TimeoutCertificate>,
    ) -> Result<Option<Proposal>, SafetyRulesError> {
        let next_state = match self.check_locked(vertex) {
            Some(next_state) => next_state,
            None => {
                log::debug!(
                    "Refusing to propose vertex at view {}: parent view {} is below locked view {}",
                    vertex.view,
                    vertex.parent_header().view,
                    self.state.locked_view()
                );
                return Ok(None);
            }
        };

        self.commit_state(next_state)?;

        Ok(Some(Proposal {
            vertex: vertex.clone(),
            highest_committed_qc,
            highest_tc,
            author: self.keypair.public().to_bytes(),
            signature: self.keypair.sign(&vertex.id),
        }))
    }

    /// Vote for `vertex`, whose execution resulted in `proposed_header`.
    ///
    /// ## Checks
    ///
    /// 1. The vertex's view must be strictly greater than the last voted view.
    /// 2. The vertex's parent view must not be below the locked view.
    pub fn vote_for(
        &mut self,
        vertex: &Vertex,
        proposed_header: BFTHeader,
        timestamp: u64,
        high_qc: HighQC,
    ) -> Result<Option<Vote>, SafetyRulesError> {
        // 1. Never vote twice in a view, or in an earlier view.
        if vertex.view <= self.state.last_voted_view() {
            log::debug!(
                "Refusing to vote for vertex at view {}: already voted at view {}",
                vertex.view,
                self.state.last_voted_view()
            );
            return Ok(None);
        }

        // 2. Never vote for a vertex that conflicts with the lock.
        let next_state = match self.check_locked(vertex) {
            Some(next_state) => next_state,
            None => {
                log::debug!(
                    "Refusing to vote for vertex at view {}: parent view {} is below locked view {}",
                    vertex.view,
                    vertex.parent_header().view,
                    self.state.locked_view()
                );
                return Ok(None);
            }
        };

        let timestamped_vote_data =
            TimestampedVoteData::new(Self::vote_data(vertex, proposed_header), timestamp);
        let vote = Vote {
            author: self.keypair.public().to_bytes(),
            signature: self.keypair.sign(&timestamped_vote_data.hash()),
            timestamped_vote_data,
            high_qc,
            timeout_signature: None,
        };

        self.commit_state(next_state.with_last_vote(vote.clone()))?;

        Ok(Some(vote))
    }

    /// Upgrade `vote`, which must be this replica's last vote, into a timeout vote. Returns the last vote
    /// unchanged if it already is one.
    ///
    /// Any other vote is refused with `Ok(None)` and the safety state is left as it was: storing an older
    /// vote as the last vote would lower the last voted view.
    pub fn timeout_vote(&mut self, vote: Vote) -> Result<Option<Vote>, SafetyRulesError> {
        let last_vote = match self.state.last_vote() {
            Some(last_vote)
                if last_vote.author == vote.author
                    && last_vote.timestamped_vote_data == vote.timestamped_vote_data =>
            {
                last_vote.clone()
            }
            _ => {
                log::debug!(
                    "Refused to turn the vote for view {} into a timeout vote, last voted view is {}",
                    vote.view(),
                    self.state.last_voted_view()
                );
                return Ok(None);
            }
        };

        if last_vote.is_timeout() {
            return Ok(Some(last_vote));
        }

        let timeout_vote =
            last_vote.with_timeout_signature(self.keypair.sign(&last_vote.timeout_hash()));
        self.commit_state(self.state.with_last_vote(timeout_vote.clone()))?;

        Ok(Some(timeout_vote))
    }

    /// Get the last vote cast by this replica, if it was cast in `view`.
    pub fn get_last_vote(&self, view: ViewNumber) -> Option<Vote> {
        self.state
            .last_vote()
            .filter(|vote| vote.view() == view)
            .cloned()
    }

    /// Check `vertex` against the locked view, returning the state with the locked view advanced by the
    /// pre-commit rule if the check passes.
    fn check_locked(&self, vertex: &Vertex) -> Option<SafetyState> {
        if vertex.parent_header().view < self.state.locked_view() {
            return None;
        }

        let grandparent_view = vertex.grandparent_header().view;
        if grandparent_view > self.state.locked_view() {
            Some(self.state.with_locked_view(grandparent_view))
        } else {
            Some(self.state.clone())
        }
    }

    /// Vote data for `vertex`. The grandparent is committed only if the vertex, its parent, and its
    /// grandparent have consecutive views and none of them is a genesis vertex.
    fn vote_data(vertex: &Vertex, proposed_header: BFTHeader) -> VoteData {
        let parent = *vertex.parent_header();
        let committed = if vertex.touches_genesis()
            || !vertex.has_direct_parent()
            || !vertex.parent_has_direct_parent()
        {
            None
        } else {
            Some(*vertex.grandparent_header())
        };

        VoteData::new(proposed_header, parent, committed)
    }

    /// Persist `next_state`, then make it the current state.
    fn commit_state(&mut self, next_state: SafetyState) -> Result<(), SafetyRulesError> {
        self.store
            .commit_state(&next_state)
            .map_err(SafetyRulesError::PersistSafetyStateError)?;

        if next_state.locked_view() > self.state.locked_view() {
            Event::UpdateLockedView(UpdateLockedViewEvent {
                timestamp: SystemTime::now(),
                locked_view: next_state.locked_view(),
            })
            .publish(&self.event_publisher);
        }

        self.state = next_state;
        Ok(())
    }
}

/// Failures that prevent Safety Rules from guaranteeing durability. Both are fatal.
#[derive(Debug)]
pub enum SafetyRulesError {
    PersistSafetyStateError(std::io::Error),
    LoadSafetyStateError(KVGetError),
}

impl From<KVGetError> for SafetyRulesError {
    fn from(value: KVGetError) -> Self {
        SafetyRulesError::LoadSafetyStateError(value)
    }
}
