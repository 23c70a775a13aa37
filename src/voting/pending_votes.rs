/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Aggregation of incoming votes into quorum and timeout certificates.

use std::collections::HashMap;

use crate::types::{
    basic::{CryptoHash, EpochNumber, VerifyingKeyBytes, ViewNumber},
    certificates::{QuorumCertificate, TimeoutCertificate},
    validators::ValidatorSet,
    voting::Vote,
};

use super::collectors::{Collector, QuorumCollector, TimeoutCollector};

/// The certificate that a vote completed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewVotingResult {
    FormedQC(QuorumCertificate),
    FormedTC(TimeoutCertificate),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteRejectedReason {
    /// The author of the vote is not in the validator set.
    InvalidAuthor,
    /// The author already cast this exact vote.
    DuplicateVote,
    /// The author already cast a different vote in the same view.
    ConflictingVote,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteProcessingResult {
    Accepted,
    Rejected(VoteRejectedReason),
    QuorumReached(ViewVotingResult),
}

/// The last vote received from an author.
#[derive(Clone, Copy, PartialEq, Eq)]
struct PreviousVote {
    epoch: EpochNumber,
    view: ViewNumber,
    vote_data_hash: CryptoHash,
    is_timeout: bool,
}

/// Keeps track of the votes received from each validator and the certificates they are building up to.
///
/// Each validator contributes at most one vote at a time. When a validator's vote for a newer view arrives,
/// its older vote is retracted from whichever collectors hold it. The only second vote accepted for the
/// same view is the timeout upgrade of the first one.
pub struct PendingVotes {
    quorum_collectors: HashMap<CryptoHash, QuorumCollector>,
    timeout_collectors: HashMap<(EpochNumber, ViewNumber), TimeoutCollector>,
    previous_votes: HashMap<VerifyingKeyBytes, PreviousVote>,
}

impl PendingVotes {
    pub fn new() -> Self {
        Self {
            quorum_collectors: HashMap::new(),
            timeout_collectors: HashMap::new(),
            previous_votes: HashMap::new(),
        }
    }

    /// Insert `vote` into the pending votes of `validator_set`.
    ///
    /// # Preconditions
    ///
    /// The vote's signatures have been checked by the caller.
    pub fn insert_vote(&mut self, vote: &Vote, validator_set: &ValidatorSet) -> VoteProcessingResult {
        let author = match validator_set.get_by_bytes(&vote.author) {
            Some(author) => author,
            None => return VoteProcessingResult::Rejected(VoteRejectedReason::InvalidAuthor),
        };
        let vote_data_hash = vote.vote_data().hash();

        if let Err(reason) = self.replace_previous_vote(vote, vote_data_hash, validator_set) {
            return VoteProcessingResult::Rejected(reason);
        }

        // 1. Try to form a QC from votes for the same vote data.
        let quorum_collector = self
            .quorum_collectors
            .entry(vote_data_hash)
            .or_insert_with(|| QuorumCollector::new(*vote.vote_data(), validator_set.clone()));
        if let Some(qc) = quorum_collector.collect(&author, vote) {
            return VoteProcessingResult::QuorumReached(ViewVotingResult::FormedQC(qc));
        }

        // 2. Try to form a TC from timeout votes for the same view.
        if vote.is_timeout() {
            let timeout_collector = self
                .timeout_collectors
                .entry((vote.epoch(), vote.view()))
                .or_insert_with(|| {
                    TimeoutCollector::new(vote.epoch(), vote.view(), validator_set.clone())
                });
            if let Some(tc) = timeout_collector.collect(&author, vote) {
                return VoteProcessingResult::QuorumReached(ViewVotingResult::FormedTC(tc));
            }
        }

        VoteProcessingResult::Accepted
    }

    /// Record `vote` as its author's latest vote, retracting the author's previous vote if it was for an
    /// earlier view.
    fn replace_previous_vote(
        &mut self,
        vote: &Vote,
        vote_data_hash: CryptoHash,
        validator_set: &ValidatorSet,
    ) -> Result<(), VoteRejectedReason> {
        let this_vote = PreviousVote {
            epoch: vote.epoch(),
            view: vote.view(),
            vote_data_hash,
            is_timeout: vote.is_timeout(),
        };

        if let Some(previous_vote) = self.previous_votes.get(&vote.author).copied() {
            if previous_vote == this_vote {
                return Err(VoteRejectedReason::DuplicateVote);
            }

            if previous_vote.epoch == this_vote.epoch && previous_vote.view == this_vote.view {
                // The only acceptable second vote in a view is the timeout upgrade of the first.
                let is_timeout_upgrade = previous_vote.vote_data_hash == vote_data_hash
                    && !previous_vote.is_timeout
                    && this_vote.is_timeout;
                if !is_timeout_upgrade {
                    return Err(VoteRejectedReason::ConflictingVote);
                }
            } else if (previous_vote.epoch, previous_vote.view) > (this_vote.epoch, this_vote.view) {
                return Err(VoteRejectedReason::ConflictingVote);
            } else if let Some(author) = validator_set.get_by_bytes(&vote.author) {
                self.retract(&author, &previous_vote);
            }
        }

        self.previous_votes.insert(vote.author, this_vote);
        Ok(())
    }

    fn retract(&mut self, author: &ed25519_dalek::VerifyingKey, previous_vote: &PreviousVote) {
        if let Some(collector) = self.quorum_collectors.get_mut(&previous_vote.vote_data_hash) {
            if collector.retract(author) {
                self.quorum_collectors.remove(&previous_vote.vote_data_hash);
            }
        }
        if previous_vote.is_timeout {
            let key = (previous_vote.epoch, previous_vote.view);
            if let Some(collector) = self.timeout_collectors.get_mut(&key) {
                if collector.retract(author) {
                    self.timeout_collectors.remove(&key);
                }
            }
        }
    }

    pub fn quorum_collectors_count(&self) -> usize {
        self.quorum_collectors.len()
    }

    pub fn timeout_collectors_count(&self) -> usize {
        self.timeout_collectors.len()
    }
}

impl Default for PendingVotes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{SigningKey, VerifyingKey};
    use rand_core::OsRng;

    use crate::types::{
        basic::{Power, SignatureBytes},
        certificates::{HighQC, TimestampedVoteData, VoteData},
        vertex::{BFTHeader, LedgerHeader},
    };

    use super::*;

    const EPOCH: EpochNumber = EpochNumber::new(0);

    fn validators(count: usize) -> (Vec<VerifyingKey>, ValidatorSet) {
        let mut csprng = OsRng {};
        let keys: Vec<VerifyingKey> = (0..count)
            .map(|_| SigningKey::generate(&mut csprng).verifying_key())
            .collect();
        let mut validator_set = ValidatorSet::new();
        for key in &keys {
            validator_set.put(key, Power::new(1));
        }
        (keys, validator_set)
    }

    fn header(view: u64, id: u8) -> BFTHeader {
        BFTHeader::new(
            ViewNumber::new(view),
            CryptoHash::new([id; 32]),
            LedgerHeader::genesis(EPOCH, view, CryptoHash::zero(), 0),
        )
    }

    fn vote_data(view: u64, id: u8) -> VoteData {
        VoteData::new(header(view, id), header(view - 1, id), None)
    }

    fn vote(author: &VerifyingKey, vote_data: VoteData) -> Vote {
        let genesis_qc = QuorumCertificate::of_genesis(
            CryptoHash::zero(),
            LedgerHeader::genesis(EPOCH, 0, CryptoHash::zero(), 0),
        );
        Vote {
            author: author.to_bytes(),
            timestamped_vote_data: TimestampedVoteData::new(vote_data, 0),
            signature: SignatureBytes::new([1u8; 64]),
            high_qc: HighQC::new(genesis_qc.clone(), genesis_qc, None),
            timeout_signature: None,
        }
    }

    fn timeout_vote(author: &VerifyingKey, vote_data: VoteData) -> Vote {
        vote(author, vote_data).with_timeout_signature(SignatureBytes::new([2u8; 64]))
    }

    #[test]
    fn qc_forms_at_quorum() {
        let (keys, validator_set) = validators(4);
        let mut pending_votes = PendingVotes::new();
        let data = vote_data(3, 7);

        for key in &keys[..2] {
            assert_eq!(
                pending_votes.insert_vote(&vote(key, data), &validator_set),
                VoteProcessingResult::Accepted
            );
        }
        match pending_votes.insert_vote(&vote(&keys[2], data), &validator_set) {
            VoteProcessingResult::QuorumReached(ViewVotingResult::FormedQC(qc)) => {
                assert_eq!(qc.vote_data, data);
                assert_eq!(qc.signatures.count(), 3);
                for (slot, validator) in qc.signatures.iter().zip(validator_set.validators()) {
                    assert_eq!(slot.is_some(), keys[..3].contains(validator));
                }
            }
            other => panic!("expected a QC, got {:?}", other),
        }
    }

    #[test]
    fn invalid_votes_are_rejected() {
        let (keys, validator_set) = validators(4);
        let (outsiders, _) = validators(1);
        let mut pending_votes = PendingVotes::new();

        assert_eq!(
            pending_votes.insert_vote(&vote(&outsiders[0], vote_data(3, 7)), &validator_set),
            VoteProcessingResult::Rejected(VoteRejectedReason::InvalidAuthor)
        );

        pending_votes.insert_vote(&vote(&keys[0], vote_data(3, 7)), &validator_set);
        assert_eq!(
            pending_votes.insert_vote(&vote(&keys[0], vote_data(3, 7)), &validator_set),
            VoteProcessingResult::Rejected(VoteRejectedReason::DuplicateVote)
        );
        assert_eq!(
            pending_votes.insert_vote(&vote(&keys[0], vote_data(3, 8)), &validator_set),
            VoteProcessingResult::Rejected(VoteRejectedReason::ConflictingVote)
        );
        assert_eq!(
            pending_votes.insert_vote(&vote(&keys[0], vote_data(2, 7)), &validator_set),
            VoteProcessingResult::Rejected(VoteRejectedReason::ConflictingVote)
        );
    }

    #[test]
    fn timeout_votes_for_different_vertices_form_a_tc() {
        let (keys, validator_set) = validators(4);
        let mut pending_votes = PendingVotes::new();

        for (id, key) in keys[..2].iter().enumerate() {
            assert_eq!(
                pending_votes.insert_vote(&timeout_vote(key, vote_data(5, id as u8)), &validator_set),
                VoteProcessingResult::Accepted
            );
        }
        match pending_votes.insert_vote(&timeout_vote(&keys[2], vote_data(5, 2)), &validator_set) {
            VoteProcessingResult::QuorumReached(ViewVotingResult::FormedTC(tc)) => {
                assert_eq!(tc.epoch, EPOCH);
                assert_eq!(tc.view, ViewNumber::new(5));
                assert_eq!(tc.signatures.count(), 3);
            }
            other => panic!("expected a TC, got {:?}", other),
        }
    }

    #[test]
    fn timeout_upgrade_counts_and_newer_votes_retract_older_ones() {
        let (keys, validator_set) = validators(4);
        let mut pending_votes = PendingVotes::new();

        // 1. A timeout upgrade of the same vote is accepted, and joins both collectors.
        let data = vote_data(4, 1);
        pending_votes.insert_vote(&vote(&keys[0], data), &validator_set);
        assert_eq!(
            pending_votes.insert_vote(&timeout_vote(&keys[0], data), &validator_set),
            VoteProcessingResult::Accepted
        );
        assert_eq!(pending_votes.quorum_collectors_count(), 1);
        assert_eq!(pending_votes.timeout_collectors_count(), 1);

        // 2. A vote for a later view retracts the earlier one, emptying its collectors.
        assert_eq!(
            pending_votes.insert_vote(&vote(&keys[0], vote_data(5, 1)), &validator_set),
            VoteProcessingResult::Accepted
        );
        assert_eq!(pending_votes.quorum_collectors_count(), 1);
        assert_eq!(pending_votes.timeout_collectors_count(), 0);
    }
}
