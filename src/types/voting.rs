/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signed messages that validators send each other in the course of a view: [`Proposal`]s and [`Vote`]s.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::VerifyingKey;

use super::{
    basic::{CryptoHash, EpochNumber, SignatureBytes, VerifyingKeyBytes, ViewNumber},
    certificates::{HighQC, QuorumCertificate, TimeoutCertificate, TimestampedVoteData, VoteData},
    crypto_primitives::{hash_of, is_correctly_signed},
    vertex::Vertex,
};

/// Domain separator mixed into the hash that timeout signatures sign, so that a timeout signature can
/// never be mistaken for a vote signature over the same data.
const TIMEOUT_DOMAIN: &[u8] = b"epoch_bft/timeout";

/// A validator's signed endorsement of a vertex.
///
/// A vote can be upgraded into a *timeout vote* by attaching a `timeout_signature` over
/// [`timeout_hash`](Self::timeout_hash). An upgraded vote counts towards both a QC for its vote data, and a
/// TC for its view.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub author: VerifyingKeyBytes,
    pub timestamped_vote_data: TimestampedVoteData,
    pub signature: SignatureBytes,
    pub high_qc: HighQC,
    pub timeout_signature: Option<SignatureBytes>,
}

impl Vote {
    pub fn vote_data(&self) -> &VoteData {
        &self.timestamped_vote_data.vote_data
    }

    pub fn view(&self) -> ViewNumber {
        self.vote_data().proposed.view
    }

    pub fn epoch(&self) -> EpochNumber {
        self.vote_data().proposed.ledger_header.epoch
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamped_vote_data.timestamp
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout_signature.is_some()
    }

    /// The digest that a timeout signature on this vote signs.
    pub fn timeout_hash(&self) -> CryptoHash {
        hash_of(&(TIMEOUT_DOMAIN, &self.timestamped_vote_data))
    }

    pub fn with_timeout_signature(&self, timeout_signature: SignatureBytes) -> Vote {
        Vote {
            timeout_signature: Some(timeout_signature),
            ..self.clone()
        }
    }

    /// Verify the vote's signature, and its timeout signature if it has one, against `author`.
    pub fn is_correct(&self, author: &VerifyingKey) -> bool {
        author.to_bytes() == self.author
            && is_correctly_signed(author, &self.timestamped_vote_data.hash(), &self.signature)
            && self.timeout_signature.map_or(true, |timeout_signature| {
                is_correctly_signed(author, &self.timeout_hash(), &timeout_signature)
            })
    }
}

/// A leader's signed proposal of a vertex for the current view.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub vertex: Vertex,
    pub highest_committed_qc: QuorumCertificate,
    pub highest_tc: Option<TimeoutCertificate>,
    pub author: VerifyingKeyBytes,
    pub signature: SignatureBytes,
}

impl Proposal {
    pub fn view(&self) -> ViewNumber {
        self.vertex.view
    }

    pub fn epoch(&self) -> EpochNumber {
        self.vertex.epoch
    }

    /// The high QC implied by the proposal: the QC the vertex extends, plus the proposer's highest
    /// committed QC and highest TC.
    pub fn high_qc(&self) -> HighQC {
        HighQC::new(
            self.vertex.qc.clone(),
            self.highest_committed_qc.clone(),
            self.highest_tc.clone(),
        )
    }

    pub fn is_correct(&self, author: &VerifyingKey) -> bool {
        author.to_bytes() == self.author
            && is_correctly_signed(author, &self.vertex.id, &self.signature)
    }
}
