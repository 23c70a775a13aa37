/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Vote data and the certificates that aggregate votes into evidence of a quorum.
//!
//! ## Quorum Certificates
//!
//! A [`QuorumCertificate`] certifies that a quorum of validators voted for the same [`VoteData`]: a proposed
//! header, the header of its parent, and optionally a header that becomes committed once the certificate is
//! known. Each validator signs the hash of its own [`TimestampedVoteData`], so signatures in a QC are stored
//! alongside the timestamps they cover.
//!
//! ## Timeout Certificates
//!
//! A [`TimeoutCertificate`] certifies that a quorum of validators timed out in the same view of the same
//! epoch. It is what lets the protocol advance past a view in which no QC formed.
//!
//! ## HighQC
//!
//! Every vote and proposal carries the sender's [`HighQC`], which is how replicas learn of certificates they
//! missed.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    basic::{CryptoHash, EpochNumber, SignatureBytes, ViewNumber},
    crypto_primitives::hash_of,
    vertex::{BFTHeader, LedgerHeader},
};

/// What a vote is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VoteData {
    pub proposed: BFTHeader,
    pub parent: BFTHeader,
    /// The header that becomes committed when a QC over this vote data forms. `Some` only if proposed,
    /// parent, and grandparent form a chain of consecutive views.
    pub committed: Option<BFTHeader>,
}

impl VoteData {
    pub fn new(proposed: BFTHeader, parent: BFTHeader, committed: Option<BFTHeader>) -> VoteData {
        VoteData {
            proposed,
            parent,
            committed,
        }
    }

    pub fn hash(&self) -> CryptoHash {
        hash_of(self)
    }
}

/// Vote data together with the time at which the voter cast its vote. Votes sign the hash of this type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimestampedVoteData {
    pub vote_data: VoteData,
    pub timestamp: u64,
}

impl TimestampedVoteData {
    pub fn new(vote_data: VoteData, timestamp: u64) -> TimestampedVoteData {
        TimestampedVoteData {
            vote_data,
            timestamp,
        }
    }

    pub fn hash(&self) -> CryptoHash {
        hash_of(self)
    }
}

/// A single validator's signature in a [`QuorumCertificate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimestampedSignature {
    pub timestamp: u64,
    pub signature: SignatureBytes,
}

/// Signatures of a certificate, indexed by the position of the signer in the epoch's
/// [`ValidatorSet`](crate::types::validators::ValidatorSet).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignatureSet<S: BorshSerialize + BorshDeserialize>(Vec<Option<S>>);

impl<S: Clone + BorshSerialize + BorshDeserialize> SignatureSet<S> {
    /// Create a signature set with `len` empty slots.
    pub fn new(len: usize) -> SignatureSet<S> {
        SignatureSet(vec![None; len])
    }

    pub fn get(&self, pos: usize) -> Option<&S> {
        self.0.get(pos).and_then(|s| s.as_ref())
    }

    pub fn set(&mut self, pos: usize, signature: Option<S>) {
        if let Some(slot) = self.0.get_mut(pos) {
            *slot = signature;
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of slots that hold a signature.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|s| s.is_some()).count()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Option<S>> {
        self.0.iter()
    }
}

/// Evidence that a quorum of validators voted for the same [`VoteData`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct QuorumCertificate {
    pub vote_data: VoteData,
    pub signatures: SignatureSet<TimestampedSignature>,
}

impl QuorumCertificate {
    pub fn new(
        vote_data: VoteData,
        signatures: SignatureSet<TimestampedSignature>,
    ) -> QuorumCertificate {
        QuorumCertificate {
            vote_data,
            signatures,
        }
    }

    /// The QC embedded in the genesis vertex of an epoch, which "certifies" the imaginary parent of the
    /// genesis vertex.
    pub fn of_genesis_ancestor(ledger_header: LedgerHeader) -> QuorumCertificate {
        let header = BFTHeader::of_genesis_ancestor(ledger_header);
        QuorumCertificate::new(
            VoteData::new(header, header, Some(header)),
            SignatureSet::new(0),
        )
    }

    /// The QC that certifies and commits the genesis vertex with id `genesis_id` of an epoch.
    pub fn of_genesis(genesis_id: CryptoHash, ledger_header: LedgerHeader) -> QuorumCertificate {
        let header = BFTHeader::new(ViewNumber::genesis(), genesis_id, ledger_header);
        QuorumCertificate::new(
            VoteData::new(header, header, Some(header)),
            SignatureSet::new(0),
        )
    }

    /// Header of the vertex this QC certifies.
    pub fn proposed(&self) -> &BFTHeader {
        &self.vote_data.proposed
    }

    /// Header of the parent of the vertex this QC certifies.
    pub fn parent(&self) -> &BFTHeader {
        &self.vote_data.parent
    }

    /// Header that this QC commits, if any.
    pub fn committed(&self) -> Option<&BFTHeader> {
        self.vote_data.committed.as_ref()
    }

    pub fn view(&self) -> ViewNumber {
        self.vote_data.proposed.view
    }

    pub fn epoch(&self) -> EpochNumber {
        self.vote_data.proposed.ledger_header.epoch
    }

    /// Whether this is a QC that is not backed by votes: one made for a genesis vertex.
    pub fn is_genesis(&self) -> bool {
        self.view().is_genesis() && self.vote_data.proposed == self.vote_data.parent
    }
}

/// Evidence that a quorum of validators timed out in `view` of `epoch`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimeoutCertificate {
    pub epoch: EpochNumber,
    pub view: ViewNumber,
    pub signatures: SignatureSet<SignatureBytes>,
}

/// The highest certificates known to a replica.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HighQC {
    pub highest_qc: QuorumCertificate,
    pub highest_committed_qc: QuorumCertificate,
    pub highest_tc: Option<TimeoutCertificate>,
}

impl HighQC {
    /// Create a `HighQC`, making sure the highest QC is never lower than the highest committed QC.
    pub fn new(
        highest_qc: QuorumCertificate,
        highest_committed_qc: QuorumCertificate,
        highest_tc: Option<TimeoutCertificate>,
    ) -> HighQC {
        let highest_qc = if highest_committed_qc.view() > highest_qc.view() {
            highest_committed_qc.clone()
        } else {
            highest_qc
        };
        HighQC {
            highest_qc,
            highest_committed_qc,
            highest_tc,
        }
    }

    /// The highest view that this `HighQC` proves the network has passed through.
    pub fn highest_view(&self) -> ViewNumber {
        match &self.highest_tc {
            Some(tc) if tc.view > self.highest_qc.view() => tc.view,
            _ => self.highest_qc.view(),
        }
    }

    /// Header that the highest committed QC commits.
    pub fn committed_header(&self) -> Option<&BFTHeader> {
        self.highest_committed_qc.committed()
    }
}
