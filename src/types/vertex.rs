/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`Vertex`] type and the headers that describe a vertex from the point of view of
//! consensus ([`BFTHeader`]) and of the ledger ([`LedgerHeader`]).

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    basic::{CryptoHash, Data, EpochNumber, VerifyingKeyBytes, ViewNumber},
    certificates::QuorumCertificate,
    crypto_primitives::hash_of,
};

/// The state of the ledger after executing a vertex and all of its ancestors.
///
/// Ledger headers are produced by the [ledger](crate::ledger::Ledger) when it prepares a vertex, and are
/// opaque to consensus except for `epoch` and `is_end_of_epoch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LedgerHeader {
    pub epoch: EpochNumber,
    pub state_version: u64,
    pub accumulator: CryptoHash,
    pub timestamp: u64,
    pub is_end_of_epoch: bool,
}

impl LedgerHeader {
    /// The ledger header of the genesis vertex of `epoch`, continuing from the ledger state identified by
    /// `state_version` and `accumulator`.
    pub fn genesis(
        epoch: EpochNumber,
        state_version: u64,
        accumulator: CryptoHash,
        timestamp: u64,
    ) -> LedgerHeader {
        LedgerHeader {
            epoch,
            state_version,
            accumulator,
            timestamp,
            is_end_of_epoch: false,
        }
    }
}

/// A vertex as referenced from vote data: its view, its id, and the ledger state it results in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BFTHeader {
    pub view: ViewNumber,
    pub vertex_id: CryptoHash,
    pub ledger_header: LedgerHeader,
}

impl BFTHeader {
    pub fn new(view: ViewNumber, vertex_id: CryptoHash, ledger_header: LedgerHeader) -> BFTHeader {
        BFTHeader {
            view,
            vertex_id,
            ledger_header,
        }
    }

    /// Header of the imaginary parent of a genesis vertex.
    pub fn of_genesis_ancestor(ledger_header: LedgerHeader) -> BFTHeader {
        BFTHeader::new(ViewNumber::genesis(), CryptoHash::zero(), ledger_header)
    }
}

/// A proposed block.
///
/// A vertex points to its parent through the quorum certificate it embeds: `qc.proposed()` is the
/// parent's header and `qc.parent()` is the grandparent's.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vertex {
    pub id: CryptoHash,
    pub epoch: EpochNumber,
    pub view: ViewNumber,
    pub qc: QuorumCertificate,
    pub payload: Data,
    pub proposer: Option<VerifyingKeyBytes>,
    pub is_timeout: bool,
}

impl Vertex {
    pub fn new(
        epoch: EpochNumber,
        view: ViewNumber,
        qc: QuorumCertificate,
        payload: Data,
        proposer: Option<VerifyingKeyBytes>,
    ) -> Vertex {
        Self::build(epoch, view, qc, payload, proposer, false)
    }

    /// An empty vertex voted for by a replica whose view timed out before it could vote for a proposal.
    ///
    /// Timeout vertices have no proposer, so every replica that times out on the same high QC builds the
    /// same vertex.
    pub fn new_timeout(epoch: EpochNumber, view: ViewNumber, qc: QuorumCertificate) -> Vertex {
        Self::build(epoch, view, qc, Data::empty(), None, true)
    }

    /// The root of the vertex tree of a fresh epoch.
    pub fn genesis(ledger_header: LedgerHeader) -> Vertex {
        let qc = QuorumCertificate::of_genesis_ancestor(ledger_header);
        Self::build(
            ledger_header.epoch,
            ViewNumber::genesis(),
            qc,
            Data::empty(),
            None,
            false,
        )
    }

    fn build(
        epoch: EpochNumber,
        view: ViewNumber,
        qc: QuorumCertificate,
        payload: Data,
        proposer: Option<VerifyingKeyBytes>,
        is_timeout: bool,
    ) -> Vertex {
        let id = Self::hash(epoch, view, &qc, &payload, &proposer, is_timeout);
        Vertex {
            id,
            epoch,
            view,
            qc,
            payload,
            proposer,
            is_timeout,
        }
    }

    pub fn hash(
        epoch: EpochNumber,
        view: ViewNumber,
        qc: &QuorumCertificate,
        payload: &Data,
        proposer: &Option<VerifyingKeyBytes>,
        is_timeout: bool,
    ) -> CryptoHash {
        hash_of(&(epoch, view, qc, payload, proposer, is_timeout))
    }

    /// Header of this vertex's parent.
    pub fn parent_header(&self) -> &BFTHeader {
        self.qc.proposed()
    }

    /// Header of this vertex's grandparent.
    pub fn grandparent_header(&self) -> &BFTHeader {
        self.qc.parent()
    }

    pub fn parent_id(&self) -> CryptoHash {
        self.qc.proposed().vertex_id
    }

    pub fn is_genesis(&self) -> bool {
        self.view.is_genesis()
    }

    /// Whether this vertex, its parent, or its grandparent is at the genesis view.
    pub fn touches_genesis(&self) -> bool {
        self.view.is_genesis()
            || self.parent_header().view.is_genesis()
            || self.grandparent_header().view.is_genesis()
    }

    /// Whether this vertex's view immediately follows its parent's view.
    pub fn has_direct_parent(&self) -> bool {
        self.view == self.parent_header().view.next()
    }

    /// Whether this vertex's parent's view immediately follows its grandparent's view.
    pub fn parent_has_direct_parent(&self) -> bool {
        self.parent_header().view == self.grandparent_header().view.next()
    }

    /// Check the structural well-formedness of a non-genesis vertex:
    /// 1. Its id is the hash of its contents.
    /// 2. Its view is strictly greater than its parent's.
    /// 3. Its QC is either a genesis QC, or certifies a view strictly greater than its parent's.
    pub fn is_well_formed(&self) -> bool {
        let id_matches = self.id
            == Self::hash(
                self.epoch,
                self.view,
                &self.qc,
                &self.payload,
                &self.proposer,
                self.is_timeout,
            );
        /* 1 */
        id_matches
        /* 2 */
            && self.view > self.parent_header().view
        /* 3 */
            && (self.qc.is_genesis() || self.parent_header().view > self.grandparent_header().view)
    }
}
