//! Builders for vertices, certificates, proposals, and votes, made without running consensus.

use ed25519_dalek::SigningKey;
use epoch_bft::{
    ledger::Ledger,
    types::{
        basic::{CryptoHash, Data, EpochNumber, ViewNumber},
        certificates::{HighQC, QuorumCertificate, SignatureSet, TimestampedVoteData, VoteData},
        crypto_primitives::Keypair,
        vertex::{BFTHeader, LedgerHeader, Vertex},
        voting::{Proposal, Vote},
    },
};

use super::ledger::MockLedger;

/// A chain of certified vertices on top of the genesis vertex of an epoch. `vertices[i]` is certified by
/// `qcs[i]`, and `vertices[0]` is the genesis vertex.
pub(crate) struct Chain {
    ledger: MockLedger,
    pub(crate) vertices: Vec<Vertex>,
    pub(crate) headers: Vec<BFTHeader>,
    pub(crate) qcs: Vec<QuorumCertificate>,
}

impl Chain {
    /// A chain holding only the genesis vertex of `epoch`, as built by
    /// [`VertexStoreState::create_for_genesis`](epoch_bft::vertex_store::VertexStoreState::create_for_genesis)
    /// from the same ledger header.
    pub(crate) fn genesis(epoch: EpochNumber, state_version: u64) -> Chain {
        let ledger_header = LedgerHeader::genesis(epoch, state_version, CryptoHash::zero(), 0);
        let genesis = Vertex::genesis(ledger_header);
        let header = BFTHeader::new(genesis.view, genesis.id, ledger_header);
        let qc = QuorumCertificate::of_genesis(genesis.id, ledger_header);

        Chain {
            ledger: MockLedger::new(None),
            vertices: vec![genesis],
            headers: vec![header],
            qcs: vec![qc],
        }
    }

    /// Extend the tip of the chain with a vertex at `view`, and certify it.
    pub(crate) fn extend(&mut self, view: u64, proposer: &SigningKey) -> &Vertex {
        let parent_qc = self.qcs[self.qcs.len() - 1].clone();
        let vertex = Vertex::new(
            parent_qc.epoch(),
            ViewNumber::new(view),
            parent_qc,
            Data::empty(),
            Some(proposer.verifying_key().to_bytes()),
        );
        self.push(vertex)
    }

    /// Extend the vertex at `index` with a vertex at `view`, and certify it. The new vertex becomes the
    /// tip of the chain.
    pub(crate) fn fork(&mut self, index: usize, view: u64, proposer: &SigningKey) -> &Vertex {
        let parent_qc = self.qcs[index].clone();
        let vertex = Vertex::new(
            parent_qc.epoch(),
            ViewNumber::new(view),
            parent_qc,
            Data::empty(),
            Some(proposer.verifying_key().to_bytes()),
        );
        self.push(vertex)
    }

    fn push(&mut self, vertex: Vertex) -> &Vertex {
        let ledger_header = self.ledger.prepare(&[], &vertex).unwrap();
        let header = BFTHeader::new(vertex.view, vertex.id, ledger_header);
        let qc = QuorumCertificate::new(vote_data_for(&vertex, header), SignatureSet::new(0));

        self.headers.push(header);
        self.qcs.push(qc);
        self.vertices.push(vertex);
        &self.vertices[self.vertices.len() - 1]
    }

    pub(crate) fn tip(&self) -> usize {
        self.vertices.len() - 1
    }

    /// The high QC of a replica that has seen the QC of the vertex at `index`, and whose highest commit
    /// was made by the QC of the vertex at `committed_index`.
    pub(crate) fn high_qc(&self, index: usize, committed_index: usize) -> HighQC {
        HighQC::new(
            self.qcs[index].clone(),
            self.qcs[committed_index].clone(),
            None,
        )
    }

    /// The proposal of the vertex at `index`, signed by `proposer`.
    pub(crate) fn proposal(
        &self,
        index: usize,
        committed_index: usize,
        proposer: &SigningKey,
    ) -> Proposal {
        let vertex = self.vertices[index].clone();
        Proposal {
            signature: Keypair::new(proposer.clone()).sign(&vertex.id),
            author: proposer.verifying_key().to_bytes(),
            highest_committed_qc: self.qcs[committed_index].clone(),
            highest_tc: None,
            vertex,
        }
    }

    /// `voter`'s vote for the vertex at `index`, sent with `high_qc`.
    pub(crate) fn vote(&self, index: usize, voter: &SigningKey, high_qc: HighQC) -> Vote {
        let timestamped_vote_data =
            TimestampedVoteData::new(self.qcs[index].vote_data, 0);
        Vote {
            author: voter.verifying_key().to_bytes(),
            signature: Keypair::new(voter.clone()).sign(&timestamped_vote_data.hash()),
            timestamped_vote_data,
            high_qc,
            timeout_signature: None,
        }
    }
}

/// The vote data that an honest replica signs for `vertex`. The grandparent is committed only if the
/// three vertices have consecutive views and none of them is a genesis vertex.
pub(crate) fn vote_data_for(vertex: &Vertex, proposed: BFTHeader) -> VoteData {
    let committed = if vertex.touches_genesis()
        || !vertex.has_direct_parent()
        || !vertex.parent_has_direct_parent()
    {
        None
    } else {
        Some(*vertex.grandparent_header())
    };
    VoteData::new(proposed, *vertex.parent_header(), committed)
}
