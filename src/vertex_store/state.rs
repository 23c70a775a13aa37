/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state that a [`VertexStore`](super::VertexStore) is built from.

use crate::types::{
    certificates::{HighQC, QuorumCertificate},
    vertex::{BFTHeader, LedgerHeader, Vertex},
};

use super::VertexStoreError;

/// A vertex together with the ledger header that executing it produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedVertex {
    pub vertex: Vertex,
    pub ledger_header: LedgerHeader,
}

impl PreparedVertex {
    pub fn header(&self) -> BFTHeader {
        BFTHeader::new(self.vertex.view, self.vertex.id, self.ledger_header)
    }
}

/// A committed root, the uncommitted vertices above it, and the highest known certificates.
///
/// ## Invariants
///
/// 1. `high_qc.highest_committed_qc` commits `root`.
/// 2. `vertices` are ordered so that every vertex comes after its parent, and the first vertex's parent
///    is `root`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexStoreState {
    root: Vertex,
    root_header: BFTHeader,
    high_qc: HighQC,
    vertices: Vec<Vertex>,
}

impl VertexStoreState {
    pub fn new(
        root: Vertex,
        high_qc: HighQC,
        vertices: Vec<Vertex>,
    ) -> Result<VertexStoreState, VertexStoreError> {
        let root_header = match high_qc.committed_header() {
            Some(header) if header.vertex_id == root.id => *header,
            _ => return Err(VertexStoreError::InvalidResumeState),
        };

        Ok(VertexStoreState {
            root,
            root_header,
            high_qc,
            vertices,
        })
    }

    /// The state of an epoch that has just started: a genesis vertex and nothing else.
    pub fn create_for_genesis(ledger_header: LedgerHeader) -> VertexStoreState {
        let genesis = Vertex::genesis(ledger_header);
        let genesis_qc = QuorumCertificate::of_genesis(genesis.id, ledger_header);
        let root_header = BFTHeader::new(genesis.view, genesis.id, ledger_header);

        VertexStoreState {
            root: genesis,
            root_header,
            high_qc: HighQC::new(genesis_qc.clone(), genesis_qc, None),
            vertices: Vec::new(),
        }
    }

    pub fn root(&self) -> &Vertex {
        &self.root
    }

    pub fn root_header(&self) -> &BFTHeader {
        &self.root_header
    }

    pub fn high_qc(&self) -> &HighQC {
        &self.high_qc
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }
}
