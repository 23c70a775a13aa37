/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas as part of the BFT Sync protocol,
//! and for the local timeouts of requests.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    basic::CryptoHash,
    certificates::HighQC,
    vertex::{LedgerHeader, Vertex},
};

/// Request for `count` vertices, starting with the vertex with id `vertex_id` and continuing with its
/// ancestors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct GetVerticesRequest {
    pub vertex_id: CryptoHash,
    pub count: u32,
}

/// The vertices of a [`GetVerticesRequest`], ordered from the requested vertex towards its ancestors.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GetVerticesResponse {
    pub vertices: Vec<Vertex>,
}

/// Reply to a [`GetVerticesRequest`] that the server cannot answer in full, carrying the server's own
/// high QC so that the requester can tell whether the server is behind it, ahead of it, or in another
/// epoch.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GetVerticesErrorResponse {
    pub high_qc: HighQC,
    pub request: GetVerticesRequest,
}

/// Local timeout of the `attempt`-th (0-based) try at `request`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexRequestTimeout {
    pub request: GetVerticesRequest,
    pub attempt: u32,
}

/// Local timeout of the `attempt`-th (0-based) request to the ledger to reach `ledger_target`, made for the
/// sync of the vertex `sync_target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerSyncTimeout {
    pub sync_target: CryptoHash,
    pub ledger_target: LedgerHeader,
    pub attempt: u32,
}
