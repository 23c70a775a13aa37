/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages exchanged between replicas.
//!
//! Both enums in this module are closed: adding a variant makes every `match` over them that must handle it
//! fail to compile until it does.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    bft_sync::messages::{GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse},
    types::{
        basic::{EpochNumber, VerifyingKeyBytes, ViewNumber},
        certificates::HighQC,
        voting::{Proposal, Vote},
    },
};

/// Every message that a replica sends to or receives from the network.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    Consensus(ConsensusEvent),
    GetVerticesRequest(GetVerticesRequest),
    GetVerticesResponse(GetVerticesResponse),
    GetVerticesErrorResponse(GetVerticesErrorResponse),
}

impl From<ConsensusEvent> for Message {
    fn from(value: ConsensusEvent) -> Self {
        Message::Consensus(value)
    }
}

impl From<Proposal> for Message {
    fn from(value: Proposal) -> Self {
        Message::Consensus(ConsensusEvent::Proposal(value))
    }
}

impl From<Vote> for Message {
    fn from(value: Vote) -> Self {
        Message::Consensus(ConsensusEvent::Vote(value))
    }
}

impl From<GetVerticesRequest> for Message {
    fn from(value: GetVerticesRequest) -> Self {
        Message::GetVerticesRequest(value)
    }
}

impl From<GetVerticesResponse> for Message {
    fn from(value: GetVerticesResponse) -> Self {
        Message::GetVerticesResponse(value)
    }
}

impl From<GetVerticesErrorResponse> for Message {
    fn from(value: GetVerticesErrorResponse) -> Self {
        Message::GetVerticesErrorResponse(value)
    }
}

/// A consensus message: every consensus message is tagged with the epoch it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ConsensusEvent {
    Proposal(Proposal),
    Vote(Vote),
}

impl ConsensusEvent {
    pub fn epoch(&self) -> EpochNumber {
        match self {
            ConsensusEvent::Proposal(proposal) => proposal.epoch(),
            ConsensusEvent::Vote(vote) => vote.epoch(),
        }
    }

    pub fn view(&self) -> ViewNumber {
        match self {
            ConsensusEvent::Proposal(proposal) => proposal.view(),
            ConsensusEvent::Vote(vote) => vote.view(),
        }
    }

    pub fn author(&self) -> VerifyingKeyBytes {
        match self {
            ConsensusEvent::Proposal(proposal) => proposal.author,
            ConsensusEvent::Vote(vote) => vote.author,
        }
    }

    /// The high QC that the sender attached to the event.
    pub fn high_qc(&self) -> HighQC {
        match self {
            ConsensusEvent::Proposal(proposal) => proposal.high_qc(),
            ConsensusEvent::Vote(vote) => vote.high_qc.clone(),
        }
    }
}
