/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by the consensus core, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Components publish events on
//! an optional [`Sender<Event>`]; the [event bus](crate::event_bus) delivers them to the registered
//! handlers on a separate thread, so handlers never slow down consensus.

use std::{sync::mpsc::Sender, time::SystemTime};

use ed25519_dalek::VerifyingKey;

use crate::{
    bft_sync::messages::GetVerticesRequest,
    types::{
        basic::{CryptoHash, EpochNumber, ViewNumber},
        certificates::{QuorumCertificate, TimeoutCertificate},
        vertex::{LedgerHeader, Vertex},
        voting::{Proposal, Vote},
    },
};

pub enum Event {
    // Events that change the vertex store or the safety state.
    InsertVertex(InsertVertexEvent),
    CommitVertex(CommitVertexEvent),
    PruneVertex(PruneVertexEvent),
    RebuildVertexStore(RebuildVertexStoreEvent),
    UpdateHighestQC(UpdateHighestQCEvent),
    UpdateHighestTC(UpdateHighestTCEvent),
    UpdateLockedView(UpdateLockedViewEvent),
    // Events that involve broadcasting or sending a consensus message.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    TimeoutVote(TimeoutVoteEvent),
    // Events that involve receiving a consensus message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceiveVote(ReceiveVoteEvent),
    // Pacemaker events.
    StartView(StartViewEvent),
    ViewTimeout(ViewTimeoutEvent),
    CollectQC(CollectQCEvent),
    CollectTC(CollectTCEvent),
    // BFT sync events.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
    SendSyncRequest(SendSyncRequestEvent),
    SyncRequestTimeout(SyncRequestTimeoutEvent),
    ReceiveSyncRequest(ReceiveSyncRequestEvent),
    EscalateLedgerSync(EscalateLedgerSyncEvent),
    // Epoch manager events.
    StartEpoch(StartEpochEvent),
    BufferMessage(BufferMessageEvent),
    DiscardMessage(DiscardMessageEvent),
}

impl Event {
    /// Send the event to `event_publisher`, if there is one.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus going away must not stop consensus.
            let _ = event_publisher.send(self);
        }
    }
}

pub struct InsertVertexEvent {
    pub timestamp: SystemTime,
    pub vertex: Vertex,
}

pub struct CommitVertexEvent {
    pub timestamp: SystemTime,
    pub vertex: CryptoHash,
    pub view: ViewNumber,
}

pub struct PruneVertexEvent {
    pub timestamp: SystemTime,
    pub vertex: CryptoHash,
}

pub struct RebuildVertexStoreEvent {
    pub timestamp: SystemTime,
    pub root: CryptoHash,
    pub root_view: ViewNumber,
}

pub struct UpdateHighestQCEvent {
    pub timestamp: SystemTime,
    pub highest_qc: QuorumCertificate,
}

pub struct UpdateHighestTCEvent {
    pub timestamp: SystemTime,
    pub highest_tc: TimeoutCertificate,
}

pub struct UpdateLockedViewEvent {
    pub timestamp: SystemTime,
    pub locked_view: ViewNumber,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

pub struct TimeoutVoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub proposal: Proposal,
}

pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub vote: Vote,
}

pub struct StartViewEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub leader: VerifyingKey,
    pub next_leader: VerifyingKey,
}

pub struct ViewTimeoutEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub count: u32,
}

pub struct CollectQCEvent {
    pub timestamp: SystemTime,
    pub quorum_certificate: QuorumCertificate,
}

pub struct CollectTCEvent {
    pub timestamp: SystemTime,
    pub timeout_certificate: TimeoutCertificate,
}

pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub target: CryptoHash,
    pub peer: VerifyingKey,
}

pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub target: CryptoHash,
    pub vertices_fetched: usize,
}

pub struct SendSyncRequestEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub request: GetVerticesRequest,
    pub attempt: u32,
}

pub struct SyncRequestTimeoutEvent {
    pub timestamp: SystemTime,
    pub request: GetVerticesRequest,
    pub attempt: u32,
}

pub struct ReceiveSyncRequestEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub request: GetVerticesRequest,
    pub found: bool,
}

pub struct EscalateLedgerSyncEvent {
    pub timestamp: SystemTime,
    pub target: LedgerHeader,
}

pub struct StartEpochEvent {
    pub timestamp: SystemTime,
    pub epoch: EpochNumber,
    pub is_validator: bool,
}

/// A consensus event for a future epoch was buffered.
pub struct BufferMessageEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub epoch: EpochNumber,
    pub view: ViewNumber,
}

/// A consensus event was dropped because it belongs to an epoch that has passed.
pub struct DiscardMessageEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub epoch: EpochNumber,
    pub view: ViewNumber,
}
