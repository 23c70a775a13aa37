/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::config::Configuration).
//!
//! The consensus core logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveProposal](crate::events::ReceiveProposalEvent) is printed:
//!
//! ```text
//! ReceiveProposal, 1701329264, Id5u7f6, fNGCJyk, 3, 17
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the public key of the
//!   origin of the proposal.
//! - The fourth value is the first seven characters of the Base64 encoding of the id of the proposed
//!   vertex.
//! - The fifth and sixth values are the epoch and view of the proposed vertex.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::{
    event_bus::HandlerPtr,
    events::*,
    types::certificates::{QuorumCertificate, TimeoutCertificate},
};

// Names of each event in PascalCase for printing:
pub const INSERT_VERTEX: &str = "InsertVertex";
pub const COMMIT_VERTEX: &str = "CommitVertex";
pub const PRUNE_VERTEX: &str = "PruneVertex";
pub const REBUILD_VERTEX_STORE: &str = "RebuildVertexStore";
pub const UPDATE_HIGHEST_QC: &str = "UpdateHighestQC";
pub const UPDATE_HIGHEST_TC: &str = "UpdateHighestTC";
pub const UPDATE_LOCKED_VIEW: &str = "UpdateLockedView";

pub const PROPOSE: &str = "Propose";
pub const VOTE: &str = "Vote";
pub const TIMEOUT_VOTE: &str = "TimeoutVote";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_VOTE: &str = "ReceiveVote";

pub const START_VIEW: &str = "StartView";
pub const VIEW_TIMEOUT: &str = "ViewTimeout";
pub const COLLECT_QC: &str = "CollectQC";
pub const COLLECT_TC: &str = "CollectTC";

pub const START_SYNC: &str = "StartSync";
pub const END_SYNC: &str = "EndSync";
pub const SEND_SYNC_REQUEST: &str = "SendSyncRequest";
pub const SYNC_REQUEST_TIMEOUT: &str = "SyncRequestTimeout";
pub const RECEIVE_SYNC_REQUEST: &str = "ReceiveSyncRequest";
pub const ESCALATE_LEDGER_SYNC: &str = "EscalateLedgerSync";

pub const START_EPOCH: &str = "StartEpoch";
pub const BUFFER_MESSAGE: &str = "BufferMessage";
pub const DISCARD_MESSAGE: &str = "DiscardMessage";

/// Implemented by event types. Prints the event's log line.
pub(crate) trait Logger {
    fn log(&self);
}

/// Returns a pointer to the default logging handler for events.
pub(crate) fn get_logger() -> HandlerPtr<Event> {
    Box::new(|event: &Event| event.log())
}

impl Logger for Event {
    fn log(&self) {
        match self {
            Event::InsertVertex(event) => event.log(),
            Event::CommitVertex(event) => event.log(),
            Event::PruneVertex(event) => event.log(),
            Event::RebuildVertexStore(event) => event.log(),
            Event::UpdateHighestQC(event) => event.log(),
            Event::UpdateHighestTC(event) => event.log(),
            Event::UpdateLockedView(event) => event.log(),
            Event::Propose(event) => event.log(),
            Event::Vote(event) => event.log(),
            Event::TimeoutVote(event) => event.log(),
            Event::ReceiveProposal(event) => event.log(),
            Event::ReceiveVote(event) => event.log(),
            Event::StartView(event) => event.log(),
            Event::ViewTimeout(event) => event.log(),
            Event::CollectQC(event) => event.log(),
            Event::CollectTC(event) => event.log(),
            Event::StartSync(event) => event.log(),
            Event::EndSync(event) => event.log(),
            Event::SendSyncRequest(event) => event.log(),
            Event::SyncRequestTimeout(event) => event.log(),
            Event::ReceiveSyncRequest(event) => event.log(),
            Event::EscalateLedgerSync(event) => event.log(),
            Event::StartEpoch(event) => event.log(),
            Event::BufferMessage(event) => event.log(),
            Event::DiscardMessage(event) => event.log(),
        }
    }
}

impl Logger for InsertVertexEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}, {}",
            INSERT_VERTEX,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.vertex.id.bytes()),
            self.vertex.epoch,
            self.vertex.view
        )
    }
}

impl Logger for CommitVertexEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}",
            COMMIT_VERTEX,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.vertex.bytes()),
            self.view
        )
    }
}

impl Logger for PruneVertexEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}",
            PRUNE_VERTEX,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.vertex.bytes())
        )
    }
}

impl Logger for RebuildVertexStoreEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}",
            REBUILD_VERTEX_STORE,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.root.bytes()),
            self.root_view
        )
    }
}

impl Logger for UpdateHighestQCEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}",
            UPDATE_HIGHEST_QC,
            secs_since_unix_epoch(self.timestamp),
            quorum_certificate_info(&self.highest_qc)
        )
    }
}

impl Logger for UpdateHighestTCEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}",
            UPDATE_HIGHEST_TC,
            secs_since_unix_epoch(self.timestamp),
            timeout_certificate_info(&self.highest_tc)
        )
    }
}

impl Logger for UpdateLockedViewEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}",
            UPDATE_LOCKED_VIEW,
            secs_since_unix_epoch(self.timestamp),
            self.locked_view
        )
    }
}

impl Logger for ProposeEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}, {}",
            PROPOSE,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.proposal.vertex.id.bytes()),
            self.proposal.vertex.epoch,
            self.proposal.vertex.view
        )
    }
}

impl Logger for VoteEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}",
            VOTE,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.vote.vote_data().proposed.vertex_id.bytes()),
            self.vote.view()
        )
    }
}

impl Logger for TimeoutVoteEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}",
            TIMEOUT_VOTE,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.vote.vote_data().proposed.vertex_id.bytes()),
            self.vote.view()
        )
    }
}

impl Logger for ReceiveProposalEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}, {}, {}",
            RECEIVE_PROPOSAL,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.origin.to_bytes()),
            first_seven_base64_chars(&self.proposal.vertex.id.bytes()),
            self.proposal.vertex.epoch,
            self.proposal.vertex.view
        )
    }
}

impl Logger for ReceiveVoteEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}, {}, {}",
            RECEIVE_VOTE,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.origin.to_bytes()),
            first_seven_base64_chars(&self.vote.vote_data().proposed.vertex_id.bytes()),
            self.vote.view(),
            self.vote.is_timeout()
        )
    }
}

impl Logger for StartViewEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}, {}",
            START_VIEW,
            secs_since_unix_epoch(self.timestamp),
            self.view,
            first_seven_base64_chars(&self.leader.to_bytes()),
            first_seven_base64_chars(&self.next_leader.to_bytes())
        )
    }
}

impl Logger for ViewTimeoutEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}",
            VIEW_TIMEOUT,
            secs_since_unix_epoch(self.timestamp),
            self.view,
            self.count
        )
    }
}

impl Logger for CollectQCEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}",
            COLLECT_QC,
            secs_since_unix_epoch(self.timestamp),
            quorum_certificate_info(&self.quorum_certificate)
        )
    }
}

impl Logger for CollectTCEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}",
            COLLECT_TC,
            secs_since_unix_epoch(self.timestamp),
            timeout_certificate_info(&self.timeout_certificate)
        )
    }
}

impl Logger for StartSyncEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}",
            START_SYNC,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.target.bytes()),
            first_seven_base64_chars(&self.peer.to_bytes())
        )
    }
}

impl Logger for EndSyncEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}",
            END_SYNC,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.target.bytes()),
            self.vertices_fetched
        )
    }
}

impl Logger for SendSyncRequestEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}, {}, {}",
            SEND_SYNC_REQUEST,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.peer.to_bytes()),
            first_seven_base64_chars(&self.request.vertex_id.bytes()),
            self.request.count,
            self.attempt
        )
    }
}

impl Logger for SyncRequestTimeoutEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}",
            SYNC_REQUEST_TIMEOUT,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.request.vertex_id.bytes()),
            self.attempt
        )
    }
}

impl Logger for ReceiveSyncRequestEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}, {}, {}",
            RECEIVE_SYNC_REQUEST,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.origin.to_bytes()),
            first_seven_base64_chars(&self.request.vertex_id.bytes()),
            self.request.count,
            self.found
        )
    }
}

impl Logger for EscalateLedgerSyncEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}",
            ESCALATE_LEDGER_SYNC,
            secs_since_unix_epoch(self.timestamp),
            self.target.epoch,
            self.target.state_version
        )
    }
}

impl Logger for StartEpochEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}",
            START_EPOCH,
            secs_since_unix_epoch(self.timestamp),
            self.epoch,
            self.is_validator
        )
    }
}

impl Logger for BufferMessageEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}, {}",
            BUFFER_MESSAGE,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.origin.to_bytes()),
            self.epoch,
            self.view
        )
    }
}

impl Logger for DiscardMessageEvent {
    fn log(&self) {
        log::info!(
            "{}, {}, {}, {}, {}",
            DISCARD_MESSAGE,
            secs_since_unix_epoch(self.timestamp),
            first_seven_base64_chars(&self.origin.to_bytes()),
            self.epoch,
            self.view
        )
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn quorum_certificate_info(qc: &QuorumCertificate) -> String {
    format!(
        "epoch: {}, view: {}, vertex: {}, no. of signatures: {}",
        qc.epoch(),
        qc.view(),
        first_seven_base64_chars(&qc.proposed().vertex_id.bytes()),
        qc.signatures.count()
    )
}

fn timeout_certificate_info(tc: &TimeoutCertificate) -> String {
    format!(
        "epoch: {}, view: {}, no. of signatures: {}",
        tc.epoch,
        tc.view,
        tc.signatures.count()
    )
}
