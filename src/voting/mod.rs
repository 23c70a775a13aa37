/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Quorum primitives shared by the consensus pipeline: collectors that combine votes into
//! [`QuorumCertificate`](crate::types::certificates::QuorumCertificate)s and
//! [`TimeoutCertificate`](crate::types::certificates::TimeoutCertificate)s, and the [`PendingVotes`] that
//! routes each incoming vote to the right collectors.
//!
//! A quorum is any set of validators whose total power is at least `2 * total_power / 3 + 1`.

pub(crate) mod collectors;

pub mod pending_votes;
pub use pending_votes::{PendingVotes, ViewVotingResult, VoteProcessingResult, VoteRejectedReason};
