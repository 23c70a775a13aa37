/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Subprotocol for view progression and leader selection.
//!
//! # Views
//!
//! Within an epoch, consensus proceeds in views. In each view, one validator (the view's *leader*)
//! proposes a vertex, and the other validators vote for it. A view ends in one of two ways:
//! 1. **A QC forms** for the view (or a higher one). The replica enters the next view immediately,
//!    which makes progress as fast as the network allows.
//! 2. **A TC forms** for the view (or a higher one). This happens when a quorum of validators timed out in
//!    the view without seeing a QC.
//!
//! Both are folded into the replica's [`HighQC`](crate::types::certificates::HighQC): the pacemaker
//! enters `high_qc.highest_view() + 1` whenever that is beyond the current view, emitting a
//! [`ViewUpdate`](types::ViewUpdate).
//!
//! # Local timeouts
//!
//! When a view starts, the pacemaker asks the [`Scheduler`](crate::scheduler::Scheduler) to deliver a
//! [`ScheduledLocalTimeout`](types::ScheduledLocalTimeout) for it. If the timeout is delivered while the
//! view is still current, the replica:
//! 1. Takes the vote it cast in the view. If it has not voted, it builds an empty *timeout vertex* on top of
//!    its highest QC and votes for it.
//! 2. Upgrades the vote into a timeout vote through Safety Rules and broadcasts it.
//! 3. Schedules another timeout for the same view, so the timeout vote is re-broadcast while the view
//!    lasts.
//!
//! A timeout delivered after its view has ended is a no-op, so timeouts never need to be cancelled.
//!
//! The timeout of a view is computed by a [`TimeoutCalculator`](timeout::TimeoutCalculator) from the
//! number of consecutive views that ended in a TC: `base * rate^min(n, max_exponent)`.
//!
//! # Leader selection
//!
//! Leaders are selected by [`ProposerElection`](proposer_election::ProposerElection) using Interleaved
//! Weighted Round Robin over the epoch's validator set: over any window of `total_power` consecutive
//! views, each validator leads as many views as it has power, and views led by the same validator are
//! spread out.

pub mod implementation;
pub use implementation::{Pacemaker, PacemakerConfiguration, PacemakerError};

pub mod proposer_election;

pub mod timeout;

pub mod types;
