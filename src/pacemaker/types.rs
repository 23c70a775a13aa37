/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types produced and consumed by the [`Pacemaker`](super::implementation::Pacemaker).

use std::time::Duration;

use ed25519_dalek::VerifyingKey;

use crate::types::{basic::ViewNumber, certificates::HighQC};

/// Notification that the locally-known highest view has advanced.
///
/// `view` is the view being entered, `high_qc` is the evidence that the previous view is over, and
/// `leader` and `next_leader` are the leaders of `view` and of the view after it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewUpdate {
    pub view: ViewNumber,
    pub high_qc: HighQC,
    pub leader: VerifyingKey,
    pub next_leader: VerifyingKey,
}

/// A local timeout for `view`, to be delivered back to the pacemaker after `timeout` has elapsed.
///
/// `count` is the number of times `view` has already timed out locally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledLocalTimeout {
    pub view: ViewNumber,
    pub timeout: Duration,
    pub count: u32,
}
