/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pluggable [`Scheduler`] trait.
//!
//! The consensus core has no clock of its own. Whenever it needs to be woken up later, it asks the
//! scheduler to deliver an epoch-tagged event after a delay. The runtime hands the event back to the
//! [`EpochManager`](crate::epoch_manager::EpochManager) when the delay has passed. Events that arrive after
//! their epoch or view has passed are ignored, so the scheduler never needs to cancel anything.

use std::time::Duration;

use crate::{
    bft_sync::messages::{LedgerSyncTimeout, VertexRequestTimeout},
    epoch_manager::types::Epoched,
    pacemaker::types::ScheduledLocalTimeout,
};

pub trait Scheduler: Clone + Send {
    /// Deliver `timeout` to [`EpochManager::process_local_timeout`](crate::epoch_manager::EpochManager::process_local_timeout)
    /// after `delay`.
    fn schedule_local_timeout(&mut self, timeout: Epoched<ScheduledLocalTimeout>, delay: Duration);

    /// Deliver `timeout` to [`EpochManager::process_vertex_request_timeout`](crate::epoch_manager::EpochManager::process_vertex_request_timeout)
    /// after `delay`.
    fn schedule_vertex_request_timeout(
        &mut self,
        timeout: Epoched<VertexRequestTimeout>,
        delay: Duration,
    );

    /// Deliver `timeout` to [`EpochManager::process_ledger_sync_timeout`](crate::epoch_manager::EpochManager::process_ledger_sync_timeout)
    /// after `delay`.
    fn schedule_ledger_sync_timeout(&mut self, timeout: Epoched<LedgerSyncTimeout>, delay: Duration);
}
