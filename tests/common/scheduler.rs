use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use epoch_bft::{
    bft_sync::messages::{LedgerSyncTimeout, VertexRequestTimeout},
    epoch_manager::types::Epoched,
    pacemaker::types::ScheduledLocalTimeout,
    scheduler::Scheduler,
};

/// A scheduler that never fires anything by itself. Tests take the scheduled timeouts and deliver them
/// when they choose to.
#[derive(Clone, Default)]
pub(crate) struct RecordingScheduler {
    local_timeouts: Arc<Mutex<Vec<(Epoched<ScheduledLocalTimeout>, Duration)>>>,
    vertex_request_timeouts: Arc<Mutex<Vec<(Epoched<VertexRequestTimeout>, Duration)>>>,
    ledger_sync_timeouts: Arc<Mutex<Vec<(Epoched<LedgerSyncTimeout>, Duration)>>>,
}

impl RecordingScheduler {
    pub(crate) fn take_local_timeouts(&self) -> Vec<(Epoched<ScheduledLocalTimeout>, Duration)> {
        std::mem::take(&mut *self.local_timeouts.lock().unwrap())
    }

    pub(crate) fn take_vertex_request_timeouts(
        &self,
    ) -> Vec<(Epoched<VertexRequestTimeout>, Duration)> {
        std::mem::take(&mut *self.vertex_request_timeouts.lock().unwrap())
    }

    pub(crate) fn take_ledger_sync_timeouts(&self) -> Vec<(Epoched<LedgerSyncTimeout>, Duration)> {
        std::mem::take(&mut *self.ledger_sync_timeouts.lock().unwrap())
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule_local_timeout(&mut self, timeout: Epoched<ScheduledLocalTimeout>, delay: Duration) {
        self.local_timeouts.lock().unwrap().push((timeout, delay));
    }

    fn schedule_vertex_request_timeout(
        &mut self,
        timeout: Epoched<VertexRequestTimeout>,
        delay: Duration,
    ) {
        self.vertex_request_timeouts
            .lock()
            .unwrap()
            .push((timeout, delay));
    }

    fn schedule_ledger_sync_timeout(&mut self, timeout: Epoched<LedgerSyncTimeout>, delay: Duration) {
        self.ledger_sync_timeouts.lock().unwrap().push((timeout, delay));
    }
}
