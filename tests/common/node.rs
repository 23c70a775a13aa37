//! A replica wired to the mock collaborators, and a driver that runs a group of them to a goal.

use std::time::Duration;

use ed25519_dalek::{SigningKey, VerifyingKey};
use epoch_bft::{
    config::Configuration,
    epoch_manager::{
        types::{BFTConfiguration, EpochChange, Epoched},
        EpochManager, EpochManagerError,
    },
    ledger::LedgerUpdate,
    pacemaker::types::ScheduledLocalTimeout,
    types::{
        basic::{CryptoHash, EpochNumber, Power, ViewNumber},
        validators::ValidatorSet,
        vertex::LedgerHeader,
    },
    vertex_store::VertexStoreState,
};
use rand_core::OsRng;

use super::{
    ledger::MockLedger,
    mem_db::MemDB,
    network::{Delivery, NetworkStub},
    scheduler::RecordingScheduler,
};

pub(crate) fn signing_keys(count: usize) -> Vec<SigningKey> {
    let mut csprng = OsRng {};
    (0..count).map(|_| SigningKey::generate(&mut csprng)).collect()
}

/// A validator set in which every key in `keys` has a power of 1.
pub(crate) fn validator_set_of(keys: impl IntoIterator<Item = VerifyingKey>) -> ValidatorSet {
    let mut validator_set = ValidatorSet::new();
    for key in keys {
        validator_set.put(&key, Power::new(1));
    }
    validator_set
}

/// The configuration of an epoch that starts from a genesis vertex on top of the ledger state `state_version`.
pub(crate) fn genesis_bft_configuration(
    epoch: EpochNumber,
    state_version: u64,
    accumulator: CryptoHash,
    validator_set: ValidatorSet,
) -> BFTConfiguration {
    BFTConfiguration {
        validator_set,
        vertex_store_state: VertexStoreState::create_for_genesis(LedgerHeader::genesis(
            epoch,
            state_version,
            accumulator,
            0,
        )),
    }
}

/// The epoch change that the commit of `end`, the last ledger state of an epoch, produces.
pub(crate) fn next_epoch_change(end: LedgerHeader, validator_set: ValidatorSet) -> EpochChange {
    let epoch = end.epoch.next();
    EpochChange {
        epoch,
        proof: end,
        bft_configuration: genesis_bft_configuration(
            epoch,
            end.state_version,
            end.accumulator,
            validator_set,
        ),
    }
}

pub(crate) fn test_configuration(me: SigningKey) -> Configuration {
    Configuration::builder()
        .me(me)
        .pacemaker_base_timeout(Duration::from_millis(500))
        .pacemaker_timeout_rate(1.5)
        .pacemaker_max_timeout_exponent(4)
        .vertex_request_timeout(Duration::from_millis(200))
        .vertex_request_max_attempts(3)
        .ledger_sync_timeout(Duration::from_millis(1000))
        .max_buffered_epochs(2)
        .max_buffered_events_per_epoch(64)
        .max_queued_events_per_view(64)
        .log_events(false)
        .build()
}

/// A replica of the consensus core, together with its own ledger, key-value store, and scheduler.
///
/// Whenever the ledger commits a vertex that ends the epoch, the node changes into the next epoch with the
/// same validator set. A ledger status update from a peer is treated as a completed ledger sync.
pub(crate) struct Node {
    epoch_manager: EpochManager<NetworkStub, MemDB, RecordingScheduler>,
    network: NetworkStub,
    scheduler: RecordingScheduler,
    kv_store: MemDB,
    ledger: MockLedger,
    validator_set: ValidatorSet,
}

impl Node {
    pub(crate) fn new(
        me: SigningKey,
        network: NetworkStub,
        bft_configuration: BFTConfiguration,
        epoch_length: Option<u64>,
    ) -> Node {
        let epoch = bft_configuration
            .vertex_store_state
            .root_header()
            .ledger_header
            .epoch;
        let validator_set = bft_configuration.validator_set.clone();
        let scheduler = RecordingScheduler::default();
        let kv_store = MemDB::new();
        let mut ledger = MockLedger::new(epoch_length);

        let epoch_manager = EpochManager::new(
            test_configuration(me),
            epoch,
            bft_configuration,
            network.clone(),
            kv_store.clone(),
            scheduler.clone(),
            &mut ledger,
            None,
        )
        .unwrap();

        Node {
            epoch_manager,
            network,
            scheduler,
            kv_store,
            ledger,
            validator_set,
        }
    }

    pub(crate) fn start(&mut self) {
        self.epoch_manager.start(&mut self.ledger).unwrap();
    }

    pub(crate) fn epoch_manager(&self) -> &EpochManager<NetworkStub, MemDB, RecordingScheduler> {
        &self.epoch_manager
    }

    pub(crate) fn ledger(&self) -> &MockLedger {
        &self.ledger
    }

    pub(crate) fn kv_store(&self) -> &MemDB {
        &self.kv_store
    }

    pub(crate) fn network(&self) -> &NetworkStub {
        &self.network
    }

    pub(crate) fn epoch(&self) -> EpochNumber {
        self.epoch_manager.epoch()
    }

    pub(crate) fn current_view(&self) -> ViewNumber {
        self.epoch_manager.current_view().unwrap()
    }

    /// Process everything that is waiting in this node's inbox. Returns the number of deliveries.
    pub(crate) fn deliver(&mut self) -> usize {
        let deliveries = self.network.drain();
        let count = deliveries.len();
        for (origin, delivery) in deliveries {
            match delivery {
                Delivery::Message(message) => self
                    .epoch_manager
                    .on_receive_msg(origin, message, &mut self.ledger)
                    .unwrap(),
                Delivery::LedgerStatus(header) => {
                    if header.is_end_of_epoch {
                        self.change_epoch(header);
                    }
                }
            }
            self.change_epochs();
        }
        count
    }

    /// Fire every timeout that has been scheduled so far.
    pub(crate) fn fire_timeouts(&mut self) {
        self.fire_local_timeouts();
        self.fire_vertex_request_timeouts();
        self.fire_ledger_sync_timeouts();
    }

    /// Fire every local timeout that has been scheduled so far. Returns their delays.
    pub(crate) fn fire_local_timeouts(&mut self) -> Vec<Duration> {
        let mut delays = Vec::new();
        for (timeout, delay) in self.scheduler.take_local_timeouts() {
            self.epoch_manager
                .process_local_timeout(timeout, &mut self.ledger)
                .unwrap();
            self.change_epochs();
            delays.push(delay);
        }
        delays
    }

    /// Fire every vertex request timeout that has been scheduled so far. Returns their delays.
    pub(crate) fn fire_vertex_request_timeouts(&mut self) -> Vec<Duration> {
        let mut delays = Vec::new();
        for (timeout, delay) in self.scheduler.take_vertex_request_timeouts() {
            self.epoch_manager
                .process_vertex_request_timeout(timeout, &mut self.ledger)
                .unwrap();
            delays.push(delay);
        }
        delays
    }

    /// Fire every ledger sync timeout that has been scheduled so far. Returns their delays.
    pub(crate) fn fire_ledger_sync_timeouts(&mut self) -> Vec<Duration> {
        let mut delays = Vec::new();
        for (timeout, delay) in self.scheduler.take_ledger_sync_timeouts() {
            self.epoch_manager
                .process_ledger_sync_timeout(timeout, &mut self.ledger)
                .unwrap();
            delays.push(delay);
        }
        delays
    }

    /// Deliver a notification from the ledger, as if it came from outside the node.
    pub(crate) fn process_ledger_update(
        &mut self,
        update: LedgerUpdate,
    ) -> Result<(), EpochManagerError> {
        self.epoch_manager
            .process_ledger_update(update, &mut self.ledger)
    }

    /// Take the local timeouts scheduled so far without firing them.
    pub(crate) fn take_local_timeouts(&self) -> Vec<Epoched<ScheduledLocalTimeout>> {
        self.scheduler
            .take_local_timeouts()
            .into_iter()
            .map(|(timeout, _)| timeout)
            .collect()
    }

    pub(crate) fn process_local_timeout(&mut self, timeout: Epoched<ScheduledLocalTimeout>) {
        self.epoch_manager
            .process_local_timeout(timeout, &mut self.ledger)
            .unwrap();
    }

    fn change_epochs(&mut self) {
        for end in self.ledger.take_epoch_ends() {
            self.change_epoch(end);
        }
    }

    fn change_epoch(&mut self, end: LedgerHeader) {
        if end.epoch != self.epoch_manager.epoch() {
            return;
        }
        let update = LedgerUpdate {
            header: end,
            epoch_change: Some(next_epoch_change(end, self.validator_set.clone())),
        };
        self.epoch_manager
            .process_ledger_update(update, &mut self.ledger)
            .unwrap();
    }
}

/// Deliver messages between `nodes` until `done` holds, firing timeouts whenever no messages are in
/// flight. Returns whether `done` held within `max_rounds` rounds.
pub(crate) fn run_until(
    nodes: &mut [Node],
    max_rounds: usize,
    done: impl Fn(&[Node]) -> bool,
) -> bool {
    for _ in 0..max_rounds {
        if done(nodes) {
            return true;
        }
        let delivered: usize = nodes.iter_mut().map(Node::deliver).sum();
        if delivered == 0 {
            nodes.iter_mut().for_each(Node::fire_timeouts);
        }
    }
    done(nodes)
}
