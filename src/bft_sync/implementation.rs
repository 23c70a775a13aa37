/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implementation of the [`BFTSync`] client and server.

use std::{
    collections::HashMap,
    sync::{mpsc::Sender, Arc},
    time::{Duration, SystemTime},
};

use ed25519_dalek::VerifyingKey;

use crate::{
    counters::{CounterType, SystemCounters},
    epoch_manager::types::Epoched,
    events::{
        EndSyncEvent, EscalateLedgerSyncEvent, Event, ReceiveSyncRequestEvent,
        SendSyncRequestEvent, StartSyncEvent, SyncRequestTimeoutEvent,
    },
    ledger::Ledger,
    networking::{network::Network, sending::SenderHandle},
    scheduler::Scheduler,
    types::{
        basic::{CryptoHash, EpochNumber},
        certificates::{HighQC, QuorumCertificate},
        validators::ValidatorSet,
        vertex::{LedgerHeader, Vertex},
    },
    vertex_store::{VertexStore, VertexStoreError, VertexStoreState},
};

use super::messages::{
    GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, LedgerSyncTimeout,
    VertexRequestTimeout,
};

/// Number of vertices fetched to rebuild the vertex store after a ledger sync: the vertex certified by the
/// highest committed QC, its parent, and the committed grandparent.
const COMMITTED_CHAIN_LENGTH: u32 = 3;

/// Outcome of [`BFTSync::sync_to_qc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncResult {
    /// The certified vertices are in the vertex store and the certificates have been added to it.
    Synced,
    /// The certified vertices are being fetched.
    InProgress,
    /// The high QC does not belong to the current epoch.
    Invalid,
}

/// Configuration variables for [`BFTSync`].
#[derive(Clone, Copy, Debug)]
pub struct BFTSyncConfiguration {
    /// Timeout of the first attempt at a request. Attempt `k` (0-based) times out after
    /// `request_timeout * 2^k`.
    pub request_timeout: Duration,

    /// Number of attempts at a request before the sync is handed over to the ledger. Also the number of
    /// times the ledger is asked to sync before a sync waiting for it is abandoned.
    pub max_attempts: u32,

    /// How long a sync waits for the ledger to catch up before asking it again. Attempt `k` (0-based) times
    /// out after `ledger_sync_timeout * 2^k`.
    pub ledger_sync_timeout: Duration,
}

/// Fetches the vertices certified by high QCs that this replica has not inserted yet, and serves the
/// same requests from peers.
pub struct BFTSync<N: Network, S: Scheduler> {
    config: BFTSyncConfiguration,
    epoch: EpochNumber,
    me: VerifyingKey,
    validator_set: ValidatorSet,
    sender: SenderHandle<N>,
    scheduler: S,
    /// Ongoing syncs, keyed by the id of the vertex certified by their highest QC.
    syncing: HashMap<CryptoHash, SyncState>,
    /// Outstanding requests. A request is sent once, however many syncs need its vertices.
    requests: HashMap<GetVerticesRequest, RequestState>,
    /// The latest committed ledger state reported by the ledger.
    ledger_header: LedgerHeader,
    event_publisher: Option<Sender<Event>>,
    counters: Arc<SystemCounters>,
}

struct SyncState {
    high_qc: HighQC,
    /// Replicas known to have the certified vertices, in the order they were learned of.
    authors: Vec<VerifyingKey>,
    stage: SyncStage,
    /// Vertices fetched so far, from the certified vertex towards the root.
    fetched: Vec<Vertex>,
}

enum SyncStage {
    /// Waiting for the ledger to catch up with `target`.
    LedgerSync { target: LedgerHeader, attempt: u32 },
    /// Fetching the committed chain to rebuild the vertex store from.
    CommittedVertices,
    /// Fetching the certified vertex and its ancestors until they connect to the vertex store.
    QCVertices,
}

struct RequestState {
    request: GetVerticesRequest,
    /// The syncs waiting for the requested vertices, in the order they attached to the request.
    sync_targets: Vec<CryptoHash>,
    tried: Vec<VerifyingKey>,
    attempt: u32,
}

impl<N: Network, S: Scheduler> BFTSync<N, S> {
    pub(crate) fn new(
        config: BFTSyncConfiguration,
        epoch: EpochNumber,
        me: VerifyingKey,
        validator_set: ValidatorSet,
        sender: SenderHandle<N>,
        scheduler: S,
        ledger_header: LedgerHeader,
        event_publisher: Option<Sender<Event>>,
        counters: Arc<SystemCounters>,
    ) -> Self {
        Self {
            config,
            epoch,
            me,
            validator_set,
            sender,
            scheduler,
            syncing: HashMap::new(),
            requests: HashMap::new(),
            ledger_header,
            event_publisher,
            counters,
        }
    }

    /// Whether a sync for the vertex with `vertex_id` is ongoing.
    pub fn is_syncing(&self, vertex_id: &CryptoHash) -> bool {
        self.syncing.contains_key(vertex_id)
    }

    pub fn syncing_count(&self) -> usize {
        self.syncing.len()
    }

    /// Make sure that the vertices certified by `high_qc` are in `vertex_store`, fetching them from
    /// `author` (the replica that sent `high_qc`) and other validators if they are not.
    pub fn sync_to_qc<L: Ledger>(
        &mut self,
        high_qc: &HighQC,
        author: Option<VerifyingKey>,
        vertex_store: &mut VertexStore,
        ledger: &mut L,
    ) -> Result<SyncResult, VertexStoreError> {
        if high_qc.highest_qc.epoch() != self.epoch
            || high_qc.highest_committed_qc.epoch() != self.epoch
        {
            return Ok(SyncResult::Invalid);
        }

        let target = high_qc.highest_qc.proposed().vertex_id;

        // 1. Already synced: add the certificates.
        if vertex_store.contains(&target) {
            Self::add_certificates(high_qc, vertex_store, ledger)?;
            return Ok(SyncResult::Synced);
        }

        // 2. The certified vertex is at or below the root: it was committed, and its branch is settled.
        if high_qc.highest_qc.proposed().view <= vertex_store.root_header().view {
            if let Some(tc) = &high_qc.highest_tc {
                vertex_store.insert_timeout_certificate(tc);
            }
            return Ok(SyncResult::Synced);
        }

        // 3. Already syncing: remember `author` as another source of the vertices.
        if let Some(sync_state) = self.syncing.get_mut(&target) {
            if let Some(author) = author {
                if !sync_state.authors.contains(&author) {
                    sync_state.authors.push(author);
                }
            }
            return Ok(SyncResult::InProgress);
        }

        // 4. Start a new sync.
        let sync_state = SyncState {
            high_qc: high_qc.clone(),
            authors: author.into_iter().collect(),
            stage: SyncStage::QCVertices,
            fetched: Vec::new(),
        };
        let committed = high_qc.committed_header().copied();
        self.syncing.insert(target, sync_state);

        match committed {
            // 4.1. The ledger is behind the committed vertex: sync the ledger first.
            Some(committed)
                if !vertex_store.contains(&committed.vertex_id)
                    && self.local_state_version(vertex_store)
                        < committed.ledger_header.state_version =>
            {
                log::info!(
                    "Ledger is behind committed vertex {:?} at view {}, syncing ledger",
                    committed.vertex_id,
                    committed.view
                );
                self.request_ledger_sync(target, committed.ledger_header, 0, ledger);
                self.publish_start_sync(target, author);
            }

            // 4.2. Fetch the certified vertex.
            _ => {
                let request = GetVerticesRequest {
                    vertex_id: target,
                    count: 1,
                };
                if let Some(peer) = self.send_request(request, vec![target], Vec::new(), 0) {
                    self.publish_start_sync(target, Some(peer));
                } else {
                    self.escalate(target, ledger);
                    return Ok(SyncResult::Invalid);
                }
            }
        }

        Ok(SyncResult::InProgress)
    }

    /// Process the vertices that `origin` sent in response to one of this replica's requests.
    ///
    /// Returns the targets of the syncs that ended, successfully or not.
    pub fn process_get_vertices_response<L: Ledger>(
        &mut self,
        origin: &VerifyingKey,
        response: GetVerticesResponse,
        vertex_store: &mut VertexStore,
        ledger: &mut L,
    ) -> Result<Vec<CryptoHash>, VertexStoreError> {
        let request_state = match self
            .requested(&response)
            .and_then(|request| self.requests.remove(&request))
        {
            Some(request_state) => request_state,
            None => {
                log::debug!("Ignoring unrequested vertices from {:?}", origin);
                return Ok(Vec::new());
            }
        };

        if !self.is_valid_response(&request_state.request, &response) {
            log::warn!("Invalid GetVerticesResponse from {:?}", origin);
            self.counters.increment(CounterType::SyncInvalidResponses);
            // Wait for the request to time out and be retried.
            self.requests.insert(request_state.request, request_state);
            return Ok(Vec::new());
        }

        let mut ended = Vec::new();
        for target in request_state.sync_targets {
            let stage_is_committed = match self.syncing.get(&target) {
                Some(sync_state) => matches!(sync_state.stage, SyncStage::CommittedVertices),
                None => continue,
            };

            let vertices = response.vertices.clone();
            let sync_ended = if stage_is_committed {
                self.process_committed_vertices(target, *origin, vertices, vertex_store, ledger)?
            } else {
                self.process_qc_vertices(target, *origin, vertices, vertex_store, ledger)?
            };
            ended.extend(sync_ended);
        }

        Ok(ended)
    }

    /// Process a [`GetVerticesErrorResponse`] from `origin`.
    ///
    /// The response's high QC is compared with this replica's epoch:
    /// - Lower epoch: the server is behind. The response is ignored.
    /// - Higher epoch: this replica is behind. The ledger is asked to sync to the server's committed state.
    /// - Same epoch: the request is retried against another peer, and the server's high QC is synced to.
    ///
    /// Returns the targets of the syncs that ended, successfully or not.
    pub fn process_get_vertices_error_response<L: Ledger>(
        &mut self,
        origin: &VerifyingKey,
        response: GetVerticesErrorResponse,
        vertex_store: &mut VertexStore,
        ledger: &mut L,
    ) -> Result<Vec<CryptoHash>, VertexStoreError> {
        let response_epoch = response.high_qc.highest_qc.epoch();
        if response_epoch < self.epoch {
            log::debug!(
                "Ignoring GetVerticesErrorResponse from {:?} for lower epoch {}",
                origin,
                response_epoch
            );
            return Ok(Vec::new());
        }

        self.counters.increment(CounterType::SyncErrorResponses);

        if response_epoch > self.epoch {
            let target = response
                .high_qc
                .committed_header()
                .map_or(response.high_qc.highest_qc.proposed().ledger_header, |header| {
                    header.ledger_header
                });
            log::info!(
                "Peer {:?} is in epoch {}, ahead of epoch {}: syncing ledger",
                origin,
                response_epoch,
                self.epoch
            );
            self.counters.increment(CounterType::SyncLedgerEscalations);
            ledger.request_sync(target, vec![*origin]);
            Event::EscalateLedgerSync(EscalateLedgerSyncEvent {
                timestamp: SystemTime::now(),
                target,
            })
            .publish(&self.event_publisher);
            return Ok(Vec::new());
        }

        let mut ended = Vec::new();
        if let Some(request_state) = self.requests.remove(&response.request) {
            ended.extend(self.retry(request_state, ledger));
        }

        match self.sync_to_qc(&response.high_qc, Some(*origin), vertex_store, ledger)? {
            SyncResult::Synced => ended.push(response.high_qc.highest_qc.proposed().vertex_id),
            SyncResult::InProgress | SyncResult::Invalid => (),
        }

        Ok(ended)
    }

    /// Handle the timeout of a request. If the request is still outstanding at the same attempt, it is
    /// retried against another peer, or handed over to the ledger after the last attempt.
    ///
    /// Returns the targets of the syncs that were abandoned.
    pub fn process_vertex_request_timeout<L: Ledger>(
        &mut self,
        timeout: VertexRequestTimeout,
        ledger: &mut L,
    ) -> Vec<CryptoHash> {
        let is_current = self
            .requests
            .get(&timeout.request)
            .map_or(false, |request_state| request_state.attempt == timeout.attempt);
        if !is_current {
            return Vec::new();
        }

        self.counters.increment(CounterType::SyncRequestTimeouts);
        Event::SyncRequestTimeout(SyncRequestTimeoutEvent {
            timestamp: SystemTime::now(),
            request: timeout.request,
            attempt: timeout.attempt,
        })
        .publish(&self.event_publisher);

        match self.requests.remove(&timeout.request) {
            Some(request_state) => self.retry(request_state, ledger),
            None => Vec::new(),
        }
    }

    /// Handle the timeout of a sync that waits for the ledger. If the ledger has still not caught up, it
    /// is asked again, and the sync is abandoned after the last attempt.
    ///
    /// Returns the targets of the syncs that were abandoned.
    pub fn process_ledger_sync_timeout<L: Ledger>(
        &mut self,
        timeout: LedgerSyncTimeout,
        ledger: &mut L,
    ) -> Vec<CryptoHash> {
        let is_current = self
            .syncing
            .get(&timeout.sync_target)
            .map_or(false, |sync_state| match sync_state.stage {
                SyncStage::LedgerSync { target, attempt } => {
                    target == timeout.ledger_target && attempt == timeout.attempt
                }
                _ => false,
            });
        if !is_current {
            return Vec::new();
        }

        self.counters.increment(CounterType::SyncLedgerTimeouts);
        let next_attempt = timeout.attempt + 1;
        if next_attempt >= self.config.max_attempts {
            log::warn!(
                "Abandoning sync of {:?}: the ledger did not reach state version {}",
                timeout.sync_target,
                timeout.ledger_target.state_version
            );
            self.remove_sync(&timeout.sync_target);
            return vec![timeout.sync_target];
        }

        self.request_ledger_sync(timeout.sync_target, timeout.ledger_target, next_attempt, ledger);
        Vec::new()
    }

    /// Notify BFT Sync that the ledger has committed up to `ledger_header`.
    ///
    /// Syncs of vertices that the ledger has already gone past are dropped. Syncs that were waiting for the
    /// ledger move on to fetching the committed chain.
    ///
    /// Returns the targets of the syncs that ended.
    pub fn process_ledger_update(&mut self, ledger_header: LedgerHeader) -> Vec<CryptoHash> {
        if ledger_header.state_version > self.ledger_header.state_version {
            self.ledger_header = ledger_header;
        }
        let ledger_header = self.ledger_header;

        // A vertex with an empty payload shares its parent's state version, so only vertices strictly
        // below the ledger's state are known to be settled.
        let mut ended: Vec<CryptoHash> = self
            .syncing
            .iter()
            .filter_map(|(target, sync_state)| match sync_state.stage {
                SyncStage::QCVertices
                    if sync_state
                        .high_qc
                        .highest_qc
                        .proposed()
                        .ledger_header
                        .state_version
                        < ledger_header.state_version =>
                {
                    Some(*target)
                }
                _ => None,
            })
            .collect();
        for target in &ended {
            log::debug!("Dropping sync of {:?}: the ledger has gone past it", target);
            self.remove_sync(target);
        }

        let caught_up: Vec<CryptoHash> = self
            .syncing
            .iter()
            .filter_map(|(target, sync_state)| match sync_state.stage {
                SyncStage::LedgerSync {
                    target: ledger_target,
                    ..
                } if ledger_target.state_version <= ledger_header.state_version =>
                {
                    Some(*target)
                }
                _ => None,
            })
            .collect();

        for target in caught_up {
            let request = match self.syncing.get_mut(&target) {
                Some(sync_state) => {
                    sync_state.stage = SyncStage::CommittedVertices;
                    GetVerticesRequest {
                        vertex_id: sync_state.high_qc.highest_committed_qc.proposed().vertex_id,
                        count: COMMITTED_CHAIN_LENGTH,
                    }
                }
                None => continue,
            };
            if self.send_request(request, vec![target], Vec::new(), 0).is_none() {
                self.syncing.remove(&target);
                ended.push(target);
            }
        }

        ended
    }

    /// Serve a peer's request from `vertex_store`.
    pub fn process_get_vertices_request(
        &mut self,
        origin: VerifyingKey,
        request: GetVerticesRequest,
        vertex_store: &VertexStore,
    ) {
        let vertices = vertex_store.get_vertices(&request.vertex_id, request.count);
        Event::ReceiveSyncRequest(ReceiveSyncRequestEvent {
            timestamp: SystemTime::now(),
            origin,
            request,
            found: vertices.is_some(),
        })
        .publish(&self.event_publisher);

        match vertices {
            Some(vertices) => {
                self.counters.increment(CounterType::SyncRequestsServed);
                self.sender.send(origin, GetVerticesResponse { vertices });
            }
            None => self.sender.send(
                origin,
                GetVerticesErrorResponse {
                    high_qc: vertex_store.high_qc(),
                    request,
                },
            ),
        }
    }

    fn process_qc_vertices<L: Ledger>(
        &mut self,
        target: CryptoHash,
        origin: VerifyingKey,
        vertices: Vec<Vertex>,
        vertex_store: &mut VertexStore,
        ledger: &mut L,
    ) -> Result<Option<CryptoHash>, VertexStoreError> {
        let sync_state = match self.syncing.get_mut(&target) {
            Some(sync_state) => sync_state,
            None => return Ok(None),
        };
        sync_state.fetched.extend(vertices);

        let oldest = match sync_state.fetched.last() {
            Some(oldest) => oldest.clone(),
            None => return Ok(None),
        };

        // 1. The fetched chain does not connect to the vertex store yet: fetch the parent of the oldest vertex.
        if !vertex_store.contains(&oldest.parent_id()) {
            if oldest.parent_header().view <= vertex_store.root_header().view {
                log::warn!(
                    "Abandoning sync of {:?}: it extends a pruned vertex",
                    target
                );
                self.syncing.remove(&target);
                return Ok(Some(target));
            }

            let request = GetVerticesRequest {
                vertex_id: oldest.parent_id(),
                count: 1,
            };
            if self.send_request(request, vec![target], vec![origin], 0).is_none() {
                self.escalate(target, ledger);
                return Ok(Some(target));
            }
            return Ok(None);
        }

        // 2. The chain connects: insert it, oldest first.
        let sync_state = match self.syncing.remove(&target) {
            Some(sync_state) => sync_state,
            None => return Ok(None),
        };
        for vertex in sync_state.fetched.iter().rev() {
            match vertex_store.insert_vertex(vertex, ledger) {
                Ok(Some(_)) => (),
                Ok(None) => {
                    log::warn!("Abandoning sync of {:?}: ledger rejected a vertex", target);
                    return Ok(Some(target));
                }
                Err(err) if err.is_invalid_input() => {
                    log::warn!("Abandoning sync of {:?}: {:?}", target, err);
                    self.counters.increment(CounterType::SyncInvalidResponses);
                    return Ok(Some(target));
                }
                Err(err) => return Err(err),
            }
        }

        Self::add_certificates(&sync_state.high_qc, vertex_store, ledger)?;
        self.publish_end_sync(target, sync_state.fetched.len());

        Ok(Some(target))
    }

    /// Rebuild the vertex store from the committed chain `vertices`, then continue syncing to the highest
    /// QC if the rebuilt store does not contain it.
    fn process_committed_vertices<L: Ledger>(
        &mut self,
        target: CryptoHash,
        origin: VerifyingKey,
        vertices: Vec<Vertex>,
        vertex_store: &mut VertexStore,
        ledger: &mut L,
    ) -> Result<Option<CryptoHash>, VertexStoreError> {
        let sync_state = match self.syncing.get_mut(&target) {
            Some(sync_state) => sync_state,
            None => return Ok(None),
        };

        let committed_qc = sync_state.high_qc.highest_committed_qc.clone();
        // Another sync waiting for the same committed chain may have rebuilt the store already.
        let already_rebuilt = committed_qc
            .committed()
            .map_or(false, |committed| vertex_store.root().id == committed.vertex_id)
            && vertex_store.contains(&committed_qc.proposed().vertex_id);
        let rebuilt = match Self::committed_state(&committed_qc, &sync_state.high_qc, vertices) {
            Some(_) if already_rebuilt => Ok(()),
            Some(state) => vertex_store.rebuild(state, ledger),
            None => Err(VertexStoreError::InvalidResumeState),
        };
        if let Err(err) = rebuilt {
            log::warn!(
                "Abandoning sync of {:?}: cannot rebuild from committed vertices: {:?}",
                target,
                err
            );
            self.counters.increment(CounterType::SyncInvalidResponses);
            self.syncing.remove(&target);
            return Ok(Some(target));
        }

        if vertex_store.contains(&target) {
            if let Some(sync_state) = self.syncing.remove(&target) {
                Self::add_certificates(&sync_state.high_qc, vertex_store, ledger)?;
                self.publish_end_sync(target, COMMITTED_CHAIN_LENGTH as usize);
            }
            return Ok(Some(target));
        }

        sync_state.stage = SyncStage::QCVertices;
        let request = GetVerticesRequest {
            vertex_id: target,
            count: 1,
        };
        if self.send_request(request, vec![target], vec![origin], 0).is_none() {
            self.escalate(target, ledger);
            return Ok(Some(target));
        }

        Ok(None)
    }

    /// The state to rebuild the vertex store from: `vertices` are the vertex certified by `committed_qc`,
    /// its parent, and the committed grandparent.
    fn committed_state(
        committed_qc: &QuorumCertificate,
        high_qc: &HighQC,
        mut vertices: Vec<Vertex>,
    ) -> Option<VertexStoreState> {
        let committed = committed_qc.committed()?;
        if vertices.len() != COMMITTED_CHAIN_LENGTH as usize
            || vertices[0].id != committed_qc.proposed().vertex_id
            || vertices[2].id != committed.vertex_id
        {
            return None;
        }

        let root = vertices.pop()?;
        vertices.reverse();
        VertexStoreState::new(
            root,
            HighQC::new(
                committed_qc.clone(),
                committed_qc.clone(),
                high_qc.highest_tc.clone(),
            ),
            vertices,
        )
        .ok()
    }

    /// Retry a request that failed, or escalate its syncs to the ledger if there are no attempts or peers
    /// left. Returns the targets of the syncs that were abandoned.
    fn retry<L: Ledger>(&mut self, mut request_state: RequestState, ledger: &mut L) -> Vec<CryptoHash> {
        request_state
            .sync_targets
            .retain(|target| self.syncing.contains_key(target));
        if request_state.sync_targets.is_empty() {
            return Vec::new();
        }

        let next_attempt = request_state.attempt + 1;
        if next_attempt < self.config.max_attempts
            && self
                .send_request(
                    request_state.request,
                    request_state.sync_targets.clone(),
                    request_state.tried,
                    next_attempt,
                )
                .is_some()
        {
            return Vec::new();
        }

        for target in &request_state.sync_targets {
            self.escalate(*target, ledger);
        }
        request_state.sync_targets
    }

    /// Send `request` on behalf of the syncs of `sync_targets` to the first peer not in `tried`, and schedule
    /// its timeout. If the same request is already outstanding, the syncs wait for it instead. Returns the
    /// peer the request went to, or `None` if every peer has been tried.
    ///
    /// Peers are picked in this order: the authors of the syncs' high QCs, then random validators.
    fn send_request(
        &mut self,
        request: GetVerticesRequest,
        sync_targets: Vec<CryptoHash>,
        mut tried: Vec<VerifyingKey>,
        attempt: u32,
    ) -> Option<VerifyingKey> {
        if let Some(request_state) = self.requests.get_mut(&request) {
            for target in sync_targets {
                if !request_state.sync_targets.contains(&target) {
                    request_state.sync_targets.push(target);
                }
            }
            return request_state.tried.last().copied();
        }

        let mut authors: Vec<VerifyingKey> = Vec::new();
        for sync_state in sync_targets.iter().filter_map(|target| self.syncing.get(target)) {
            for author in &sync_state.authors {
                if !authors.contains(author) {
                    authors.push(*author);
                }
            }
        }

        let peer = authors
            .into_iter()
            .find(|author| !tried.contains(author) && *author != self.me)
            .or_else(|| {
                let mut exclude = tried.clone();
                exclude.push(self.me);
                self.validator_set.random_excluding(&exclude)
            })?;

        tried.push(peer);
        self.requests.insert(
            request,
            RequestState {
                request,
                sync_targets,
                tried,
                attempt,
            },
        );

        self.counters.increment(CounterType::SyncRequestsSent);
        self.sender.send(peer, request);
        Event::SendSyncRequest(SendSyncRequestEvent {
            timestamp: SystemTime::now(),
            peer,
            request,
            attempt,
        })
        .publish(&self.event_publisher);

        self.scheduler.schedule_vertex_request_timeout(
            Epoched::new(self.epoch, VertexRequestTimeout { request, attempt }),
            backoff(self.config.request_timeout, attempt),
        );

        Some(peer)
    }

    /// Ask the ledger to sync to `ledger_target` for the sync of `sync_target`, and schedule the timeout of
    /// the `attempt`-th try.
    fn request_ledger_sync<L: Ledger>(
        &mut self,
        sync_target: CryptoHash,
        ledger_target: LedgerHeader,
        attempt: u32,
        ledger: &mut L,
    ) {
        let sync_state = match self.syncing.get_mut(&sync_target) {
            Some(sync_state) => sync_state,
            None => return,
        };
        sync_state.stage = SyncStage::LedgerSync {
            target: ledger_target,
            attempt,
        };
        ledger.request_sync(ledger_target, sync_state.authors.clone());

        self.scheduler.schedule_ledger_sync_timeout(
            Epoched::new(
                self.epoch,
                LedgerSyncTimeout {
                    sync_target,
                    ledger_target,
                    attempt,
                },
            ),
            backoff(self.config.ledger_sync_timeout, attempt),
        );
    }

    /// Abandon the sync of `target` and ask the ledger to sync to the state committed by its high QC.
    fn escalate<L: Ledger>(&mut self, target: CryptoHash, ledger: &mut L) {
        let sync_state = match self.remove_sync(&target) {
            Some(sync_state) => sync_state,
            None => return,
        };

        let ledger_target = sync_state
            .high_qc
            .committed_header()
            .map_or(sync_state.high_qc.highest_qc.proposed().ledger_header, |header| {
                header.ledger_header
            });
        log::warn!(
            "Sync of {:?} failed, escalating to ledger sync at state version {}",
            target,
            ledger_target.state_version
        );

        self.counters.increment(CounterType::SyncLedgerEscalations);
        ledger.request_sync(ledger_target, sync_state.authors);
        Event::EscalateLedgerSync(EscalateLedgerSyncEvent {
            timestamp: SystemTime::now(),
            target: ledger_target,
        })
        .publish(&self.event_publisher);
    }

    /// Remove the sync of `target`, detaching it from the requests it waits for. Requests that no sync
    /// waits for any more are forgotten.
    fn remove_sync(&mut self, target: &CryptoHash) -> Option<SyncState> {
        let sync_state = self.syncing.remove(target)?;
        self.requests.retain(|_, request_state| {
            request_state.sync_targets.retain(|sync_target| sync_target != target);
            !request_state.sync_targets.is_empty()
        });
        Some(sync_state)
    }

    fn add_certificates<L: Ledger>(
        high_qc: &HighQC,
        vertex_store: &mut VertexStore,
        ledger: &mut L,
    ) -> Result<(), VertexStoreError> {
        vertex_store.add_qc(&high_qc.highest_committed_qc, ledger)?;
        vertex_store.add_qc(&high_qc.highest_qc, ledger)?;
        if let Some(tc) = &high_qc.highest_tc {
            vertex_store.insert_timeout_certificate(tc);
        }
        Ok(())
    }

    /// The outstanding request that `response` answers: the request for its vertices if there is one, or
    /// else any request starting with its first vertex, against which the response will be found invalid.
    fn requested(&self, response: &GetVerticesResponse) -> Option<GetVerticesRequest> {
        let first = response.vertices.first()?;
        let exact = GetVerticesRequest {
            vertex_id: first.id,
            count: response.vertices.len() as u32,
        };
        if self.requests.contains_key(&exact) {
            return Some(exact);
        }
        self.requests
            .keys()
            .find(|request| request.vertex_id == first.id)
            .copied()
    }

    fn is_valid_response(&self, request: &GetVerticesRequest, response: &GetVerticesResponse) -> bool {
        let vertices = &response.vertices;
        vertices.len() == request.count as usize
            && vertices.first().map(|vertex| vertex.id) == Some(request.vertex_id)
            && vertices.iter().all(|vertex| {
                vertex.epoch == self.epoch && (vertex.is_genesis() || vertex.is_well_formed())
            })
            && vertices
                .windows(2)
                .all(|pair| pair[0].parent_id() == pair[1].id)
    }

    fn local_state_version(&self, vertex_store: &VertexStore) -> u64 {
        self.ledger_header
            .state_version
            .max(vertex_store.root_header().ledger_header.state_version)
    }

    fn publish_start_sync(&self, target: CryptoHash, peer: Option<VerifyingKey>) {
        if let Some(peer) = peer {
            Event::StartSync(StartSyncEvent {
                timestamp: SystemTime::now(),
                target,
                peer,
            })
            .publish(&self.event_publisher);
        }
    }

    fn publish_end_sync(&self, target: CryptoHash, vertices_fetched: usize) {
        Event::EndSync(EndSyncEvent {
            timestamp: SystemTime::now(),
            target,
            vertices_fetched,
        })
        .publish(&self.event_publisher);
    }
}

/// `base * 2^attempt`.
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}
