/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implementation of the [`VertexStore`].

use std::{
    collections::{HashMap, HashSet},
    sync::{mpsc::Sender, Arc},
    time::SystemTime,
};

use crate::{
    counters::{CounterType, SystemCounters},
    events::{
        CommitVertexEvent, Event, InsertVertexEvent, PruneVertexEvent, RebuildVertexStoreEvent,
        UpdateHighestQCEvent, UpdateHighestTCEvent,
    },
    ledger::{CommittedUpdate, Ledger},
    types::{
        basic::{CryptoHash, ViewNumber},
        certificates::{HighQC, QuorumCertificate, TimeoutCertificate},
        vertex::{BFTHeader, Vertex},
    },
};

use super::state::{PreparedVertex, VertexStoreState};

/// The speculative, uncommitted suffix of the chain: a tree of vertices rooted at the last committed vertex.
///
/// ## Invariants
///
/// 1. Every vertex in the store other than the root has its parent in the store.
/// 2. Every vertex in the store is a descendant of the root.
/// 3. `highest_qc` certifies a vertex in the store, and `highest_committed_qc` commits the root.
pub struct VertexStore {
    root: PreparedVertex,
    vertices: HashMap<CryptoHash, PreparedVertex>,
    children: HashMap<CryptoHash, HashSet<CryptoHash>>,
    highest_qc: QuorumCertificate,
    highest_committed_qc: QuorumCertificate,
    highest_tc: Option<TimeoutCertificate>,
    event_publisher: Option<Sender<Event>>,
    counters: Arc<SystemCounters>,
}

impl VertexStore {
    /// Build a vertex store from `state`, preparing each of its uncommitted vertices with `ledger`.
    pub fn new<L: Ledger>(
        state: VertexStoreState,
        ledger: &mut L,
        event_publisher: Option<Sender<Event>>,
        counters: Arc<SystemCounters>,
    ) -> Result<Self, VertexStoreError> {
        let mut vertex_store = Self {
            root: PreparedVertex {
                vertex: state.root().clone(),
                ledger_header: state.root_header().ledger_header,
            },
            vertices: HashMap::new(),
            children: HashMap::new(),
            highest_qc: state.high_qc().highest_qc.clone(),
            highest_committed_qc: state.high_qc().highest_committed_qc.clone(),
            highest_tc: state.high_qc().highest_tc.clone(),
            event_publisher,
            counters,
        };

        for vertex in state.vertices() {
            if !vertex_store.contains(&vertex.parent_id()) {
                return Err(VertexStoreError::InvalidResumeState);
            }
            let previous = vertex_store.path_from_root(&vertex.parent_id());
            let ledger_header = ledger
                .prepare(&previous, vertex)
                .ok_or(VertexStoreError::InvalidResumeState)?;
            vertex_store.insert_prepared(PreparedVertex {
                vertex: vertex.clone(),
                ledger_header,
            });
        }

        if !vertex_store.contains(&vertex_store.highest_qc.proposed().vertex_id) {
            return Err(VertexStoreError::InvalidResumeState);
        }

        Ok(vertex_store)
    }

    /// Replace the entire contents of the store with `state`. Used when sync finds that the replica's
    /// committed prefix is behind its peers'.
    pub fn rebuild<L: Ledger>(
        &mut self,
        state: VertexStoreState,
        ledger: &mut L,
    ) -> Result<(), VertexStoreError> {
        let rebuilt = VertexStore::new(
            state,
            ledger,
            self.event_publisher.clone(),
            self.counters.clone(),
        )?;
        *self = rebuilt;

        Event::RebuildVertexStore(RebuildVertexStoreEvent {
            timestamp: SystemTime::now(),
            root: self.root.vertex.id,
            root_view: self.root.vertex.view,
        })
        .publish(&self.event_publisher);

        Ok(())
    }

    pub fn root(&self) -> &Vertex {
        &self.root.vertex
    }

    pub fn root_header(&self) -> BFTHeader {
        self.root.header()
    }

    pub fn contains(&self, vertex_id: &CryptoHash) -> bool {
        self.root.vertex.id == *vertex_id || self.vertices.contains_key(vertex_id)
    }

    /// Get a vertex in the store, including the root.
    pub fn get(&self, vertex_id: &CryptoHash) -> Option<&PreparedVertex> {
        if self.root.vertex.id == *vertex_id {
            Some(&self.root)
        } else {
            self.vertices.get(vertex_id)
        }
    }

    /// The number of uncommitted vertices in the store.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn highest_qc(&self) -> &QuorumCertificate {
        &self.highest_qc
    }

    pub fn highest_committed_qc(&self) -> &QuorumCertificate {
        &self.highest_committed_qc
    }

    pub fn highest_tc(&self) -> Option<&TimeoutCertificate> {
        self.highest_tc.as_ref()
    }

    pub fn high_qc(&self) -> HighQC {
        HighQC::new(
            self.highest_qc.clone(),
            self.highest_committed_qc.clone(),
            self.highest_tc.clone(),
        )
    }

    /// A snapshot of the store from which an identical store can be built.
    pub fn state(&self) -> VertexStoreState {
        let mut vertices: Vec<&PreparedVertex> = self.vertices.values().collect();
        // Views strictly increase from parent to child, so this orders every parent before its children.
        vertices.sort_by_key(|prepared| prepared.vertex.view);

        // Safety: the highest committed QC always commits the root.
        VertexStoreState::new(
            self.root.vertex.clone(),
            self.high_qc(),
            vertices.into_iter().map(|p| p.vertex.clone()).collect(),
        )
        .unwrap_or_else(|_| VertexStoreState::create_for_genesis(self.root.ledger_header))
    }

    /// Record `qc`, committing the vertex it commits (if any).
    ///
    /// Returns `false` if the vertex that `qc` certifies is not in the store, in which case nothing changes.
    pub fn add_qc<L: Ledger>(
        &mut self,
        qc: &QuorumCertificate,
        ledger: &mut L,
    ) -> Result<bool, VertexStoreError> {
        if !self.contains(&qc.proposed().vertex_id) {
            return Ok(false);
        }

        if qc.view() > self.highest_qc.view() {
            self.highest_qc = qc.clone();
            Event::UpdateHighestQC(UpdateHighestQCEvent {
                timestamp: SystemTime::now(),
                highest_qc: qc.clone(),
            })
            .publish(&self.event_publisher);
        }

        if let Some(committed) = qc.committed() {
            self.commit(*committed, qc, ledger)?;
        }

        Ok(true)
    }

    pub fn insert_timeout_certificate(&mut self, tc: &TimeoutCertificate) {
        let is_higher = self
            .highest_tc
            .as_ref()
            .map_or(true, |highest_tc| tc.view > highest_tc.view);
        if is_higher {
            self.highest_tc = Some(tc.clone());
            Event::UpdateHighestTC(UpdateHighestTCEvent {
                timestamp: SystemTime::now(),
                highest_tc: tc.clone(),
            })
            .publish(&self.event_publisher);
        }
    }

    /// Insert `vertex` into the tree, returning its header.
    ///
    /// ## Outcomes
    ///
    /// - `Ok(Some(header))`: the vertex is in the store, either because it was just inserted or because it
    ///   already was.
    /// - `Ok(None)`: the ledger rejected the vertex's commands.
    /// - `Err(MissingParent)`: the vertex's parent is unknown but may still be fetched.
    /// - `Err(PrunedAncestor)` or `Err(Malformed)`: the vertex can never be inserted.
    pub fn insert_vertex<L: Ledger>(
        &mut self,
        vertex: &Vertex,
        ledger: &mut L,
    ) -> Result<Option<BFTHeader>, VertexStoreError> {
        // 1. Inserting a known vertex is a no-op.
        if let Some(prepared) = self.get(&vertex.id) {
            return Ok(Some(prepared.header()));
        }

        // 2. Reject vertices with inconsistent views or ids.
        if vertex.is_genesis() || !vertex.is_well_formed() {
            self.counters.increment(CounterType::InvalidVertices);
            return Err(VertexStoreError::Malformed { vertex: vertex.id });
        }

        // 3. Reject vertices that can only extend a branch that has been pruned.
        let root_view = self.root.vertex.view;
        if vertex.view <= root_view
            || (!self.contains(&vertex.parent_id()) && vertex.parent_header().view <= root_view)
        {
            self.counters.increment(CounterType::InvalidVertices);
            return Err(VertexStoreError::PrunedAncestor {
                vertex: vertex.id,
                parent_view: vertex.parent_header().view,
                root_view,
            });
        }

        // 4. The parent must be known.
        if !self.contains(&vertex.parent_id()) {
            return Err(VertexStoreError::MissingParent {
                vertex: vertex.id,
                parent: vertex.parent_id(),
            });
        }

        // 5. Record the vertex's QC, which may commit some of its ancestors.
        self.add_qc(&vertex.qc, ledger)?;

        // 6. Execute the vertex on top of its uncommitted ancestors.
        let previous = self.path_from_root(&vertex.parent_id());
        let ledger_header = match ledger.prepare(&previous, vertex) {
            Some(ledger_header) if ledger_header.epoch == vertex.epoch => ledger_header,
            _ => {
                log::warn!(
                    "Ledger rejected vertex {:?} at view {}",
                    vertex.id,
                    vertex.view
                );
                return Ok(None);
            }
        };

        let prepared = PreparedVertex {
            vertex: vertex.clone(),
            ledger_header,
        };
        let header = prepared.header();
        self.insert_prepared(prepared);

        self.counters.increment(CounterType::VerticesInserted);
        Event::InsertVertex(InsertVertexEvent {
            timestamp: SystemTime::now(),
            vertex: vertex.clone(),
        })
        .publish(&self.event_publisher);

        Ok(Some(header))
    }

    /// Get `count` vertices, starting with `vertex_id` and walking towards the root (the root included).
    ///
    /// Returns `None` unless all `count` vertices are in the store.
    pub fn get_vertices(&self, vertex_id: &CryptoHash, count: u32) -> Option<Vec<Vertex>> {
        let mut vertices = Vec::with_capacity(count as usize);
        let mut next_id = *vertex_id;
        for _ in 0..count {
            let vertex = &self.get(&next_id)?.vertex;
            next_id = vertex.parent_id();
            vertices.push(vertex.clone());
        }
        Some(vertices)
    }

    /// The uncommitted vertices from the root (exclusive) to `vertex_id` (inclusive), oldest first.
    pub fn path_from_root(&self, vertex_id: &CryptoHash) -> Vec<Vertex> {
        self.prepared_path_from_root(vertex_id)
            .into_iter()
            .map(|prepared| prepared.vertex)
            .collect()
    }

    fn prepared_path_from_root(&self, vertex_id: &CryptoHash) -> Vec<PreparedVertex> {
        let mut path = Vec::new();
        let mut next = self.vertices.get(vertex_id);
        while let Some(prepared) = next {
            path.push(prepared.clone());
            next = self.vertices.get(&prepared.vertex.parent_id());
        }
        path.reverse();
        path
    }

    fn insert_prepared(&mut self, prepared: PreparedVertex) {
        self.children
            .entry(prepared.vertex.parent_id())
            .or_default()
            .insert(prepared.vertex.id);
        self.vertices.insert(prepared.vertex.id, prepared);
    }

    /// Make the vertex with `header` the new root, hand it and its uncommitted ancestors to the ledger, and
    /// prune every vertex that does not descend from it.
    fn commit<L: Ledger>(
        &mut self,
        header: BFTHeader,
        commit_qc: &QuorumCertificate,
        ledger: &mut L,
    ) -> Result<(), VertexStoreError> {
        if header.view <= self.root.vertex.view {
            return Ok(());
        }

        let path = self.prepared_path_from_root(&header.vertex_id);
        let tip = path
            .last()
            .cloned()
            .ok_or(VertexStoreError::CommittedVertexMissing {
                vertex: header.vertex_id,
            })?;

        let old_root = self.root.vertex.id;
        self.root = tip;
        self.highest_committed_qc = commit_qc.clone();

        // Walk down from the new root to the old root, removing committed vertices from the tree and pruning
        // every branch that does not lead to the new root.
        let mut keep = None;
        for prepared in path.iter().rev() {
            self.remove_and_prune_siblings(prepared.vertex.id, keep);
            keep = Some(prepared.vertex.id);
        }
        self.remove_and_prune_siblings(old_root, keep);

        for prepared in &path {
            self.counters.increment(CounterType::VerticesCommitted);
            Event::CommitVertex(CommitVertexEvent {
                timestamp: SystemTime::now(),
                vertex: prepared.vertex.id,
                view: prepared.vertex.view,
            })
            .publish(&self.event_publisher);
        }

        ledger.commit(CommittedUpdate {
            committed: path,
            proof: commit_qc.clone(),
        });

        Ok(())
    }

    /// Remove `vertex_id` from the tree. Unless it is the root, also prune all of its children except
    /// `keep`, with their descendants.
    fn remove_and_prune_siblings(&mut self, vertex_id: CryptoHash, keep: Option<CryptoHash>) {
        self.vertices.remove(&vertex_id);
        if self.root.vertex.id == vertex_id {
            return;
        }

        let children = self.children.remove(&vertex_id).unwrap_or_default();
        let mut to_prune: Vec<CryptoHash> = children
            .into_iter()
            .filter(|child| Some(*child) != keep)
            .collect();
        while let Some(pruned) = to_prune.pop() {
            self.vertices.remove(&pruned);
            if let Some(grandchildren) = self.children.remove(&pruned) {
                to_prune.extend(grandchildren);
            }

            self.counters.increment(CounterType::VerticesPruned);
            Event::PruneVertex(PruneVertexEvent {
                timestamp: SystemTime::now(),
                vertex: pruned,
            })
            .publish(&self.event_publisher);
        }
    }
}

#[derive(Debug)]
pub enum VertexStoreError {
    /// The vertex's parent is not in the store, but is above the root and may still be fetched.
    MissingParent {
        vertex: CryptoHash,
        parent: CryptoHash,
    },
    /// The vertex is at or below the root, or extends a vertex at or below the root that is not the root.
    PrunedAncestor {
        vertex: CryptoHash,
        parent_view: ViewNumber,
        root_view: ViewNumber,
    },
    /// The vertex's id does not match its contents, or its views are not strictly increasing.
    Malformed { vertex: CryptoHash },
    /// A QC commits a vertex that is not in the store.
    CommittedVertexMissing { vertex: CryptoHash },
    /// A state to build a store from violates the invariants of [`VertexStoreState`].
    InvalidResumeState,
}

impl VertexStoreError {
    /// Whether the error was caused by the vertex being inserted rather than by the store itself.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            VertexStoreError::MissingParent { .. }
                | VertexStoreError::PrunedAncestor { .. }
                | VertexStoreError::Malformed { .. }
        )
    }
}
