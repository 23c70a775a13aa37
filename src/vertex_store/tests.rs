/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{collections::HashSet, sync::Arc};

use ed25519_dalek::VerifyingKey;

use crate::{
    counters::{CounterType, SystemCounters},
    ledger::{CommittedUpdate, Ledger},
    types::{
        basic::{CryptoHash, Data, EpochNumber, ViewNumber},
        certificates::{QuorumCertificate, SignatureSet, VoteData},
        vertex::{LedgerHeader, Vertex},
    },
};

use super::{PreparedVertex, VertexStore, VertexStoreError, VertexStoreState};

#[derive(Default)]
struct TestLedger {
    committed: Vec<CryptoHash>,
    rejected: HashSet<CryptoHash>,
}

impl Ledger for TestLedger {
    fn prepare(&mut self, _previous: &[Vertex], vertex: &Vertex) -> Option<LedgerHeader> {
        if self.rejected.contains(&vertex.id) {
            return None;
        }
        Some(LedgerHeader {
            epoch: vertex.epoch,
            state_version: vertex.view.int(),
            accumulator: vertex.id,
            timestamp: 0,
            is_end_of_epoch: false,
        })
    }

    fn next_commands(&mut self, _view: ViewNumber, _prepared: &[Vertex]) -> Data {
        Data::empty()
    }

    fn commit(&mut self, update: CommittedUpdate) {
        self.committed
            .extend(update.committed.iter().map(|prepared| prepared.vertex.id));
    }

    fn request_sync(&mut self, _target: LedgerHeader, _peers: Vec<VerifyingKey>) {}
}

const EPOCH: EpochNumber = EpochNumber::new(1);

fn genesis_store(ledger: &mut TestLedger) -> (VertexStore, Arc<SystemCounters>) {
    let counters = Arc::new(SystemCounters::new());
    let state = VertexStoreState::create_for_genesis(LedgerHeader::genesis(
        EPOCH,
        0,
        CryptoHash::zero(),
        0,
    ));
    let vertex_store = VertexStore::new(state, ledger, None, counters.clone()).unwrap();
    (vertex_store, counters)
}

/// The QC that a quorum would form by voting for `certified`.
fn qc_for(certified: &PreparedVertex) -> QuorumCertificate {
    let vertex = &certified.vertex;
    if vertex.is_genesis() {
        return QuorumCertificate::of_genesis(vertex.id, certified.ledger_header);
    }
    let committed = if vertex.touches_genesis()
        || !vertex.has_direct_parent()
        || !vertex.parent_has_direct_parent()
    {
        None
    } else {
        Some(*vertex.grandparent_header())
    };
    QuorumCertificate::new(
        VoteData::new(certified.header(), *vertex.parent_header(), committed),
        SignatureSet::new(0),
    )
}

fn child_of(vertex_store: &VertexStore, parent: &CryptoHash, view: u64) -> Vertex {
    let parent = vertex_store.get(parent).unwrap();
    Vertex::new(
        EPOCH,
        ViewNumber::new(view),
        qc_for(parent),
        Data::empty(),
        None,
    )
}

fn insert_child(
    vertex_store: &mut VertexStore,
    ledger: &mut TestLedger,
    parent: &CryptoHash,
    view: u64,
) -> Vertex {
    let vertex = child_of(vertex_store, parent, view);
    vertex_store
        .insert_vertex(&vertex, ledger)
        .unwrap()
        .unwrap();
    vertex
}

#[test]
fn three_chain_commits_grandparent() {
    let mut ledger = TestLedger::default();
    let (mut vertex_store, counters) = genesis_store(&mut ledger);
    let genesis = vertex_store.root().id;

    let v1 = insert_child(&mut vertex_store, &mut ledger, &genesis, 1);
    let v2 = insert_child(&mut vertex_store, &mut ledger, &v1.id, 2);
    let v3 = insert_child(&mut vertex_store, &mut ledger, &v2.id, 3);
    assert!(ledger.committed.is_empty());

    // The QC for v3 embedded in v4 commits v1.
    let v4 = insert_child(&mut vertex_store, &mut ledger, &v3.id, 4);

    assert_eq!(ledger.committed, vec![v1.id]);
    assert_eq!(vertex_store.root().id, v1.id);
    assert_eq!(vertex_store.highest_qc().view(), ViewNumber::new(3));
    assert_eq!(
        vertex_store.highest_committed_qc().committed().unwrap().vertex_id,
        v1.id
    );
    assert!(vertex_store.contains(&v4.id));
    assert!(!vertex_store.contains(&genesis));
    assert_eq!(counters.get(CounterType::VerticesCommitted), 1);
    assert_eq!(counters.get(CounterType::VerticesInserted), 4);
}

#[test]
fn commit_prunes_forks() {
    let mut ledger = TestLedger::default();
    let (mut vertex_store, counters) = genesis_store(&mut ledger);
    let genesis = vertex_store.root().id;

    let a1 = insert_child(&mut vertex_store, &mut ledger, &genesis, 1);
    let a2 = insert_child(&mut vertex_store, &mut ledger, &a1.id, 2);
    let b3 = insert_child(&mut vertex_store, &mut ledger, &genesis, 3);
    let b4 = insert_child(&mut vertex_store, &mut ledger, &b3.id, 4);
    let a3 = insert_child(&mut vertex_store, &mut ledger, &a2.id, 5);
    assert_eq!(vertex_store.len(), 5);

    // a3 is not a direct child of a2, so nothing is committed yet.
    let a4 = insert_child(&mut vertex_store, &mut ledger, &a3.id, 6);
    assert!(ledger.committed.is_empty());

    let a5 = insert_child(&mut vertex_store, &mut ledger, &a4.id, 7);
    let a6 = insert_child(&mut vertex_store, &mut ledger, &a5.id, 8);

    // The QC for a5 (7) over a4 (6) over a3 (5) commits a3, and with it a1 and a2.
    assert_eq!(ledger.committed, vec![a1.id, a2.id, a3.id]);
    assert_eq!(vertex_store.root().id, a3.id);
    assert!(!vertex_store.contains(&b3.id));
    assert!(!vertex_store.contains(&b4.id));
    assert!(vertex_store.contains(&a6.id));
    assert_eq!(counters.get(CounterType::VerticesPruned), 2);
}

#[test]
fn insert_rejects_unknown_and_pruned_parents() {
    let mut ledger = TestLedger::default();
    let (mut vertex_store, _) = genesis_store(&mut ledger);
    let genesis = vertex_store.root().id;

    let v1 = insert_child(&mut vertex_store, &mut ledger, &genesis, 1);
    let v2 = child_of(&vertex_store, &v1.id, 2);
    let v3 = Vertex::new(
        EPOCH,
        ViewNumber::new(3),
        qc_for(&PreparedVertex {
            vertex: v2.clone(),
            ledger_header: ledger.prepare(&[], &v2).unwrap(),
        }),
        Data::empty(),
        None,
    );

    // v2 was never inserted.
    match vertex_store.insert_vertex(&v3, &mut ledger) {
        Err(VertexStoreError::MissingParent { vertex, parent }) => {
            assert_eq!(vertex, v3.id);
            assert_eq!(parent, v2.id);
        }
        other => panic!("unexpected result: {:?}", other),
    }

    // Commit v1 so that genesis is no longer the root.
    let v2 = insert_child(&mut vertex_store, &mut ledger, &v1.id, 2);
    let v3 = insert_child(&mut vertex_store, &mut ledger, &v2.id, 3);
    insert_child(&mut vertex_store, &mut ledger, &v3.id, 4);
    assert_eq!(vertex_store.root().id, v1.id);

    let stale = Vertex::new(
        EPOCH,
        ViewNumber::new(10),
        QuorumCertificate::of_genesis(
            genesis,
            LedgerHeader::genesis(EPOCH, 0, CryptoHash::zero(), 0),
        ),
        Data::empty(),
        None,
    );
    let result = vertex_store.insert_vertex(&stale, &mut ledger);
    assert!(matches!(
        result,
        Err(VertexStoreError::PrunedAncestor { .. })
    ));
    assert!(result.unwrap_err().is_invalid_input());
}

#[test]
fn insert_rejects_malformed_vertex() {
    let mut ledger = TestLedger::default();
    let (mut vertex_store, counters) = genesis_store(&mut ledger);
    let genesis = vertex_store.root().id;

    let mut vertex = child_of(&vertex_store, &genesis, 1);
    vertex.view = ViewNumber::new(2);

    assert!(matches!(
        vertex_store.insert_vertex(&vertex, &mut ledger),
        Err(VertexStoreError::Malformed { .. })
    ));
    assert_eq!(counters.get(CounterType::InvalidVertices), 1);
}

#[test]
fn insert_is_idempotent_and_respects_ledger() {
    let mut ledger = TestLedger::default();
    let (mut vertex_store, counters) = genesis_store(&mut ledger);
    let genesis = vertex_store.root().id;

    let v1 = child_of(&vertex_store, &genesis, 1);
    let first = vertex_store.insert_vertex(&v1, &mut ledger).unwrap();
    let second = vertex_store.insert_vertex(&v1, &mut ledger).unwrap();
    assert_eq!(first, second);
    assert_eq!(counters.get(CounterType::VerticesInserted), 1);

    let rejected = child_of(&vertex_store, &v1.id, 2);
    ledger.rejected.insert(rejected.id);
    assert_eq!(vertex_store.insert_vertex(&rejected, &mut ledger).unwrap(), None);
    assert!(!vertex_store.contains(&rejected.id));
}

#[test]
fn get_vertices_walks_towards_root() {
    let mut ledger = TestLedger::default();
    let (mut vertex_store, _) = genesis_store(&mut ledger);
    let genesis = vertex_store.root().id;

    let v1 = insert_child(&mut vertex_store, &mut ledger, &genesis, 1);
    let v2 = insert_child(&mut vertex_store, &mut ledger, &v1.id, 2);

    let vertices = vertex_store.get_vertices(&v2.id, 3).unwrap();
    let ids: Vec<CryptoHash> = vertices.iter().map(|vertex| vertex.id).collect();
    assert_eq!(ids, vec![v2.id, v1.id, genesis]);

    assert!(vertex_store.get_vertices(&v2.id, 4).is_none());
    assert_eq!(vertex_store.path_from_root(&v2.id), vec![v1, v2]);
}

#[test]
fn state_rebuilds_identical_store() {
    let mut ledger = TestLedger::default();
    let (mut vertex_store, counters) = genesis_store(&mut ledger);
    let genesis = vertex_store.root().id;

    let v1 = insert_child(&mut vertex_store, &mut ledger, &genesis, 1);
    let v2 = insert_child(&mut vertex_store, &mut ledger, &v1.id, 2);
    let v3 = insert_child(&mut vertex_store, &mut ledger, &v2.id, 3);
    let v4 = insert_child(&mut vertex_store, &mut ledger, &v3.id, 4);
    let fork = insert_child(&mut vertex_store, &mut ledger, &v2.id, 5);

    let mut other_ledger = TestLedger::default();
    let rebuilt =
        VertexStore::new(vertex_store.state(), &mut other_ledger, None, counters).unwrap();

    assert_eq!(rebuilt.root().id, v1.id);
    assert_eq!(rebuilt.len(), vertex_store.len());
    for vertex in [&v2, &v3, &v4, &fork] {
        assert!(rebuilt.contains(&vertex.id));
    }
    assert_eq!(rebuilt.high_qc(), vertex_store.high_qc());
    assert!(other_ledger.committed.is_empty());
}

#[test]
fn resume_state_must_be_consistent() {
    let mut ledger = TestLedger::default();
    let (vertex_store, _) = genesis_store(&mut ledger);
    let genesis = vertex_store.root().clone();

    let other = Vertex::genesis(LedgerHeader::genesis(EPOCH, 7, CryptoHash::zero(), 0));
    assert!(matches!(
        VertexStoreState::new(other, vertex_store.high_qc(), Vec::new()),
        Err(VertexStoreError::InvalidResumeState)
    ));
    assert!(VertexStoreState::new(genesis, vertex_store.high_qc(), Vec::new()).is_ok());
}
