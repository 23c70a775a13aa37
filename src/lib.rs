/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! An epoch-scoped consensus core of the HotStuff family.
//!
//! Replicas agree on a chain of vertices through views. In each view a leader proposes a vertex, and the
//! validators vote for it. A vertex is committed once it is followed by two vertices in consecutive views,
//! all three certified. The validator set is fixed within an epoch; an epoch ends when the ledger commits
//! the vertex that ends it, and consensus restarts from a new genesis in the next epoch.
//!
//! ## Components
//!
//! |Component|Module|
//! |---|---|
//! |Signs proposals and votes, and enforces the voting and locking rules. The only durable state.|[`safety_rules`]|
//! |Moves through views, elects leaders, proposes, and times out.|[`pacemaker`]|
//! |Holds the uncommitted vertices and commits them.|[`vertex_store`]|
//! |Fetches missing vertices from peers, and serves peers' requests.|[`bft_sync`]|
//! |Aggregates votes into quorum and timeout certificates.|[`voting`]|
//! |Routes inputs by epoch and rebuilds the components at epoch boundaries.|[`epoch_manager`]|
//!
//! ## Collaborators
//!
//! The library user provides the [network](networking::network::Network), the
//! [ledger](ledger::Ledger) that executes and commits vertices, the [scheduler](scheduler::Scheduler) of
//! timeouts, and the [key-value store](safety_rules::pluggables::KVStore) of the safety state. The user
//! also owns the event loop: every input is handed to the [`EpochManager`](epoch_manager::EpochManager) one
//! at a time.
//!
//! ## Observability
//!
//! Components emit [events](events) that are delivered to handlers on a separate thread by the
//! [event bus](event_bus), including the default [logging] handlers, and count what they do in the shared
//! [counters].

pub mod bft_sync;

pub mod config;

pub mod counters;

pub mod epoch_manager;

pub mod event_bus;

pub mod events;

pub mod ledger;

pub mod logging;

pub mod networking;

pub mod pacemaker;

pub mod replica;

pub mod safety_rules;

pub mod scheduler;

pub mod types;

pub mod vertex_store;

pub mod voting;
