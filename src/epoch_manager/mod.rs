/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The root of the consensus core, and the only component aware of epoch boundaries.
//!
//! # Epochs
//!
//! An epoch is a run of consensus with a fixed validator set. An epoch ends when the ledger commits a
//! vertex that ends it, and reports an [`EpochChange`](types::EpochChange) that carries the next epoch's
//! validator set and genesis. The [`EpochManager`] then:
//! 1. Tells the network about the new validator set and, if this replica is a validator of either epoch,
//!    sends the committed header that ended the old epoch to the new validators.
//! 2. Drops the old epoch's [context](context::EpochContext) with everything in it and builds the new
//!    epoch's: a fresh [pipeline](pipeline::BFTPipeline) if this replica is a validator, an inert context
//!    otherwise. Only the durable safety state carries over.
//! 3. Replays the consensus events buffered for the new epoch.
//!
//! An epoch change that does not start the epoch right after the current one is a fatal error.
//!
//! # Routing
//!
//! Consensus events carry their epoch:
//! - Events of the current epoch go to the current context.
//! - Events of a future epoch are held in a bounded [buffer](buffer::EpochEventBuffer) which keeps only
//!   the events at the highest view of each epoch.
//! - Events of a past epoch are discarded.
//!
//! Local timeouts, vertex request timeouts and view updates are tagged with the epoch they were produced in
//! ([`Epoched`](types::Epoched)), and are ignored if that epoch has passed.

pub mod buffer;

pub mod context;

pub mod implementation;
pub use implementation::{EpochManager, EpochManagerError};

pub mod pipeline;

pub mod types;
