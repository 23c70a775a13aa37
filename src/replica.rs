/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and start a replica.
//!
//! The consensus core works to safely order the vertices of a chain across multiple processes. In our
//! terminology, these processes are called 'replicas'. Each replica is uniquely identified by an
//! [Ed25519 public key](ed25519_dalek::VerifyingKey). The replicas whose votes count in an epoch are that
//! epoch's 'validators'.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica and its event bus alive.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let mut replica =
//!     ReplicaSpec::builder()
//!     .network(network)
//!     .kv_store(kv_store)
//!     .scheduler(scheduler)
//!     .configuration(configuration)
//!     .epoch(EpochNumber::new(0))
//!     .bft_configuration(bft_configuration)
//!     .on_event(|event| handle(event))
//!     .build()
//!     .start(&mut ledger)?;
//!
//! // Deliver inputs as they arrive.
//! replica.epoch_manager_mut().on_receive_msg(origin, message, &mut ledger)?;
//! ```
//!
//! The replica does not run a thread of its own for consensus: the caller owns the event loop and hands
//! each input to the [`EpochManager`] in turn. Only event handlers run on a separate thread.

use std::{
    sync::mpsc::{self, Sender},
    thread::JoinHandle,
};

use typed_builder::TypedBuilder;

use crate::{
    config::Configuration,
    epoch_manager::{types::BFTConfiguration, EpochManager, EpochManagerError},
    event_bus::{start_event_bus, EventHandlers, HandlerPtr},
    events::Event,
    ledger::Ledger,
    networking::network::Network,
    safety_rules::pluggables::KVStore,
    scheduler::Scheduler,
    types::basic::EpochNumber,
};

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.network(...)`
    - `.kv_store(...)`
    - `.scheduler(...)`
    - `.configuration(...)`
    - `.epoch(...)`
    - `.bft_configuration(...)`

    Optional:
    - `.on_event(...)`
"))]
pub struct ReplicaSpec<N: Network, K: KVStore, S: Scheduler> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the key-value store that the replica's safety state is persisted in. The argument must implement the [KVStore](crate::safety_rules::pluggables::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the scheduler of local timeouts. The argument must implement the [Scheduler](crate::scheduler::Scheduler) trait. Required."))]
    scheduler: S,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the epoch that the replica starts (or resumes) in. Required."))]
    epoch: EpochNumber,
    #[builder(setter(doc = "Set the validator set and vertex store state of the epoch that the replica starts in. Required."))]
    bft_configuration: BFTConfiguration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&Event) + Send + 'static| Some(Box::new(handler) as HandlerPtr<Event>),
    doc = "Register a handler closure to be invoked on every event the replica emits. Optional."))]
    on_event: Option<HandlerPtr<Event>>,
}

impl<N: Network, K: KVStore, S: Scheduler> ReplicaSpec<N, K, S> {
    /// Build the replica's [`EpochManager`], start its event bus if any handler is registered, and enter the
    /// first view of the starting epoch.
    pub fn start<L: Ledger>(self, ledger: &mut L) -> Result<Replica<N, K, S>, EpochManagerError> {
        let event_handlers =
            EventHandlers::new(self.configuration.log_events, self.on_event.into_iter().collect());

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let mut epoch_manager = EpochManager::new(
            self.configuration,
            self.epoch,
            self.bft_configuration,
            self.network,
            self.kv_store,
            self.scheduler,
            ledger,
            event_publisher,
        )?;

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                (
                    Some(start_event_bus(event_handlers, event_subscriber, shutdown_receiver)),
                    Some(shutdown),
                )
            }
            None => (None, None),
        };

        epoch_manager.start(ledger)?;

        Ok(Replica {
            epoch_manager,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A running replica. When this value is dropped, its event bus thread is shut down.
pub struct Replica<N: Network, K: KVStore, S: Scheduler> {
    epoch_manager: EpochManager<N, K, S>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<N: Network, K: KVStore, S: Scheduler> Replica<N, K, S> {
    pub fn epoch_manager(&self) -> &EpochManager<N, K, S> {
        &self.epoch_manager
    }

    /// The entry point for every input of the replica.
    pub fn epoch_manager_mut(&mut self) -> &mut EpochManager<N, K, S> {
        &mut self.epoch_manager
    }
}

impl<N: Network, K: KVStore, S: Scheduler> Drop for Replica<N, K, S> {
    fn drop(&mut self) {
        if let Some(shutdown) = self.event_bus_shutdown.take() {
            // The thread may already have exited.
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("Event bus thread panicked");
            }
        }
    }
}
