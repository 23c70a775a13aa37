/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replica's [`Configuration`], and its split into the configurations of individual components.
//!
//! ## Example
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .pacemaker_base_timeout(Duration::from_secs(3))
//!     .pacemaker_timeout_rate(1.2)
//!     .pacemaker_max_timeout_exponent(6)
//!     .vertex_request_timeout(Duration::from_millis(500))
//!     .vertex_request_max_attempts(3)
//!     .ledger_sync_timeout(Duration::from_secs(5))
//!     .max_buffered_epochs(2)
//!     .max_buffered_events_per_epoch(64)
//!     .max_queued_events_per_view(256)
//!     .log_events(true)
//!     .build()
//! ```

use std::time::Duration;

use ed25519_dalek::SigningKey;
use typed_builder::TypedBuilder;

use crate::{
    bft_sync::BFTSyncConfiguration, epoch_manager::buffer::EpochBufferConfiguration,
    pacemaker::PacemakerConfiguration, types::crypto_primitives::Keypair,
};

/// Stores the user-defined parameters of a replica.
///
/// ## Timeouts
///
/// The timeout of a view is `pacemaker_base_timeout * pacemaker_timeout_rate^n`, where `n` is the number of
/// consecutive views that ended in a timeout certificate, capped at `pacemaker_max_timeout_exponent`.
///
/// Attempt `k` (0-based) at fetching vertices from a peer times out after `vertex_request_timeout * 2^k`.
/// After `vertex_request_max_attempts` attempts, the replica gives up and asks its ledger to sync instead.
/// A sync that waits for the ledger asks it again after `ledger_sync_timeout * 2^k`, and is abandoned after
/// the same number of attempts.
///
/// A `pacemaker_timeout_rate` below 1 would make timeouts shrink as views keep failing, and is treated as 1.
///
/// ## Buffers
///
/// Consensus events for future epochs are buffered for at most `max_buffered_epochs` epochs, and at most
/// `max_buffered_events_per_epoch` events per epoch. Events for future views of the current epoch are held
/// up to `max_queued_events_per_view` per view. The same bound applies to the events of each author that
/// wait for a sync.
#[derive(Clone, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.pacemaker_base_timeout(...)`
    - `.pacemaker_timeout_rate(...)`
    - `.pacemaker_max_timeout_exponent(...)`
    - `.vertex_request_timeout(...)`
    - `.vertex_request_max_attempts(...)`
    - `.ledger_sync_timeout(...)`
    - `.max_buffered_epochs(...)`
    - `.max_buffered_events_per_epoch(...)`
    - `.max_queued_events_per_view(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's keypair, used to sign proposals and votes. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the timeout of a view entered without preceding timeouts. Required."))]
    pub pacemaker_base_timeout: Duration,
    #[builder(setter(doc = "Set the factor by which view timeouts grow with each consecutive timeout. Rates below 1 are treated as 1. Required."))]
    pub pacemaker_timeout_rate: f64,
    #[builder(setter(doc = "Set the number of consecutive timeouts after which view timeouts stop growing. Required."))]
    pub pacemaker_max_timeout_exponent: u32,
    #[builder(setter(doc = "Set the timeout of the first attempt at fetching vertices from a peer. Required."))]
    pub vertex_request_timeout: Duration,
    #[builder(setter(doc = "Set the number of attempts at fetching vertices before syncing the ledger instead. Required."))]
    pub vertex_request_max_attempts: u32,
    #[builder(setter(doc = "Set the timeout of the first request to the ledger to catch up with a committed state. Required."))]
    pub ledger_sync_timeout: Duration,
    #[builder(setter(doc = "Set the number of future epochs whose consensus events are buffered. Required."))]
    pub max_buffered_epochs: usize,
    #[builder(setter(doc = "Set the number of consensus events buffered per future epoch. Required."))]
    pub max_buffered_events_per_epoch: usize,
    #[builder(setter(doc = "Set the number of consensus events held per future view of the current epoch. Required."))]
    pub max_queued_events_per_view: usize,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

/// The configurations of the components of a replica, split out of a [`Configuration`].
pub(crate) struct ComponentConfigurations {
    pub(crate) keypair: Keypair,
    pub(crate) pacemaker: PacemakerConfiguration,
    pub(crate) bft_sync: BFTSyncConfiguration,
    pub(crate) epoch_buffer: EpochBufferConfiguration,
    pub(crate) max_queued_events_per_view: usize,
}

impl From<Configuration> for ComponentConfigurations {
    fn from(config: Configuration) -> Self {
        ComponentConfigurations {
            keypair: Keypair::new(config.me),
            pacemaker: PacemakerConfiguration {
                base_timeout: config.pacemaker_base_timeout,
                timeout_rate: config.pacemaker_timeout_rate,
                max_timeout_exponent: config.pacemaker_max_timeout_exponent,
            },
            bft_sync: BFTSyncConfiguration {
                request_timeout: config.vertex_request_timeout,
                max_attempts: config.vertex_request_max_attempts,
                ledger_sync_timeout: config.ledger_sync_timeout,
            },
            epoch_buffer: EpochBufferConfiguration {
                max_buffered_epochs: config.max_buffered_epochs,
                max_buffered_events_per_epoch: config.max_buffered_events_per_epoch,
            },
            max_queued_events_per_view: config.max_queued_events_per_view,
        }
    }
}
