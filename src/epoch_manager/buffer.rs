/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bounded buffer of consensus events that belong to future epochs.
//!
//! Only the events at the highest view of an epoch are ever replayed when the epoch starts, so the buffer
//! keeps only those. It holds at most `max_buffered_epochs` epochs, evicting the lowest epoch first, and
//! at most `max_buffered_events_per_epoch` events per epoch.

use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey;

use crate::{
    networking::messages::ConsensusEvent,
    types::basic::{EpochNumber, ViewNumber},
};

/// Configuration variables for [`EpochEventBuffer`].
#[derive(Clone, Copy, Debug)]
pub struct EpochBufferConfiguration {
    pub max_buffered_epochs: usize,
    pub max_buffered_events_per_epoch: usize,
}

/// Outcome of [`EpochEventBuffer::insert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferInsertResult {
    /// The event was buffered. `evicted` previously buffered events were discarded to make room for it or
    /// because it superseded them.
    Buffered { evicted: usize },
    /// The event was not buffered.
    Dropped,
}

struct EpochEvents {
    view: ViewNumber,
    events: Vec<(VerifyingKey, ConsensusEvent)>,
}

pub struct EpochEventBuffer {
    config: EpochBufferConfiguration,
    epochs: BTreeMap<EpochNumber, EpochEvents>,
}

impl EpochEventBuffer {
    pub fn new(config: EpochBufferConfiguration) -> Self {
        Self {
            config,
            epochs: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, origin: VerifyingKey, event: ConsensusEvent) -> BufferInsertResult {
        let epoch = event.epoch();
        let view = event.view();

        if let Some(epoch_events) = self.epochs.get_mut(&epoch) {
            if view < epoch_events.view {
                return BufferInsertResult::Dropped;
            }

            let mut evicted = 0;
            if view > epoch_events.view {
                evicted = epoch_events.events.len();
                epoch_events.events.clear();
                epoch_events.view = view;
            }

            if epoch_events.events.len() >= self.config.max_buffered_events_per_epoch {
                return BufferInsertResult::Dropped;
            }
            epoch_events.events.push((origin, event));
            return BufferInsertResult::Buffered { evicted };
        }

        if self.config.max_buffered_epochs == 0 || self.config.max_buffered_events_per_epoch == 0 {
            return BufferInsertResult::Dropped;
        }

        let mut evicted = 0;
        if self.epochs.len() >= self.config.max_buffered_epochs {
            match self.epochs.keys().next().copied() {
                Some(lowest) if lowest < epoch => {
                    if let Some(lowest_events) = self.epochs.remove(&lowest) {
                        evicted = lowest_events.events.len();
                    }
                }
                _ => return BufferInsertResult::Dropped,
            }
        }

        self.epochs.insert(
            epoch,
            EpochEvents {
                view,
                events: vec![(origin, event)],
            },
        );
        BufferInsertResult::Buffered { evicted }
    }

    /// Remove and return the buffered events of `epoch`, in the order they arrived. Events of earlier epochs
    /// are discarded; their number is returned alongside.
    pub fn take(&mut self, epoch: EpochNumber) -> (Vec<(VerifyingKey, ConsensusEvent)>, usize) {
        let later = self.epochs.split_off(&epoch.next());
        let earlier = std::mem::replace(&mut self.epochs, later);

        let mut events = Vec::new();
        let mut discarded = 0;
        for (buffered_epoch, epoch_events) in earlier {
            if buffered_epoch == epoch {
                events = epoch_events.events;
            } else {
                discarded += epoch_events.events.len();
            }
        }

        (events, discarded)
    }

    pub fn len(&self) -> usize {
        self.epochs.values().map(|epoch_events| epoch_events.events.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn buffered_epochs(&self) -> usize {
        self.epochs.len()
    }
}
