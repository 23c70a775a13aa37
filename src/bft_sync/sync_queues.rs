/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-author queues of consensus events that wait for their high QC to be synced.

use std::collections::{HashMap, VecDeque};

use ed25519_dalek::VerifyingKey;

use crate::networking::messages::ConsensusEvent;

/// What to do with the event at the head of a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum QueueDecision {
    /// The event's high QC is now synced: hand it back for processing.
    Ready,
    /// The event's high QC is still being synced.
    Wait,
    /// The sync the event was waiting for was abandoned.
    Drop,
}

/// Events waiting for a sync, queued per author.
///
/// Events from an author whose queue is not empty are appended to the queue even if their own high QC is
/// already synced, so that events from the same author are processed in the order they arrived.
pub(crate) struct SyncQueues {
    queues: HashMap<VerifyingKey, VecDeque<ConsensusEvent>>,
    max_per_author: usize,
}

impl SyncQueues {
    pub(crate) fn new(max_per_author: usize) -> Self {
        Self {
            queues: HashMap::new(),
            max_per_author,
        }
    }

    /// Whether events from `author` are waiting for a sync.
    pub(crate) fn is_waiting(&self, author: &VerifyingKey) -> bool {
        self.queues
            .get(author)
            .map_or(false, |queue| !queue.is_empty())
    }

    /// Queue `event` from `author`. Returns `false` if the author's queue is full and the event was
    /// dropped.
    pub(crate) fn add(&mut self, author: VerifyingKey, event: ConsensusEvent) -> bool {
        let queue = self.queues.entry(author).or_default();
        if queue.len() >= self.max_per_author {
            return false;
        }
        queue.push_back(event);
        true
    }

    /// Pop events from the head of every queue for as long as `decide` does not say [`QueueDecision::Wait`].
    /// Returns the events that are ready, and the number of events dropped.
    pub(crate) fn drain_ready<F>(&mut self, mut decide: F) -> (Vec<(VerifyingKey, ConsensusEvent)>, usize)
    where
        F: FnMut(&ConsensusEvent) -> QueueDecision,
    {
        let mut ready = Vec::new();
        let mut dropped = 0;
        for (author, queue) in self.queues.iter_mut() {
            while let Some(event) = queue.front() {
                match decide(event) {
                    QueueDecision::Wait => break,
                    QueueDecision::Ready => {
                        if let Some(event) = queue.pop_front() {
                            ready.push((*author, event));
                        }
                    }
                    QueueDecision::Drop => {
                        queue.pop_front();
                        dropped += 1;
                    }
                }
            }
        }
        self.queues.retain(|_, queue| !queue.is_empty());
        (ready, dropped)
    }

    pub(crate) fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}
