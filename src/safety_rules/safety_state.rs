/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The crash-durable state of [Safety Rules](super::SafetyRules), and the store it is persisted through.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    basic::{EpochNumber, VerifyingKeyBytes, ViewNumber},
    voting::Vote,
};

use super::pluggables::{safety_state_key, KVGetError, KVStore, WriteBatch};

/// The only state of the consensus core that must survive a crash.
///
/// ## Invariants
///
/// Within an epoch, `locked_view` never decreases, and the view of `last_vote` only increases. Views restart
/// at genesis in every epoch, so a state that belongs to an earlier epoch is replaced by the
/// [`initial`](Self::initial) state of the current one.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SafetyState {
    epoch: EpochNumber,
    locked_view: ViewNumber,
    last_vote: Option<Vote>,
}

impl SafetyState {
    /// The state of a validator that has not voted in `epoch` yet.
    pub fn initial(epoch: EpochNumber) -> SafetyState {
        SafetyState {
            epoch,
            locked_view: ViewNumber::genesis(),
            last_vote: None,
        }
    }

    pub fn epoch(&self) -> EpochNumber {
        self.epoch
    }

    pub fn locked_view(&self) -> ViewNumber {
        self.locked_view
    }

    pub fn last_vote(&self) -> Option<&Vote> {
        self.last_vote.as_ref()
    }

    /// The view of the last vote, or genesis if no vote has been cast in this epoch.
    pub fn last_voted_view(&self) -> ViewNumber {
        self.last_vote
            .as_ref()
            .map_or(ViewNumber::genesis(), |vote| vote.view())
    }

    /// Bring a state loaded from storage up to `epoch`.
    pub(crate) fn for_epoch(self, epoch: EpochNumber) -> SafetyState {
        if self.epoch < epoch {
            SafetyState::initial(epoch)
        } else {
            self
        }
    }

    pub(crate) fn with_locked_view(&self, locked_view: ViewNumber) -> SafetyState {
        SafetyState {
            locked_view,
            ..self.clone()
        }
    }

    pub(crate) fn with_last_vote(&self, last_vote: Vote) -> SafetyState {
        SafetyState {
            last_vote: Some(last_vote),
            ..self.clone()
        }
    }
}

/// Writes and reads a single validator's [`SafetyState`] through a [`KVStore`].
#[derive(Clone)]
pub struct PersistentSafetyStateStore<K: KVStore> {
    kv_store: K,
    validator: VerifyingKeyBytes,
}

impl<K: KVStore> PersistentSafetyStateStore<K> {
    pub fn new(kv_store: K, validator: VerifyingKeyBytes) -> Self {
        Self {
            kv_store,
            validator,
        }
    }

    /// Durably write `state`. Returns only after the underlying store has made the write durable.
    pub fn commit_state(&mut self, state: &SafetyState) -> std::io::Result<()> {
        let mut wb = K::WriteBatch::new();
        wb.set(&safety_state_key(&self.validator), &state.try_to_vec()?);
        self.kv_store.write(wb)
    }

    pub fn load(&self) -> Result<Option<SafetyState>, KVGetError> {
        self.kv_store.safety_state(&self.validator)
    }
}
