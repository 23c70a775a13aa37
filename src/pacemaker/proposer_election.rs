/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Leader selection.

use ed25519_dalek::VerifyingKey;

use crate::types::{basic::ViewNumber, validators::ValidatorSet};

/// Chooses the leader of every view of an epoch from the epoch's validator set.
#[derive(Clone, Debug)]
pub struct ProposerElection {
    validator_set: ValidatorSet,
}

impl ProposerElection {
    /// # Panics
    ///
    /// Panics if `validator_set` is empty or has no power.
    pub fn new(validator_set: ValidatorSet) -> Self {
        assert!(
            validator_set.total_power().int() > 0,
            "cannot elect proposers from a validator set with no power"
        );
        Self { validator_set }
    }

    pub fn leader(&self, view: ViewNumber) -> VerifyingKey {
        select_leader(view, &self.validator_set)
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }
}

/// Deterministically select a validator in `validator_set` to become the leader of `view` using the
/// [Interleaved WRR](https://en.wikipedia.org/wiki/Weighted_round_robin#Interleaved_WRR) algorithm.
///
/// Over any `total_power` consecutive views, every validator leads exactly as many views as it has power.
fn select_leader(view: ViewNumber, validator_set: &ValidatorSet) -> VerifyingKey {
    let validators_and_powers = validator_set.validators_and_powers();
    // Length of the abstract array.
    let p_total = validator_set.total_power().int();
    // Index in the abstract array.
    let index = (view.int() as u128) % p_total;
    // Max. power among the validators.
    let p_max = validators_and_powers
        .iter()
        .map(|(_, power)| power.int())
        .max()
        .unwrap_or(0);

    let mut counter = 0;

    // Search for a validator at given index in the abstract array of leaders.
    for threshold in 1..=p_max {
        for (validator, power) in &validators_and_powers {
            if power.int() >= threshold {
                if counter == index {
                    return *validator;
                }
                counter += 1
            }
        }
    }

    // Safety: `index < p_total`, and the abstract array has exactly `p_total` entries.
    unreachable!("cannot select a leader: index not found")
}
