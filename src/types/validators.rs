/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [ValidatorSet] type and its associated methods.

use std::{collections::HashMap, slice};

use ed25519_dalek::VerifyingKey;
use rand::seq::SliceRandom;

use super::basic::{Power, TotalPower, VerifyingKeyBytes};

/// Identities of the validators of an epoch and their voting powers.
///
/// The validator set maintains the list of validators in ascending order of their [public keys](VerifyingKey),
/// and avails methods: [ValidatorSet::validators] and [ValidatorSet::validators_and_powers] to get them in
/// this order. Signature sets in certificates are indexed by this order.
///
/// # Limits to total power
///
/// The total power of a validator set must not exceed `u128::MAX/2`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorSet {
    // The verifying keys of validators are included here in ascending order.
    validators: Vec<VerifyingKey>,
    powers: HashMap<VerifyingKey, Power>,
}

impl ValidatorSet {
    pub fn new() -> ValidatorSet {
        Self {
            validators: Vec::new(),
            powers: HashMap::new(),
        }
    }

    pub fn put(&mut self, validator: &VerifyingKey, power: Power) {
        if !self.powers.contains_key(validator) {
            let validator_bytes = validator.to_bytes();
            if let Err(insert_pos) = self
                .validators
                .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
            {
                self.validators.insert(insert_pos, *validator);
            }
        }

        self.powers.insert(*validator, power);
    }

    pub fn power(&self, validator: &VerifyingKey) -> Option<&Power> {
        self.powers.get(validator)
    }

    pub fn total_power(&self) -> TotalPower {
        let mut total_power = TotalPower::new(0);
        for power in self.powers.values() {
            total_power += *power
        }
        total_power
    }

    pub fn contains(&self, validator: &VerifyingKey) -> bool {
        self.powers.contains_key(validator)
    }

    /// Look up the validator whose verifying key is `bytes`.
    pub fn get_by_bytes(&self, bytes: &VerifyingKeyBytes) -> Option<VerifyingKey> {
        self.validators
            .binary_search_by(|v| v.to_bytes().cmp(bytes))
            .ok()
            .map(|pos| self.validators[pos])
    }

    /// Get an iterator through validators' verifying keys which walks through them in ascending order.
    pub fn validators(&self) -> slice::Iter<'_, VerifyingKey> {
        self.validators.iter()
    }

    /// Get a vector containing each validator and its power, in ascending order of the validators' verifying keys.
    pub fn validators_and_powers(&self) -> Vec<(VerifyingKey, Power)> {
        self.validators
            .iter()
            .filter_map(|v| self.power(v).map(|p| (*v, *p)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self, validator: &VerifyingKey) -> Option<usize> {
        let validator_bytes = validator.to_bytes();
        self.validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
            .ok()
    }

    /// Pick a random validator that is not in `exclude`.
    pub(crate) fn random_excluding(&self, exclude: &[VerifyingKey]) -> Option<VerifyingKey> {
        let candidates: Vec<&VerifyingKey> = self
            .validators
            .iter()
            .filter(|v| !exclude.contains(v))
            .collect();
        candidates.choose(&mut rand::thread_rng()).map(|v| **v)
    }

    /// The minimum total power of a set of validators that constitutes a quorum: `2 * total / 3 + 1`.
    pub fn quorum(&self) -> TotalPower {
        TotalPower::new(self.total_power().int().saturating_mul(2) / 3 + 1)
    }
}
