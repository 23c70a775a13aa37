/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable persistence of the [`SafetyState`].
//!
//! The consensus core persists exactly one record per validator identity. Library users provide a
//! key-value store by implementing [`KVStore`]; the typed getters of [`KVGet`] and the key layout below are
//! provided by this crate.
//!
//! ## Key layout
//!
//! |Key|Value type|
//! |---|---|
//! |`SAFETY_STATE` ++ validator's verifying key (32 bytes)|[`SafetyState`]|

use std::fmt::{self, Display};

use borsh::BorshDeserialize;

use crate::types::basic::VerifyingKeyBytes;

use super::safety_state::SafetyState;

/// One-byte prefix of the key under which a validator's [`SafetyState`] is stored.
pub const SAFETY_STATE: [u8; 1] = [0];

/// A key-value store that the [`SafetyRules`](super::SafetyRules) writes its state into.
///
/// # Durability
///
/// [`write`](Self::write) must only return `Ok` once the write batch is durable, i.e., it would survive a
/// process crash or power loss. Safety Rules never lets a vote leave the replica before `write` returns.
pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    fn write(&mut self, wb: Self::WriteBatch) -> std::io::Result<()>;
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Get the `SafetyState` persisted for `validator`, if any.
    fn safety_state(&self, validator: &VerifyingKeyBytes) -> Result<Option<SafetyState>, KVGetError> {
        if let Some(bytes) = self.get(&safety_state_key(validator)) {
            Ok(Some(
                SafetyState::deserialize(&mut bytes.as_slice()).map_err(|err| {
                    KVGetError::DeserializeValueError {
                        key: Key::SafetyState {
                            validator: *validator,
                        },
                        source: err,
                    }
                })?,
            ))
        } else {
            Ok(None)
        }
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
}

/// The key under which `validator`'s [`SafetyState`] is stored.
pub(crate) fn safety_state_key(validator: &VerifyingKeyBytes) -> Vec<u8> {
    concat(&SAFETY_STATE, validator)
}

/// Takes references to two byteslices and returns a vector containing the bytes of the first one, and then
/// the bytes of the second one.
pub(crate) fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}

#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
}

/// Keys of values that can be read from a [`KVGet`].
#[derive(Debug)]
pub enum Key {
    SafetyState { validator: VerifyingKeyBytes },
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::SafetyState { validator } => {
                write!(f, "Safety State of {:02x?}", &validator[0..4])
            }
        }
    }
}
