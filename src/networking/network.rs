/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pluggable [`Network`] trait.

use ed25519_dalek::VerifyingKey;

use crate::types::{validators::ValidatorSet, vertex::LedgerHeader};

use super::messages::Message;

/// Outbound half of the remote transport.
///
/// Inbound messages are not pulled through this trait: the surrounding runtime delivers them, together
/// with the identity of their sender, to [`EpochManager::on_receive_msg`](crate::epoch_manager::EpochManager::on_receive_msg).
/// All methods must return without blocking on delivery.
pub trait Network: Clone + Send {
    /// Inform the network provider of the validator set of a new epoch.
    fn update_validator_set(&mut self, validator_set: ValidatorSet);

    /// Send a message to every validator of the current epoch, including this replica.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer.
    fn send(&mut self, peer: VerifyingKey, message: Message);

    /// Tell `peer` about a ledger header that this replica has committed. Sent at epoch changes so that
    /// peers can start syncing to the new epoch.
    fn send_ledger_status_update(&mut self, peer: VerifyingKey, header: LedgerHeader);
}
