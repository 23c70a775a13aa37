/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Collectors that incrementally combine votes into certificates.

use ed25519_dalek::VerifyingKey;

use crate::types::{
    basic::{EpochNumber, SignatureBytes, TotalPower, ViewNumber},
    certificates::{
        QuorumCertificate, SignatureSet, TimeoutCertificate, TimestampedSignature, VoteData,
    },
    validators::ValidatorSet,
    voting::Vote,
};

/// Types that progressively combine matching [`Vote`]s to form certificates.
pub(crate) trait Collector {
    /// The certificate that this `Collector` returns once it has collected a quorum.
    type Certificate;

    /// Collect `vote` signed by `signer`, returning a certificate if the votes collected so far carry
    /// a quorum of the validator set's power.
    ///
    /// Collecting a vote that does not match the collector, that was signed by a replica outside the
    /// validator set, or whose signer has already been collected, is a no-op.
    ///
    /// # Preconditions
    ///
    /// [`vote.is_correct(signer)`](Vote::is_correct).
    fn collect(&mut self, signer: &VerifyingKey, vote: &Vote) -> Option<Self::Certificate>;

    /// Remove the vote collected from `signer`, if any. Returns whether the collector is now empty.
    fn retract(&mut self, signer: &VerifyingKey) -> bool;
}

/// Helps replicas form [`QuorumCertificate`]s by combining votes with the same [`VoteData`].
pub(crate) struct QuorumCollector {
    vote_data: VoteData,
    validator_set: ValidatorSet,
    signature_set_power: TotalPower,
    signature_set: SignatureSet<TimestampedSignature>,
}

impl QuorumCollector {
    pub(crate) fn new(vote_data: VoteData, validator_set: ValidatorSet) -> Self {
        let n = validator_set.len();
        Self {
            vote_data,
            validator_set,
            signature_set_power: TotalPower::new(0),
            signature_set: SignatureSet::new(n),
        }
    }
}

impl Collector for QuorumCollector {
    type Certificate = QuorumCertificate;

    fn collect(&mut self, signer: &VerifyingKey, vote: &Vote) -> Option<QuorumCertificate> {
        if *vote.vote_data() != self.vote_data {
            return None;
        }

        // Check if the signer is actually in the validator set.
        let pos = self.validator_set.position(signer)?;
        let power = *self.validator_set.power(signer)?;

        // If the vote has not been collected before, insert its signature into the signature set.
        if self.signature_set.get(pos).is_none() {
            self.signature_set.set(
                pos,
                Some(TimestampedSignature {
                    timestamp: vote.timestamp(),
                    signature: vote.signature,
                }),
            );
            self.signature_set_power += power;

            // If inserting the vote makes the signature set form a quorum, then create a quorum certificate.
            if self.signature_set_power >= self.validator_set.quorum() {
                return Some(QuorumCertificate::new(
                    self.vote_data,
                    self.signature_set.clone(),
                ));
            }
        }

        None
    }

    fn retract(&mut self, signer: &VerifyingKey) -> bool {
        if let (Some(pos), Some(power)) = (
            self.validator_set.position(signer),
            self.validator_set.power(signer).copied(),
        ) {
            if self.signature_set.get(pos).is_some() {
                self.signature_set.set(pos, None);
                self.signature_set_power =
                    TotalPower::new(self.signature_set_power.int() - power.int() as u128);
            }
        }
        self.signature_set.count() == 0
    }
}

/// Helps replicas form [`TimeoutCertificate`]s by combining timeout votes for the same epoch and view.
///
/// Unlike a [`QuorumCollector`], a `TimeoutCollector` combines votes with different vote data: replicas may
/// time out after voting for different vertices.
pub(crate) struct TimeoutCollector {
    epoch: EpochNumber,
    view: ViewNumber,
    validator_set: ValidatorSet,
    signature_set_power: TotalPower,
    signature_set: SignatureSet<SignatureBytes>,
}

impl TimeoutCollector {
    pub(crate) fn new(epoch: EpochNumber, view: ViewNumber, validator_set: ValidatorSet) -> Self {
        let n = validator_set.len();
        Self {
            epoch,
            view,
            validator_set,
            signature_set_power: TotalPower::new(0),
            signature_set: SignatureSet::new(n),
        }
    }
}

impl Collector for TimeoutCollector {
    type Certificate = TimeoutCertificate;

    fn collect(&mut self, signer: &VerifyingKey, vote: &Vote) -> Option<TimeoutCertificate> {
        if self.epoch != vote.epoch() || self.view != vote.view() {
            return None;
        }
        let timeout_signature = vote.timeout_signature?;

        let pos = self.validator_set.position(signer)?;
        let power = *self.validator_set.power(signer)?;

        if self.signature_set.get(pos).is_none() {
            self.signature_set.set(pos, Some(timeout_signature));
            self.signature_set_power += power;

            if self.signature_set_power >= self.validator_set.quorum() {
                return Some(TimeoutCertificate {
                    epoch: self.epoch,
                    view: self.view,
                    signatures: self.signature_set.clone(),
                });
            }
        }

        None
    }

    fn retract(&mut self, signer: &VerifyingKey) -> bool {
        if let (Some(pos), Some(power)) = (
            self.validator_set.position(signer),
            self.validator_set.power(signer).copied(),
        ) {
            if self.signature_set.get(pos).is_some() {
                self.signature_set.set(pos, None);
                self.signature_set_power =
                    TotalPower::new(self.signature_set_power.int() - power.int() as u128);
            }
        }
        self.signature_set.count() == 0
    }
}
