//! Tests of the voting and locking rules enforced by Safety Rules, and of the durability of its state.
//!
//! Every test builds vertices directly with [`Chain`], without running consensus.

mod common;

use ed25519_dalek::SigningKey;
use epoch_bft::{
    safety_rules::{SafetyRules, SafetyRulesError},
    types::{
        basic::{EpochNumber, ViewNumber},
        crypto_primitives::Keypair,
    },
};

use crate::common::{chain::Chain, mem_db::MemDB, node::signing_keys};

const EPOCH: EpochNumber = EpochNumber::new(0);

fn safety_rules(me: &SigningKey, kv_store: &MemDB, epoch: EpochNumber) -> SafetyRules<MemDB> {
    SafetyRules::new(Keypair::new(me.clone()), epoch, kv_store.clone(), None).unwrap()
}

/// A chain of vertices at views 1, 2 and 3 on top of genesis.
fn three_chain(proposer: &SigningKey) -> Chain {
    let mut chain = Chain::genesis(EPOCH, 0);
    chain.extend(1, proposer);
    chain.extend(2, proposer);
    chain.extend(3, proposer);
    chain
}

/// Vote for the vertex at `index` of `chain`.
fn vote_for(
    safety_rules: &mut SafetyRules<MemDB>,
    chain: &Chain,
    index: usize,
) -> Result<Option<epoch_bft::types::voting::Vote>, SafetyRulesError> {
    safety_rules.vote_for(
        &chain.vertices[index],
        chain.headers[index],
        0,
        chain.high_qc(index - 1, 0),
    )
}

#[test]
fn never_votes_twice_in_a_view() {
    let keys = signing_keys(2);
    let kv_store = MemDB::new();
    let mut safety_rules = safety_rules(&keys[0], &kv_store, EPOCH);
    let mut chain = Chain::genesis(EPOCH, 0);
    chain.extend(1, &keys[1]);

    // 1. The first vote in view 1 is cast.
    let vote = vote_for(&mut safety_rules, &chain, 1).unwrap().unwrap();
    assert_eq!(vote.view(), ViewNumber::new(1));
    assert!(vote.is_correct(&keys[0].verifying_key()));
    assert_eq!(safety_rules.state().last_voted_view(), ViewNumber::new(1));

    // 2. Neither the same vertex nor a conflicting vertex in view 1 gets a second vote.
    assert!(vote_for(&mut safety_rules, &chain, 1).unwrap().is_none());
    chain.fork(0, 1, &keys[0]);
    assert!(vote_for(&mut safety_rules, &chain, 2).unwrap().is_none());
    assert_eq!(safety_rules.get_last_vote(ViewNumber::new(1)), Some(vote));
}

#[test]
fn locked_view_follows_grandparent() {
    let keys = signing_keys(2);
    let kv_store = MemDB::new();
    let mut safety_rules = safety_rules(&keys[0], &kv_store, EPOCH);
    let mut chain = three_chain(&keys[1]);

    // 1. Voting along the chain locks on the grandparent of each vertex voted for.
    vote_for(&mut safety_rules, &chain, 1).unwrap().unwrap();
    vote_for(&mut safety_rules, &chain, 2).unwrap().unwrap();
    assert_eq!(safety_rules.state().locked_view(), ViewNumber::genesis());
    vote_for(&mut safety_rules, &chain, 3).unwrap().unwrap();
    assert_eq!(safety_rules.state().locked_view(), ViewNumber::new(1));

    // 2. A vertex whose parent is below the locked view is refused.
    chain.fork(0, 4, &keys[1]);
    assert!(vote_for(&mut safety_rules, &chain, 4).unwrap().is_none());

    // 3. A vertex whose parent is at the locked view is accepted, even if it forks off the chain.
    chain.fork(1, 5, &keys[1]);
    assert!(vote_for(&mut safety_rules, &chain, 5).unwrap().is_some());
    assert_eq!(safety_rules.state().last_voted_view(), ViewNumber::new(5));
}

#[test]
fn commits_only_consecutive_three_chains() {
    let keys = signing_keys(2);
    let kv_store = MemDB::new();
    let mut safety_rules = safety_rules(&keys[0], &kv_store, EPOCH);

    // 1. Views 1, 2, 3: the vote for view 3 commits view 1.
    let chain = three_chain(&keys[1]);
    let vote = vote_for(&mut safety_rules, &chain, 3).unwrap().unwrap();
    assert_eq!(vote.vote_data().committed, Some(chain.headers[1]));

    // 2. Views 1, 2, 5: no commit.
    let mut chain = Chain::genesis(EPOCH, 0);
    chain.extend(1, &keys[1]);
    chain.extend(2, &keys[1]);
    chain.extend(5, &keys[1]);
    let vote = vote_for(&mut safety_rules, &chain, 3).unwrap().unwrap();
    assert_eq!(vote.vote_data().committed, None);

    // 3. The chain through genesis commits nothing.
    let mut safety_rules = self::safety_rules(&keys[1], &kv_store, EPOCH);
    let vote = vote_for(&mut safety_rules, &chain, 2).unwrap().unwrap();
    assert_eq!(vote.vote_data().committed, None);
}

#[test]
fn commit_rule_needs_consecutive_views_not_a_genesis_base() {
    let keys = signing_keys(2);
    let kv_store = MemDB::new();
    let mut safety_rules = safety_rules(&keys[0], &kv_store, EPOCH);

    // 1. Views 5, 6, 7 on top of genesis: the vote for view 7 commits view 5.
    let mut chain = Chain::genesis(EPOCH, 0);
    chain.extend(5, &keys[1]);
    chain.extend(6, &keys[1]);
    chain.extend(7, &keys[1]);
    let vote = vote_for(&mut safety_rules, &chain, 3).unwrap().unwrap();
    assert_eq!(vote.view(), ViewNumber::new(7));
    assert_eq!(vote.vote_data().committed, Some(chain.headers[1]));
    assert_eq!(safety_rules.state().locked_view(), ViewNumber::new(5));

    // 2. Views 5, 8, 9: the gap between 5 and 8 means no commit.
    chain.fork(1, 8, &keys[1]);
    chain.extend(9, &keys[1]);
    let vote = vote_for(&mut safety_rules, &chain, 5).unwrap().unwrap();
    assert_eq!(vote.view(), ViewNumber::new(9));
    assert_eq!(vote.vote_data().committed, None);
    assert_eq!(safety_rules.state().locked_view(), ViewNumber::new(5));
}

#[test]
fn sign_proposal_respects_lock() {
    let keys = signing_keys(1);
    let kv_store = MemDB::new();
    let mut safety_rules = safety_rules(&keys[0], &kv_store, EPOCH);
    let mut chain = three_chain(&keys[0]);
    vote_for(&mut safety_rules, &chain, 3).unwrap().unwrap();
    assert_eq!(safety_rules.state().locked_view(), ViewNumber::new(1));

    // 1. A proposal on top of genesis conflicts with the lock on view 1.
    chain.fork(0, 4, &keys[0]);
    let refused = safety_rules
        .sign_proposal(&chain.vertices[4], chain.qcs[0].clone(), None)
        .unwrap();
    assert!(refused.is_none());

    // 2. A proposal on top of the chain is signed by this replica.
    chain.fork(3, 5, &keys[0]);
    let proposal = safety_rules
        .sign_proposal(&chain.vertices[5], chain.qcs[0].clone(), None)
        .unwrap()
        .unwrap();
    assert_eq!(proposal.view(), ViewNumber::new(5));
    assert!(proposal.is_correct(&keys[0].verifying_key()));
    assert_eq!(safety_rules.state().locked_view(), ViewNumber::new(2));
}

#[test]
fn timeout_vote_upgrades_last_vote() {
    let keys = signing_keys(2);
    let kv_store = MemDB::new();
    let mut safety_rules = safety_rules(&keys[0], &kv_store, EPOCH);
    let chain = three_chain(&keys[1]);
    let vote = vote_for(&mut safety_rules, &chain, 1).unwrap().unwrap();

    // 1. The timeout vote carries the same vote data, plus a valid timeout signature.
    let timeout_vote = safety_rules.timeout_vote(vote.clone()).unwrap().unwrap();
    assert!(timeout_vote.is_timeout());
    assert_eq!(timeout_vote.vote_data(), vote.vote_data());
    assert!(timeout_vote.is_correct(&keys[0].verifying_key()));

    // 2. The upgraded vote replaces the last vote, and upgrading it again changes nothing.
    assert_eq!(
        safety_rules.get_last_vote(ViewNumber::new(1)),
        Some(timeout_vote.clone())
    );
    assert_eq!(
        safety_rules.timeout_vote(timeout_vote.clone()).unwrap(),
        Some(timeout_vote.clone())
    );
    assert_eq!(
        safety_rules.timeout_vote(vote).unwrap(),
        Some(timeout_vote)
    );
}

#[test]
fn timeout_vote_refuses_votes_other_than_the_last() {
    let keys = signing_keys(2);
    let kv_store = MemDB::new();
    let mut safety_rules = safety_rules(&keys[0], &kv_store, EPOCH);
    let chain = three_chain(&keys[1]);

    // 1. Vote in view 1, then in view 3.
    let old_vote = vote_for(&mut safety_rules, &chain, 1).unwrap().unwrap();
    let last_vote = vote_for(&mut safety_rules, &chain, 3).unwrap().unwrap();

    // 2. The vote in view 1 is no longer the last vote, so it is not upgraded and the state is unchanged.
    assert!(safety_rules.timeout_vote(old_vote).unwrap().is_none());
    assert_eq!(safety_rules.state().last_voted_view(), ViewNumber::new(3));
    assert_eq!(
        safety_rules.get_last_vote(ViewNumber::new(3)),
        Some(last_vote)
    );

    // 3. A vote in view 2 is still refused.
    assert!(vote_for(&mut safety_rules, &chain, 2).unwrap().is_none());

    // 4. Another replica's vote is refused too.
    let mut other = self::safety_rules(&keys[1], &MemDB::new(), EPOCH);
    let foreign_vote = vote_for(&mut other, &chain, 3).unwrap().unwrap();
    assert!(safety_rules.timeout_vote(foreign_vote).unwrap().is_none());
    assert!(!safety_rules
        .get_last_vote(ViewNumber::new(3))
        .unwrap()
        .is_timeout());
}

#[test]
fn state_survives_restart() {
    let keys = signing_keys(2);
    let kv_store = MemDB::new();
    let chain = three_chain(&keys[1]);

    // 1. Vote along the chain, then drop Safety Rules.
    {
        let mut safety_rules = safety_rules(&keys[0], &kv_store, EPOCH);
        for index in 1..=3 {
            vote_for(&mut safety_rules, &chain, index).unwrap().unwrap();
        }
    }

    // 2. Safety Rules resumed in the same epoch remember the lock and the last vote.
    let mut resumed = safety_rules(&keys[0], &kv_store, EPOCH);
    assert_eq!(resumed.state().locked_view(), ViewNumber::new(1));
    assert_eq!(resumed.state().last_voted_view(), ViewNumber::new(3));
    assert!(resumed.get_last_vote(ViewNumber::new(3)).is_some());
    assert!(vote_for(&mut resumed, &chain, 3).unwrap().is_none());

    // 3. Safety Rules started in a later epoch start afresh.
    let next_epoch = safety_rules(&keys[0], &kv_store, EPOCH.next());
    assert_eq!(next_epoch.state().epoch(), EPOCH.next());
    assert_eq!(next_epoch.state().locked_view(), ViewNumber::genesis());
    assert_eq!(next_epoch.state().last_voted_view(), ViewNumber::genesis());
}

#[test]
fn failed_write_leaves_state_unchanged() {
    let keys = signing_keys(2);
    let kv_store = MemDB::new();
    let mut safety_rules = safety_rules(&keys[0], &kv_store, EPOCH);
    let chain = three_chain(&keys[1]);

    // 1. With the store failing, nothing is signed and the state stays where it was.
    kv_store.fail_writes(true);
    assert!(matches!(
        vote_for(&mut safety_rules, &chain, 1),
        Err(SafetyRulesError::PersistSafetyStateError(_))
    ));
    assert!(matches!(
        safety_rules.sign_proposal(&chain.vertices[1], chain.qcs[0].clone(), None),
        Err(SafetyRulesError::PersistSafetyStateError(_))
    ));
    assert_eq!(safety_rules.state().last_voted_view(), ViewNumber::genesis());
    assert!(safety_rules.get_last_vote(ViewNumber::new(1)).is_none());
    assert_eq!(kv_store.len(), 0);

    // 2. Once the store recovers, the same vote is cast.
    kv_store.fail_writes(false);
    assert!(vote_for(&mut safety_rules, &chain, 1).unwrap().is_some());
    assert_eq!(kv_store.len(), 1);
}
