/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The voting and proposing guard of the consensus core.
//!
//! [`SafetyRules`] is the only component that signs proposals and votes, and the only component that reads
//! or writes the durable [`SafetyState`](safety_state::SafetyState). It enforces two invariants:
//!
//! |Invariant|Enforced by|
//! |---|---|
//! |A replica votes at most once per view, and never in a view lower than one it already voted in.|[`vote_for`](SafetyRules::vote_for) refuses unless the vertex's view is strictly greater than the last voted view.|
//! |A replica never signs a vertex that conflicts with the 2-chain it is locked on.|[`vote_for`](SafetyRules::vote_for) and [`sign_proposal`](SafetyRules::sign_proposal) refuse unless the vertex's parent view is at least the locked view.|
//!
//! The locked view is advanced by the pre-commit rule: whenever a vertex is signed or voted for, the locked
//! view becomes the view of its grandparent, if that is higher.

pub mod implementation;
pub use implementation::{SafetyRules, SafetyRulesError};

pub mod pluggables;

pub mod safety_state;
